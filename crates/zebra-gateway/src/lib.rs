pub mod router;
pub mod rpc;
pub mod server;
pub mod state;
pub mod stdio;
pub mod ws;

pub use rpc::{Reply, Request, RpcResponse, dispatch, dispatch_text};
pub use server::GatewayServer;
pub use state::{AppState, SharedState};
