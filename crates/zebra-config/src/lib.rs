pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, apply_overrides};
pub use model::{AppConfig, ExecutionStrategy, GatewayConfig, SearchConfig, StorageConfig};
