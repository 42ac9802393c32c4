use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use zebra_common::{Error, Result};
use zebra_config::AppConfig;

use crate::router::build_router;
use crate::state::AppState;

/// Binds the configured address and serves the RPC API and WebSocket.
pub struct GatewayServer {
    config: AppConfig,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);

        let state = Arc::new(AppState::new(self.config));
        // A failed open is reported as NotInitialized until RETRY_INIT.
        if let Err(e) = state.storage.open().await {
            warn!("storage unavailable at startup: {e}");
        }
        let app = build_router(state);

        let listener = TcpListener::bind(&addr).await?;
        info!("Zebra gateway listening on {addr}");

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Gateway(format!("server error: {e}")))?;

        Ok(())
    }
}
