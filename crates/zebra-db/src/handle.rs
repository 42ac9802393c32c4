use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use zebra_common::{Error, Result};
use zebra_config::StorageConfig;

use crate::engine::Database;

enum HandleState {
    Uninitialized,
    Ready(Arc<Database>),
    Failed(String),
}

/// Lifecycle of the storage handle as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum HandleStatus {
    Uninitialized,
    Ready,
    Failed(String),
}

/// Lazily opened, process-wide database. The first `open` decides the outcome:
/// once it has failed, `get` keeps returning `Error::NotInitialized` until `retry`.
pub struct StorageHandle {
    config: StorageConfig,
    state: RwLock<HandleState>,
}

impl StorageHandle {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HandleState::Uninitialized),
        }
    }

    /// Open the database if that has not been attempted yet. Concurrent callers
    /// share the single attempt.
    pub async fn open(&self) -> Result<Arc<Database>> {
        if let Some(result) = self.settled().await {
            return result;
        }

        let mut state = self.state.write().await;
        if let HandleState::Uninitialized = *state {
            *state = self.attempt().await;
        }
        Self::resolve(&state)
    }

    /// The open database, attempting the first open if none has happened yet.
    pub async fn get(&self) -> Result<Arc<Database>> {
        self.open().await
    }

    /// Forget a previous failure and open again.
    pub async fn retry(&self) -> Result<Arc<Database>> {
        let mut state = self.state.write().await;
        if let HandleState::Ready(db) = &*state {
            return Ok(Arc::clone(db));
        }
        info!("retrying storage initialization");
        *state = self.attempt().await;
        Self::resolve(&state)
    }

    pub async fn status(&self) -> HandleStatus {
        match &*self.state.read().await {
            HandleState::Uninitialized => HandleStatus::Uninitialized,
            HandleState::Ready(_) => HandleStatus::Ready,
            HandleState::Failed(reason) => HandleStatus::Failed(reason.clone()),
        }
    }

    async fn settled(&self) -> Option<Result<Arc<Database>>> {
        let state = self.state.read().await;
        match &*state {
            HandleState::Uninitialized => None,
            _ => Some(Self::resolve(&state)),
        }
    }

    async fn attempt(&self) -> HandleState {
        let config = self.config.clone();
        let opened = tokio::task::spawn_blocking(move || Database::open(&config))
            .await
            .map_err(|e| Error::Initialization(format!("open task failed: {e}")))
            .and_then(|r| r);

        match opened {
            Ok(db) => HandleState::Ready(Arc::new(db)),
            Err(e) => {
                warn!("storage initialization failed: {e}");
                HandleState::Failed(e.to_string())
            }
        }
    }

    fn resolve(state: &HandleState) -> Result<Arc<Database>> {
        match state {
            HandleState::Ready(db) => Ok(Arc::clone(db)),
            HandleState::Failed(reason) => Err(Error::NotInitialized(reason.clone())),
            HandleState::Uninitialized => {
                Err(Error::NotInitialized("storage has not been opened".into()))
            }
        }
    }
}
