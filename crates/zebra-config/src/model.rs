use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            search: SearchConfig::default(),
            gateway: GatewayConfig::default(),
            data_dir: None,
            log_level: Some("info".to_string()),
        }
    }
}

/// Which side of the process talks to SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Worker thread when called from inside a tokio runtime, in-process otherwise.
    #[default]
    Auto,
    InProcess,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. `:memory:` opens a transient database; unset means
    /// `<data_dir>/zebra.sqlite3`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub execution: ExecutionStrategy,

    /// Upper bound on a single worker round trip.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            execution: ExecutionStrategy::default(),
            query_timeout_ms: default_query_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn in_memory(execution: ExecutionStrategy) -> Self {
        Self {
            path: Some(PathBuf::from(":memory:")),
            execution,
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path
            .as_deref()
            .is_some_and(|p| p.as_os_str() == ":memory:")
    }
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Named gateway search sessions kept at once; the least recently used is
    /// dropped beyond this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_page_size() -> usize {
    10
}

fn default_max_sessions() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3717
}
