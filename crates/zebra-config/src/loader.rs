use std::path::{Path, PathBuf};

use tracing::info;
use zebra_common::{Error, Result};

use crate::model::AppConfig;

pub const DB_PATH_ENV: &str = "ZEBRA_DB_PATH";
pub const API_KEY_ENV: &str = "ZEBRA_API_KEY";

const DB_FILE_NAME: &str = "zebra.sqlite3";

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir();
        Ok(Self { config_dir })
    }

    pub fn default_config_dir() -> PathBuf {
        let home_config = dirs::home_dir().map(|h| h.join(".zebra"));
        let xdg_config = dirs::config_dir().map(|c| c.join("zebra"));

        match (xdg_config, home_config) {
            (Some(xdg), Some(home)) => {
                if xdg.exists() {
                    xdg
                } else if home.exists() {
                    // legacy location
                    home
                } else {
                    xdg
                }
            }
            (Some(xdg), None) => xdg,
            (None, Some(home)) => home,
            (None, None) => PathBuf::from(".zebra"),
        }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn load(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// Load the config file, then apply `ZEBRA_*` environment overrides and fill in
    /// the database path.
    pub fn load_resolved(&self) -> Result<AppConfig> {
        let mut config = self.load()?;
        apply_overrides(&mut config, |key| std::env::var(key).ok());
        self.resolve_storage_path(&mut config);
        Ok(config)
    }

    pub fn data_dir(&self, config: &AppConfig) -> PathBuf {
        config
            .data_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("data"))
    }

    /// Default the database file into the data directory when none is configured.
    pub fn resolve_storage_path(&self, config: &mut AppConfig) {
        if config.storage.path.is_none() {
            config.storage.path = Some(self.data_dir(config).join(DB_FILE_NAME));
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [self.config_dir.clone(), self.config_dir.join("data")];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }
}

/// Apply environment overrides through `lookup` so callers and tests can supply
/// their own source of variables.
pub fn apply_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(path) = lookup(DB_PATH_ENV).filter(|v| !v.trim().is_empty()) {
        info!("{DB_PATH_ENV} overrides storage path");
        config.storage.path = Some(PathBuf::from(path));
    }
    if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
        config.gateway.api_key = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::{API_KEY_ENV, ConfigLoader, DB_PATH_ENV, apply_overrides};
    use crate::model::{AppConfig, ExecutionStrategy};
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn load_returns_default_when_no_config_exists() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        let loader = ConfigLoader::with_dir(dir.path());
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3717);
        assert_eq!(config.search.page_size, 10);
        assert_eq!(config.storage.execution, ExecutionStrategy::Auto);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn load_prefers_yaml_over_toml_when_both_exist() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        fs::write(
            dir.path().join("config.yml"),
            "storage:\n  execution: worker\n  query_timeout_ms: 250\nsearch:\n  page_size: 25\n",
        )
        .expect("failed to write yaml config");
        fs::write(
            dir.path().join("config.toml"),
            "[search]\npage_size = 99\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(dir.path());
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.storage.execution, ExecutionStrategy::Worker);
        assert_eq!(config.storage.query_timeout_ms, 250);
        assert_eq!(config.search.page_size, 25);
    }

    #[test]
    fn load_reads_toml_when_yaml_missing() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        fs::write(
            dir.path().join("config.toml"),
            "[storage]\nexecution = \"in_process\"\n\n[gateway]\nport = 4002\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(dir.path());
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.storage.execution, ExecutionStrategy::InProcess);
        assert_eq!(config.gateway.port, 4002);
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        fs::write(dir.path().join("config.yml"), "storage: [not, a, map")
            .expect("failed to write yaml config");

        let err = ConfigLoader::with_dir(dir.path())
            .load()
            .expect_err("malformed yaml should fail");
        assert!(err.to_string().contains("YAML"));
    }

    #[test]
    fn storage_path_defaults_into_data_dir() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let loader = ConfigLoader::with_dir(dir.path());

        let mut config = AppConfig::default();
        loader.resolve_storage_path(&mut config);

        assert_eq!(
            config.storage.path,
            Some(dir.path().join("data").join("zebra.sqlite3"))
        );
    }

    #[test]
    fn env_overrides_replace_path_and_api_key() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, |key| match key {
            DB_PATH_ENV => Some("/tmp/elsewhere.sqlite3".to_string()),
            API_KEY_ENV => Some("secret".to_string()),
            _ => None,
        });

        assert_eq!(
            config.storage.path,
            Some(PathBuf::from("/tmp/elsewhere.sqlite3"))
        );
        assert_eq!(config.gateway.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn ensure_dirs_creates_expected_subdirectories() {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let dir = root.path().join("zebra");
        let loader = ConfigLoader::with_dir(&dir);

        loader.ensure_dirs().expect("ensure_dirs should succeed");

        assert!(dir.exists());
        assert!(dir.join("data").exists());
    }
}
