use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{EtlError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "etl.toml";
pub const DEFAULT_PREVIEW_ROWS: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub warehouse: WarehouseConfig,
    pub sources: HashMap<String, SourceConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Rows read from the source in preview mode
    pub preview_rows: usize,
    /// Upper bound on rows read from the join side
    pub join_row_limit: Option<usize>,
    /// Registers the `custom_code` step
    pub allow_custom_code: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            preview_rows: DEFAULT_PREVIEW_ROWS,
            join_row_limit: None,
            allow_custom_code: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warehouse.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_prefix: "catalog-etl.log".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`, else `ETL_CONFIG`, else `etl.toml`, then apply env overrides.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ETL_CONFIG").ok().map(PathBuf::from));
        let config_path = explicit.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else if explicit.is_some() {
            return Err(EtlError::config(format!(
                "Failed to read config file '{}': file does not exist",
                config_path.display()
            )));
        } else {
            debug!(path = %config_path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `ETL_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ETL_ALLOW_CUSTOM_CODE") {
            self.engine.allow_custom_code = crate::buffer::value::parse_bool(&raw).ok_or_else(|| {
                EtlError::config(format!("ETL_ALLOW_CUSTOM_CODE must be a boolean, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup("ETL_PREVIEW_ROWS") {
            self.engine.preview_rows = raw.trim().parse().map_err(|_| {
                EtlError::config(format!(
                    "ETL_PREVIEW_ROWS must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = lookup("ETL_WAREHOUSE_PATH") {
            self.warehouse.path = PathBuf::from(raw);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_full_config() {
        let config: EngineConfig = toml::from_str(
            r#"
            [engine]
            preview_rows = 25
            join_row_limit = 5000
            allow_custom_code = true

            [warehouse]
            path = "data/warehouse.db"

            [sources.crm]
            path = "data/crm.db"

            [logging]
            directory = "var/log"
            file_prefix = "etl.log"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.preview_rows, 25);
        assert_eq!(config.engine.join_row_limit, Some(5000));
        assert!(config.engine.allow_custom_code);
        assert_eq!(config.sources["crm"].path, PathBuf::from("data/crm.db"));
        assert_eq!(config.logging.file_prefix, "etl.log");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("[engine]\npreview_rows = 5\n").unwrap();
        assert_eq!(config.engine.preview_rows, 5);
        assert!(!config.engine.allow_custom_code);
        assert_eq!(config.warehouse.path, PathBuf::from("warehouse.db"));
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        let env = HashMap::from([
            ("ETL_ALLOW_CUSTOM_CODE", "yes"),
            ("ETL_PREVIEW_ROWS", "7"),
            ("ETL_WAREHOUSE_PATH", "/tmp/wh.db"),
        ]);
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(config.engine.allow_custom_code);
        assert_eq!(config.engine.preview_rows, 7);
        assert_eq!(config.warehouse.path, PathBuf::from("/tmp/wh.db"));
    }

    #[test]
    fn test_bad_env_override_is_configuration_error() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(|k| (k == "ETL_PREVIEW_ROWS").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(EngineConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
