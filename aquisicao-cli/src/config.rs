//! Configuration loading for the CLI.
//!
//! Read from the TOML file named by `--config` or `AQUISICAO_CONFIG`. Every
//! section is optional; `AQUISICAO_DB_*` variables override `[database]`.

use aquisicao_core::{AquisicaoResult, ConfigError, EngineConfig};
use aquisicao_storage::DbConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub dataset: DatasetConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_size: usize,
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let db = DbConfig::default();
        Self {
            host: db.host,
            port: db.port,
            dbname: db.dbname,
            user: db.user,
            password: db.password,
            max_size: db.max_size,
            timeout_secs: db.timeout.as_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Pool settings with environment overrides applied.
    pub fn to_db_config(&self) -> DbConfig {
        DbConfig {
            host: self.host.clone(),
            port: self.port,
            dbname: self.dbname.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            max_size: self.max_size,
            timeout: Duration::from_secs(self.timeout_secs),
        }
        .with_env_overrides()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// `.json` or `.jsonl` prospect file.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Load from `path` when given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> AquisicaoResult<Self> {
        let config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> AquisicaoResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            value: path.display().to_string(),
            reason: format!("Failed to read config file: {}", e),
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::InvalidValue { field, reason, .. } => ConfigError::InvalidValue {
                field,
                value: path.display().to_string(),
                reason,
            }
            .into(),
            other => other.into(),
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            value: String::new(),
            reason: format!("Failed to parse config TOML: {}", e),
        })
    }

    pub fn validate(&self) -> AquisicaoResult<()> {
        self.engine.validate()?;

        if self.database.host.trim().is_empty() {
            return Err(invalid("database.host", &self.database.host, "must not be empty"));
        }
        if self.database.port == 0 {
            return Err(invalid("database.port", "0", "must be > 0"));
        }
        if self.database.dbname.trim().is_empty() {
            return Err(invalid("database.dbname", &self.database.dbname, "must not be empty"));
        }
        if self.database.max_size == 0 {
            return Err(invalid("database.max_size", "0", "must be > 0"));
        }
        if self.database.timeout_secs == 0 {
            return Err(invalid("database.timeout_secs", "0", "must be > 0"));
        }
        if let Some(path) = &self.dataset.path {
            if path.as_os_str().is_empty() {
                return Err(invalid("dataset.path", "", "must not be empty"));
            }
        }
        if self.logging.filter.trim().is_empty() {
            return Err(invalid("logging.filter", "", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> aquisicao_core::AquisicaoError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
