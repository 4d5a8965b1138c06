//! Tracing subscriber initialization.

use crate::config::{LogFormat, LoggingConfig};
use aquisicao_core::{AquisicaoResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
pub fn init(config: &LoggingConfig) -> AquisicaoResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
            field: "logging.filter".to_string(),
            value: config.filter.clone(),
            reason: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e| {
        ConfigError::InvalidValue {
            field: "logging".to_string(),
            value: format!("{:?}", config.format),
            reason: format!("Failed to init subscriber: {}", e),
        }
        .into()
    })
}
