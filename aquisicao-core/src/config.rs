//! Configuration types

use crate::{AquisicaoResult, ConfigError};
use serde::{Deserialize, Serialize};

/// Assignment engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Largest batch accepted by `assign_batch`.
    pub max_batch_size: usize,
    /// Rows fetched per history page.
    pub history_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50_000,
            history_page_size: 200,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(AquisicaoError::Config) if invalid.
    pub fn validate(&self) -> AquisicaoResult<()> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_batch_size".to_string(),
                value: self.max_batch_size.to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.history_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history_page_size".to_string(),
                value: self.history_page_size.to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
