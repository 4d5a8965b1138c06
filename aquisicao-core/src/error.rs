//! Error types for assignment operations

use crate::EntityType;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Batch of {size} prospects exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Prospect dataset errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("Prospects file not found: {path}")]
    NotFound { path: String },

    #[error("Unsupported dataset format '{extension}', use .json, .jsonl or .csv")]
    UnsupportedFormat { extension: String },

    #[error("Failed to read dataset {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Malformed dataset row {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Master error type for all assignment errors.
#[derive(Debug, Clone, Error)]
pub enum AquisicaoError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

impl AquisicaoError {
    /// Whether the whole operation may be retried as-is.
    ///
    /// Only transient storage faults qualify; a retried batch is safe because
    /// the failed attempt left no effects behind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AquisicaoError::Storage(StorageError::Unavailable { .. }))
    }

    /// Whether the error reports a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AquisicaoError::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for assignment operations.
pub type AquisicaoResult<T> = Result<T, AquisicaoError>;

// =============================================================================
// TESTS
// =============================================================================
