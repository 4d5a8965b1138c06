//! Identity types for prospects, executives and ledger events

use crate::{AquisicaoResult, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Tax identifier (CNPJ/CPF) of a prospect.
///
/// The value is opaque apart from trimming: two IDs are the same prospect
/// exactly when their trimmed strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProspectId(String);

impl ProspectId {
    /// Build a prospect ID, rejecting blank values.
    pub fn new(raw: impl AsRef<str>) -> AquisicaoResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "prospect_id".to_string(),
                reason: "must not be blank".to_string(),
            }
            .into());
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProspectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProspectId {
    type Error = crate::AquisicaoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProspectId> for String {
    fn from(id: ProspectId) -> Self {
        id.0
    }
}

impl FromStr for ProspectId {
    type Err = crate::AquisicaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Executive identifier using UUIDv7 for timestamp-sortable IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutiveId(Uuid);

impl ExecutiveId {
    /// Generate a new timestamp-sortable executive ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ExecutiveId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ExecutiveId {
    type Err = crate::AquisicaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|e| {
            ValidationError::InvalidValue {
                field: "executive_id".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Identifier of one history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// TESTS
// =============================================================================
