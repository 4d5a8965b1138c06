//! Filter description attached to every assignment batch
//!
//! The upstream filter evaluator produces the prospect-ID list from these
//! criteria; the assignment engine stores their serialized form verbatim as
//! an audit snapshot on both the ownership record and the history event.

use crate::{AquisicaoResult, ValidationError};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Criteria used to select a batch of prospects.
///
/// Field names on the wire follow the dataset column names. An absent or
/// empty list places no restriction on its column. Flag lists accept
/// booleans or `0`/`1` and always serialize as booleans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProspectFilters {
    #[serde(rename = "cd_cnae5", default, skip_serializing_if = "Option::is_none")]
    pub cnae5_codes: Option<Vec<String>>,
    #[serde(rename = "cd_cnae", default, skip_serializing_if = "Option::is_none")]
    pub cnae_codes: Option<Vec<String>>,
    #[serde(rename = "faixa_fat", default, skip_serializing_if = "Option::is_none")]
    pub revenue_brackets: Option<Vec<String>>,
    #[serde(rename = "unidade_federal", default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    #[serde(rename = "poligono", default, skip_serializing_if = "Option::is_none")]
    pub polygons: Option<Vec<String>>,
    #[serde(rename = "pub_credito", default, skip_serializing_if = "Option::is_none")]
    pub credit_publications: Option<Vec<String>>,
    #[serde(rename = "porte", default, skip_serializing_if = "Option::is_none")]
    pub size_classes: Option<Vec<String>>,
    #[serde(rename = "rating", default, skip_serializing_if = "Option::is_none")]
    pub ratings: Option<Vec<String>>,
    #[serde(
        rename = "fl_potencial",
        default,
        deserialize_with = "flags",
        skip_serializing_if = "Option::is_none"
    )]
    pub potential_flags: Option<Vec<bool>>,
    #[serde(
        rename = "fl_cnae_foco",
        default,
        deserialize_with = "flags",
        skip_serializing_if = "Option::is_none"
    )]
    pub cnae_focus_flags: Option<Vec<bool>>,
    #[serde(
        rename = "fl_pep",
        default,
        deserialize_with = "flags",
        skip_serializing_if = "Option::is_none"
    )]
    pub pep_flags: Option<Vec<bool>>,
    #[serde(rename = "status_cadastral", default, skip_serializing_if = "Option::is_none")]
    pub registration_statuses: Option<Vec<String>>,
    #[serde(rename = "segmento", default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<String>>,
    #[serde(rename = "campanha", default, skip_serializing_if = "Option::is_none")]
    pub campaigns: Option<Vec<String>>,
    #[serde(rename = "funil", default, skip_serializing_if = "Option::is_none")]
    pub funnel_stages: Option<Vec<String>>,
    #[serde(rename = "mes_ref_start", default, skip_serializing_if = "Option::is_none")]
    pub reference_start: Option<NaiveDate>,
    #[serde(rename = "mes_ref_end", default, skip_serializing_if = "Option::is_none")]
    pub reference_end: Option<NaiveDate>,
}

fn flags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<bool>>, D::Error> {
    use serde::de::Error;
    use serde_json::Value;

    let Some(values) = Option::<Vec<Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    values
        .into_iter()
        .map(|value| match &value {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
            Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
            Value::String(s) if s.trim() == "0" => Ok(false),
            Value::String(s) if s.trim() == "1" => Ok(true),
            _ => Err(D::Error::custom(format!("flag must be a boolean, 0 or 1, got {value}"))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

impl ProspectFilters {
    /// Label of the reference period stored with each assignment.
    ///
    /// The start bound wins; the end bound is used when only it is set.
    pub fn reference_period(&self) -> Option<String> {
        self.reference_start
            .or(self.reference_end)
            .map(|date| date.format("%Y-%m-%d").to_string())
    }

    /// Serialize these criteria for audit storage.
    pub fn snapshot(&self) -> AquisicaoResult<FilterSnapshot> {
        serde_json::to_string(self)
            .map(FilterSnapshot)
            .map_err(|e| {
                ValidationError::InvalidValue {
                    field: "filters".to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    /// Reject an inverted reference range.
    pub fn validate(&self) -> AquisicaoResult<()> {
        if let (Some(start), Some(end)) = (self.reference_start, self.reference_end) {
            if start > end {
                return Err(ValidationError::InvalidValue {
                    field: "mes_ref_start".to_string(),
                    reason: format!("{} is after mes_ref_end {}", start, end),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Serialized filter description, stored as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSnapshot(String);

impl FilterSnapshot {
    /// Wrap an already-serialized snapshot read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the snapshot back into the criteria it was taken from.
    pub fn decode(&self) -> AquisicaoResult<ProspectFilters> {
        serde_json::from_str(&self.0).map_err(|e| {
            ValidationError::InvalidValue {
                field: "filter_snapshot".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl fmt::Display for FilterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
