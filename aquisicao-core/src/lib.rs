//! Aquisicao Core - Entity Types
//!
//! Pure data structures for prospect assignment: identifiers, the ownership
//! record, the history event, the filter description and the error taxonomy.
//! All other crates depend on this one. No I/O lives here.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod filter;
pub mod identity;

pub use config::EngineConfig;
pub use entities::{
    AssignmentSummary, Executive, ExecutiveUpdate, HistoryEvent, OwnershipRecord,
};
pub use enums::{AssignmentOutcome, EntityType};
pub use error::{
    AquisicaoError, AquisicaoResult, ConfigError, DatasetError, StorageError, ValidationError,
};
pub use filter::{FilterSnapshot, ProspectFilters};
pub use identity::{EventId, ExecutiveId, ProspectId, Timestamp};

/// Parse a list of raw prospect IDs, failing on the first blank entry.
pub fn parse_prospect_ids<I, S>(raw: I) -> AquisicaoResult<Vec<ProspectId>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(ProspectId::new).collect()
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Counters recorded from any outcome sequence satisfy the summary invariant.
        #[test]
        fn prop_summary_invariant_holds(choices in prop::collection::vec(0u8..3, 0..64)) {
            let mut summary = AssignmentSummary::default();
            for choice in &choices {
                let outcome = match choice {
                    0 => AssignmentOutcome::NewlyAssigned,
                    1 => AssignmentOutcome::SkippedSameExecutive,
                    _ => AssignmentOutcome::Overwritten { previous: ExecutiveId::new() },
                };
                summary.record(outcome);
            }
            prop_assert_eq!(summary.total, choices.len());
            prop_assert!(summary.is_consistent());
        }

        /// Any non-blank ID survives parsing with surrounding whitespace removed.
        #[test]
        fn prop_prospect_id_trims(core in "[0-9]{11,14}", pad in " {0,3}") {
            let raw = format!("{pad}{core}{pad}");
            let id = ProspectId::new(&raw).unwrap();
            prop_assert_eq!(id.as_str(), core.as_str());
        }
    }

    #[test]
    fn test_parse_prospect_ids_keeps_order_and_duplicates() {
        let ids = parse_prospect_ids(["222", "111", "222"]).unwrap();
        let raw: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(raw, vec!["222", "111", "222"]);
    }

    #[test]
    fn test_parse_prospect_ids_rejects_blank() {
        assert!(parse_prospect_ids(["111", " "]).is_err());
    }
}
