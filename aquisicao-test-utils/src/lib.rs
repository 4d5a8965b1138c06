//! Aquisicao Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for prospect IDs, batches and filters
//! - Fixtures for executives and seeded in-memory backends
//! - Assertions for error variants and summary counters

pub use aquisicao_storage::{FaultPlan, MemoryBackend};

pub use aquisicao_core::{
    AquisicaoError, AquisicaoResult, AssignmentSummary, EntityType, Executive, ExecutiveId,
    ProspectFilters, ProspectId, StorageError, ValidationError,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for assignment inputs.

    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    /// A CNPJ-shaped prospect ID.
    pub fn arb_prospect_id() -> impl Strategy<Value = ProspectId> {
        "[0-9]{14}".prop_map(|raw| {
            ProspectId::new(raw).unwrap_or_else(|_| unreachable!("digits are never blank"))
        })
    }

    /// Prospect ID drawn from a small pool so batches repeat IDs.
    pub fn arb_pooled_prospect_id(pool: u32) -> impl Strategy<Value = ProspectId> {
        (0..pool.max(1)).prop_map(|n| {
            ProspectId::new(format!("{:014}", n))
                .unwrap_or_else(|_| unreachable!("digits are never blank"))
        })
    }

    /// Batch of up to `max_len` IDs from a pool of `pool`, duplicates allowed.
    pub fn arb_batch(pool: u32, max_len: usize) -> impl Strategy<Value = Vec<ProspectId>> {
        prop::collection::vec(arb_pooled_prospect_id(pool), 0..=max_len)
    }

    fn arb_codes(pattern: &'static str) -> impl Strategy<Value = Option<Vec<String>>> {
        prop::option::of(prop::collection::vec(pattern, 0..3))
    }

    /// State codes as used in the dataset.
    pub fn arb_states() -> impl Strategy<Value = Option<Vec<String>>> {
        prop::option::of(prop::collection::vec(
            prop_oneof![
                Just("SP".to_string()),
                Just("RJ".to_string()),
                Just("MG".to_string()),
                Just("BA".to_string()),
                Just("RS".to_string()),
            ],
            0..3,
        ))
    }

    /// Reference range that is never inverted.
    pub fn arb_reference_range() -> impl Strategy<Value = (Option<NaiveDate>, Option<NaiveDate>)> {
        (0u32..24, 0u32..12, any::<bool>(), any::<bool>()).prop_map(
            |(offset, span, has_start, has_end)| {
                let month = |n: u32| {
                    NaiveDate::from_ymd_opt(2023 + (n / 12) as i32, n % 12 + 1, 1)
                };
                let start = month(offset).filter(|_| has_start);
                let end = month(offset + span).filter(|_| has_end);
                (start, end)
            },
        )
    }

    /// Filter description with a plausible mix of criteria.
    pub fn arb_filters() -> impl Strategy<Value = ProspectFilters> {
        (
            arb_codes("[0-9]{5}"),
            arb_states(),
            arb_codes("[A-E]"),
            prop::option::of(prop::collection::vec(any::<bool>(), 0..2)),
            arb_reference_range(),
        )
            .prop_map(
                |(cnae5_codes, states, ratings, potential_flags, (start, end))| ProspectFilters {
                    cnae5_codes,
                    states,
                    ratings,
                    potential_flags,
                    reference_start: start,
                    reference_end: end,
                    ..Default::default()
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use aquisicao_storage::ExecutiveDirectory;

    /// Active executive with an email derived from `name`.
    pub fn executive(name: &str) -> Executive {
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        Executive::new(name, email, None)
    }

    /// Parse raw IDs, panicking on blanks.
    pub fn prospect_ids(raw: &[&str]) -> Vec<ProspectId> {
        aquisicao_core::parse_prospect_ids(raw.iter().copied())
            .unwrap_or_else(|e| panic!("invalid fixture prospect IDs: {e}"))
    }

    /// `{"unidade_federal": ["SP"]}`
    pub fn sp_filters() -> ProspectFilters {
        ProspectFilters {
            states: Some(vec!["SP".to_string()]),
            ..Default::default()
        }
    }

    /// In-memory backend with one registered executive per name.
    pub async fn seeded_backend(names: &[&str]) -> (MemoryBackend, Vec<Executive>) {
        let backend = MemoryBackend::new();
        let mut executives = Vec::with_capacity(names.len());
        for name in names {
            let exec = executive(name);
            backend
                .executive_insert(&exec)
                .await
                .unwrap_or_else(|e| panic!("failed to seed executive {name}: {e}"));
            executives.push(exec);
        }
        (backend, executives)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for assignment results.

    use super::*;

    /// Assert the four counters.
    #[track_caller]
    pub fn assert_summary(
        summary: &AssignmentSummary,
        total: usize,
        newly_assigned: usize,
        overwritten: usize,
        skipped_same_executive: usize,
    ) {
        assert_eq!(
            (
                summary.total,
                summary.newly_assigned,
                summary.overwritten,
                summary.skipped_same_executive
            ),
            (total, newly_assigned, overwritten, skipped_same_executive),
            "unexpected summary {:?}",
            summary
        );
        assert!(summary.is_consistent(), "inconsistent summary {:?}", summary);
    }

    /// Assert that a result is a NotFound storage error for `entity_type`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(
        result: &AquisicaoResult<T>,
        entity_type: EntityType,
    ) {
        match result {
            Err(AquisicaoError::Storage(StorageError::NotFound {
                entity_type: et, ..
            })) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    /// Assert that a result is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &AquisicaoResult<T>) {
        match result {
            Err(AquisicaoError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a result failed with a retryable storage error.
    #[track_caller]
    pub fn assert_retryable<T: std::fmt::Debug>(result: &AquisicaoResult<T>) {
        match result {
            Err(err) if err.is_retryable() => {}
            other => panic!("Expected retryable error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
