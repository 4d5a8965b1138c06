//! Ledger replay.
//!
//! Rebuilds the owner of every prospect from the history ledger and compares
//! the result with the current ownership records.

use aquisicao_core::{EventId, ExecutiveId, HistoryEvent, OwnershipRecord, ProspectId};
use serde::Serialize;
use std::collections::BTreeMap;

/// One disagreement between the ledger and the ownership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Replayed owner and stored owner differ.
    OwnerMismatch {
        prospect_id: ProspectId,
        replayed: ExecutiveId,
        current: ExecutiveId,
    },
    /// The ledger assigns the prospect but no record exists.
    MissingRecord {
        prospect_id: ProspectId,
        replayed: ExecutiveId,
    },
    /// A record exists with no event ever assigning the prospect.
    UnrecordedOwnership {
        prospect_id: ProspectId,
        current: ExecutiveId,
    },
    /// An event's previous owner is not the owner at that point of the replay.
    BrokenChain {
        prospect_id: ProspectId,
        event_id: EventId,
        expected_previous: Option<ExecutiveId>,
        recorded_previous: Option<ExecutiveId>,
    },
}

/// Result of replaying the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub events_replayed: usize,
    pub records_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Replay `events` (oldest first) and compare against `records`.
pub fn replay(events: &[HistoryEvent], records: &[OwnershipRecord]) -> AuditReport {
    let mut owners: BTreeMap<&ProspectId, ExecutiveId> = BTreeMap::new();
    let mut discrepancies = Vec::new();

    for event in events {
        let expected = owners.get(&event.prospect_id).copied();
        if expected != event.previous_executive_id {
            discrepancies.push(Discrepancy::BrokenChain {
                prospect_id: event.prospect_id.clone(),
                event_id: event.event_id,
                expected_previous: expected,
                recorded_previous: event.previous_executive_id,
            });
        }
        owners.insert(&event.prospect_id, event.new_executive_id);
    }

    let mut current: BTreeMap<&ProspectId, ExecutiveId> = BTreeMap::new();
    for record in records {
        current.insert(&record.prospect_id, record.executive_id);
        match owners.get(&record.prospect_id) {
            Some(&replayed) if replayed != record.executive_id => {
                discrepancies.push(Discrepancy::OwnerMismatch {
                    prospect_id: record.prospect_id.clone(),
                    replayed,
                    current: record.executive_id,
                });
            }
            Some(_) => {}
            None => discrepancies.push(Discrepancy::UnrecordedOwnership {
                prospect_id: record.prospect_id.clone(),
                current: record.executive_id,
            }),
        }
    }

    for (prospect_id, replayed) in &owners {
        if !current.contains_key(prospect_id) {
            discrepancies.push(Discrepancy::MissingRecord {
                prospect_id: (*prospect_id).clone(),
                replayed: *replayed,
            });
        }
    }

    AuditReport {
        events_replayed: events.len(),
        records_checked: records.len(),
        discrepancies,
    }
}
