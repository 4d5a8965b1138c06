//! Core entity structures

use crate::{
    AssignmentOutcome, EventId, ExecutiveId, FilterSnapshot, ProspectId, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Sales executive that prospects are assigned to.
///
/// The assignment core only uses the ID as a foreign key; the remaining
/// fields belong to the executive directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executive {
    pub executive_id: ExecutiveId,
    pub name: String,
    pub email: String,
    pub region: Option<String>,
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Executive {
    /// Create a new active executive.
    pub fn new(name: impl Into<String>, email: impl Into<String>, region: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            executive_id: ExecutiveId::new(),
            name: name.into(),
            email: email.into(),
            region,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Label shown by listings, e.g. `Ana (ana@example.com)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.email)
    }

    /// Apply a patch, bumping `updated_at`.
    pub fn apply(&mut self, update: ExecutiveUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(email) = update.email {
            self.email = email;
        }
        if let Some(region) = update.region {
            self.region = region;
        }
        if let Some(active) = update.active {
            self.active = active;
        }
        self.updated_at = Utc::now();
    }
}

/// Update payload for executives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutiveUpdate {
    /// New display name
    pub name: Option<String>,
    /// New contact email
    pub email: Option<String>,
    /// New region (`Some(None)` clears it)
    pub region: Option<Option<String>>,
    /// Activate or deactivate
    pub active: Option<bool>,
}

/// Current owner of a prospect. At most one exists per prospect ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub prospect_id: ProspectId,
    pub executive_id: ExecutiveId,
    /// Time of the last ownership change.
    pub assigned_at: Timestamp,
    pub filter_snapshot: FilterSnapshot,
    pub reference_period: Option<String>,
}

/// Immutable ledger entry describing one ownership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: EventId,
    pub prospect_id: ProspectId,
    pub new_executive_id: ExecutiveId,
    /// `None` marks the first assignment of the prospect.
    pub previous_executive_id: Option<ExecutiveId>,
    pub occurred_at: Timestamp,
    pub filter_snapshot: FilterSnapshot,
    pub reference_period: Option<String>,
}

impl HistoryEvent {
    /// Event for a record that was just written with `record`.
    pub fn for_record(record: &OwnershipRecord, previous: Option<ExecutiveId>) -> Self {
        Self {
            event_id: EventId::new(),
            prospect_id: record.prospect_id.clone(),
            new_executive_id: record.executive_id,
            previous_executive_id: previous,
            occurred_at: record.assigned_at,
            filter_snapshot: record.filter_snapshot.clone(),
            reference_period: record.reference_period.clone(),
        }
    }
}

/// Per-batch counters returned by the assignment engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub total: usize,
    pub newly_assigned: usize,
    pub overwritten: usize,
    pub skipped_same_executive: usize,
}

impl AssignmentSummary {
    /// Count one processed occurrence.
    pub fn record(&mut self, outcome: AssignmentOutcome) {
        self.total += 1;
        match outcome {
            AssignmentOutcome::NewlyAssigned => self.newly_assigned += 1,
            AssignmentOutcome::Overwritten { .. } => self.overwritten += 1,
            AssignmentOutcome::SkippedSameExecutive => self.skipped_same_executive += 1,
        }
    }

    /// `total == newly_assigned + overwritten + skipped_same_executive`.
    pub fn is_consistent(&self) -> bool {
        self.total == self.newly_assigned + self.overwritten + self.skipped_same_executive
    }

    /// Number of history events the batch appended.
    pub fn events_written(&self) -> usize {
        self.newly_assigned + self.overwritten
    }
}

// ============================================================================
// TESTS
// ============================================================================
