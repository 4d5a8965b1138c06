//! Enum types

use crate::ExecutiveId;
use serde::{Deserialize, Serialize};

/// Entity type discriminator used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Executive,
    Prospect,
    OwnershipRecord,
    HistoryEvent,
}

/// Decision taken for one prospect occurrence within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// No previous owner; a record was created.
    NewlyAssigned,
    /// Owned by someone else; the record now points at the target.
    Overwritten { previous: ExecutiveId },
    /// Already owned by the target; nothing was written.
    SkippedSameExecutive,
}

impl AssignmentOutcome {
    /// Decide the outcome from the current owner and the batch target.
    pub fn decide(current: Option<ExecutiveId>, target: ExecutiveId) -> Self {
        match current {
            None => AssignmentOutcome::NewlyAssigned,
            Some(owner) if owner == target => AssignmentOutcome::SkippedSameExecutive,
            Some(owner) => AssignmentOutcome::Overwritten { previous: owner },
        }
    }

    /// Whether this outcome writes the ownership record and appends history.
    pub fn writes(&self) -> bool {
        !matches!(self, AssignmentOutcome::SkippedSameExecutive)
    }

    /// Previous owner to record on the history event.
    pub fn previous_owner(&self) -> Option<ExecutiveId> {
        match self {
            AssignmentOutcome::Overwritten { previous } => Some(*previous),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_covers_all_branches() {
        let target = ExecutiveId::new();
        let other = ExecutiveId::new();

        assert_eq!(
            AssignmentOutcome::decide(None, target),
            AssignmentOutcome::NewlyAssigned
        );
        assert_eq!(
            AssignmentOutcome::decide(Some(target), target),
            AssignmentOutcome::SkippedSameExecutive
        );
        assert_eq!(
            AssignmentOutcome::decide(Some(other), target),
            AssignmentOutcome::Overwritten { previous: other }
        );
    }

    #[test]
    fn test_skip_never_writes() {
        assert!(!AssignmentOutcome::SkippedSameExecutive.writes());
        assert!(AssignmentOutcome::NewlyAssigned.writes());
        assert_eq!(AssignmentOutcome::NewlyAssigned.previous_owner(), None);
    }
}
