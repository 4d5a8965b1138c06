//! Aquisicao Engine - Prospect Assignment
//!
//! Takes an ordered list of prospect IDs, a target executive and the filter
//! description that produced the list, and records who owns each prospect:
//!
//! - no current owner: create the record, append an event, `newly_assigned`
//! - owned by the target: leave everything untouched, `skipped_same_executive`
//! - owned by someone else: overwrite the record, append an event carrying the
//!   previous owner, `overwritten`
//!
//! A batch is one transaction. Concurrent batches over disjoint prospects
//! never block each other; overlapping batches serialise per prospect and the
//! last to commit owns the prospect.

pub mod audit;
pub mod engine;

pub use audit::{AuditReport, Discrepancy};
pub use engine::AssignmentEngine;
