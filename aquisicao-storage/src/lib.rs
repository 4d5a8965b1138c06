//! Aquisicao Storage - Ownership Store, History Ledger and Backends
//!
//! Defines the storage abstraction for prospect assignment:
//!
//! - [`OwnershipStore`]: current owner per prospect, unique on prospect ID.
//! - [`HistoryLedger`]: append-only log of ownership changes.
//! - [`AssignmentTx`]: one open unit of work over both, committed or rolled
//!   back as a whole. Dropping an unfinished transaction rolls it back.
//! - [`AssignmentBackend`]: opens transactions and serves the read side.
//! - [`ExecutiveDirectory`]: plain executive records used as foreign keys.
//!
//! Two backends are provided: [`MemoryBackend`] for tests and embedding, and
//! [`PgBackend`] for PostgreSQL.
//!
//! Concurrent batches that assign the same prospect to different executives
//! race; the last transaction to commit decides the final owner. Per-prospect
//! locks only guarantee that each read-decide-write step sees the latest
//! committed owner, never a lost update.

pub mod history;
pub mod memory;
pub mod postgres;

pub use history::{HistoryCursor, HistoryPage, HistoryQuery, LedgerPosition};
pub use memory::{FaultPlan, MemoryBackend};
pub use postgres::{DbConfig, PgBackend};

use aquisicao_core::{
    AquisicaoResult, Executive, ExecutiveId, ExecutiveUpdate, HistoryEvent, OwnershipRecord,
    ProspectId,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;

// ============================================================================
// TRANSACTION-SCOPED STORES
// ============================================================================

/// Current-ownership table as seen from inside a transaction.
#[async_trait]
pub trait OwnershipStore: Send {
    /// Owner of the prospect, including this transaction's own writes.
    async fn get_current_owner(
        &mut self,
        prospect_id: &ProspectId,
    ) -> AquisicaoResult<Option<ExecutiveId>>;

    /// Create the record or overwrite owner, timestamp, snapshot and period in place.
    async fn upsert_owner(&mut self, record: &OwnershipRecord) -> AquisicaoResult<()>;
}

/// Append-only ledger as seen from inside a transaction.
#[async_trait]
pub trait HistoryLedger: Send {
    /// Insert one immutable event. Identical content is never rejected.
    async fn append(&mut self, event: &HistoryEvent) -> AquisicaoResult<()>;
}

/// An open unit of work over the ownership store and the history ledger.
#[async_trait]
pub trait AssignmentTx: OwnershipStore + HistoryLedger {
    /// Look up an executive inside the transaction.
    async fn executive_get(&mut self, id: ExecutiveId) -> AquisicaoResult<Option<Executive>>;

    /// Take write locks on the given prospects until the transaction ends.
    ///
    /// Implementations acquire locks in sorted order so overlapping batches
    /// cannot deadlock each other. Locks on disjoint prospects never conflict.
    async fn lock_prospects(&mut self, prospect_ids: &[ProspectId]) -> AquisicaoResult<()>;

    /// Publish every write made in this transaction.
    async fn commit(self: Box<Self>) -> AquisicaoResult<()>;

    /// Discard every write made in this transaction.
    async fn rollback(self: Box<Self>) -> AquisicaoResult<()>;
}

// ============================================================================
// BACKENDS
// ============================================================================

/// Executive records referenced by ownership and history.
#[async_trait]
pub trait ExecutiveDirectory: Send + Sync {
    /// Insert a new executive. Fails on duplicate ID or email.
    async fn executive_insert(&self, executive: &Executive) -> AquisicaoResult<()>;

    /// Get an executive by ID.
    async fn executive_get(&self, id: ExecutiveId) -> AquisicaoResult<Option<Executive>>;

    /// List executives ordered by name, optionally only active ones.
    async fn executive_list(&self, active_only: bool) -> AquisicaoResult<Vec<Executive>>;

    /// Patch an executive and return the stored result.
    async fn executive_update(
        &self,
        id: ExecutiveId,
        update: ExecutiveUpdate,
    ) -> AquisicaoResult<Executive>;
}

/// Durable home of the ownership table and the history ledger.
#[async_trait]
pub trait AssignmentBackend: ExecutiveDirectory {
    /// Open a new transaction.
    async fn begin(&self) -> AquisicaoResult<Box<dyn AssignmentTx>>;

    /// Committed ownership record for one prospect.
    async fn ownership_get(&self, prospect_id: &ProspectId)
        -> AquisicaoResult<Option<OwnershipRecord>>;

    /// Committed ownership records ordered by prospect ID, optionally for one executive.
    async fn ownership_list(
        &self,
        executive_id: Option<ExecutiveId>,
    ) -> AquisicaoResult<Vec<OwnershipRecord>>;

    /// One page of committed history, newest first, strictly older than `before`.
    async fn history_page(
        &self,
        query: &HistoryQuery,
        before: Option<LedgerPosition>,
    ) -> AquisicaoResult<HistoryPage>;
}

/// Run `work` inside a fresh transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. A
/// failed rollback is logged and the original error is returned.
pub async fn with_transaction<B, T, F>(backend: &B, work: F) -> AquisicaoResult<T>
where
    B: AssignmentBackend + ?Sized,
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn AssignmentTx) -> BoxFuture<'t, AquisicaoResult<T>> + Send,
{
    let mut tx = backend.begin().await?;
    match work(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed after error");
            }
            Err(err)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
