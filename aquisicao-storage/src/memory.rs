//! In-memory backend.
//!
//! Mirrors the relational backend's semantics closely enough to drive the
//! engine's tests: transactions stage writes privately and publish them at
//! commit, per-prospect locks serialise overlapping batches, and foreign keys
//! to executives are checked on every write.

use crate::{
    AssignmentBackend, AssignmentTx, ExecutiveDirectory, HistoryLedger, HistoryPage,
    HistoryQuery, LedgerPosition, OwnershipStore,
};
use aquisicao_core::{
    AquisicaoResult, EntityType, Executive, ExecutiveId, ExecutiveUpdate, HistoryEvent,
    OwnershipRecord, ProspectId, StorageError, ValidationError,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

/// Storage faults to inject, counted across all transactions of a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fail the Nth ownership upsert (1-based).
    pub fail_on_upsert: Option<usize>,
    /// Fail the Nth history append (1-based).
    pub fail_on_append: Option<usize>,
    /// Fail every commit.
    pub fail_on_commit: bool,
}

impl FaultPlan {
    pub fn upsert(n: usize) -> Self {
        Self {
            fail_on_upsert: Some(n),
            ..Default::default()
        }
    }

    pub fn append(n: usize) -> Self {
        Self {
            fail_on_append: Some(n),
            ..Default::default()
        }
    }

    pub fn commit() -> Self {
        Self {
            fail_on_commit: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct FaultState {
    plan: FaultPlan,
    upserts: usize,
    appends: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    executives: HashMap<ExecutiveId, Executive>,
    ownership: HashMap<ProspectId, OwnershipRecord>,
    /// Ledger; an event's position is its index + 1.
    history: Vec<HistoryEvent>,
}

type LockTable = HashMap<ProspectId, Arc<tokio::sync::Mutex<()>>>;

/// In-memory assignment backend.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    locks: Arc<Mutex<LockTable>>,
    faults: Arc<Mutex<FaultState>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend that fails according to `plan`.
    pub fn with_faults(plan: FaultPlan) -> Self {
        let backend = Self::new();
        backend.set_faults(plan);
        backend
    }

    /// Replace the fault plan and reset its counters.
    pub fn set_faults(&self, plan: FaultPlan) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = FaultState {
                plan,
                ..Default::default()
            };
        }
    }

    /// Number of committed ownership records.
    pub fn ownership_len(&self) -> usize {
        self.state.read().map(|s| s.ownership.len()).unwrap_or(0)
    }

    /// Number of committed history events.
    pub fn history_len(&self) -> usize {
        self.state.read().map(|s| s.history.len()).unwrap_or(0)
    }

    /// Committed ledger, oldest first.
    pub fn history_snapshot(&self) -> AquisicaoResult<Vec<HistoryEvent>> {
        Ok(self.read()?.history.clone())
    }

    fn read(&self) -> AquisicaoResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> AquisicaoResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn executive_exists(&self, id: ExecutiveId) -> AquisicaoResult<bool> {
        Ok(self.read()?.executives.contains_key(&id))
    }

    fn lock_handle(
        &self,
        prospect_id: &ProspectId,
    ) -> AquisicaoResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(locks
            .entry(prospect_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Drop lock table entries that no transaction holds or waits on.
    ///
    /// Waiters clone the handle under the table mutex, so a strong count of 1
    /// means the table owns the only reference.
    fn prune_locks(&self, released: impl IntoIterator<Item = ProspectId>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        for prospect_id in released {
            if locks
                .get(&prospect_id)
                .is_some_and(|handle| Arc::strong_count(handle) == 1)
            {
                locks.remove(&prospect_id);
            }
        }
    }

    fn check_fault(&self, op: FaultOp) -> AquisicaoResult<()> {
        let mut faults = self.faults.lock().map_err(|_| StorageError::LockPoisoned)?;
        let fail = match op {
            FaultOp::Upsert => {
                faults.upserts += 1;
                faults.plan.fail_on_upsert == Some(faults.upserts)
            }
            FaultOp::Append => {
                faults.appends += 1;
                faults.plan.fail_on_append == Some(faults.appends)
            }
            FaultOp::Commit => faults.plan.fail_on_commit,
        };
        if fail {
            return Err(StorageError::Unavailable {
                reason: format!("injected {:?} fault", op),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum FaultOp {
    Upsert,
    Append,
    Commit,
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Open transaction over a [`MemoryBackend`].
///
/// Writes are invisible to other transactions until commit. Dropping the
/// transaction discards them and releases its prospect locks.
pub struct MemoryTx {
    backend: MemoryBackend,
    staged_ownership: HashMap<ProspectId, OwnershipRecord>,
    staged_history: Vec<HistoryEvent>,
    held: HashSet<ProspectId>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl MemoryTx {
    fn new(backend: MemoryBackend) -> Self {
        Self {
            backend,
            staged_ownership: HashMap::new(),
            staged_history: Vec::new(),
            held: HashSet::new(),
            guards: Vec::new(),
        }
    }

    fn release_locks(&mut self) {
        if self.held.is_empty() {
            return;
        }
        self.guards.clear();
        self.backend.prune_locks(self.held.drain());
    }

    fn require_executive(&self, id: ExecutiveId, constraint: &str) -> AquisicaoResult<()> {
        if !self.backend.executive_exists(id)? {
            return Err(StorageError::ConstraintViolation {
                constraint: constraint.to_string(),
                reason: format!("executive {} does not exist", id),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl OwnershipStore for MemoryTx {
    async fn get_current_owner(
        &mut self,
        prospect_id: &ProspectId,
    ) -> AquisicaoResult<Option<ExecutiveId>> {
        if let Some(staged) = self.staged_ownership.get(prospect_id) {
            return Ok(Some(staged.executive_id));
        }
        let state = self.backend.read()?;
        Ok(state.ownership.get(prospect_id).map(|r| r.executive_id))
    }

    async fn upsert_owner(&mut self, record: &OwnershipRecord) -> AquisicaoResult<()> {
        self.backend.check_fault(FaultOp::Upsert)?;
        self.require_executive(record.executive_id, "fk_prospect_ownership_executive")?;
        self.staged_ownership
            .insert(record.prospect_id.clone(), record.clone());
        Ok(())
    }
}

#[async_trait]
impl HistoryLedger for MemoryTx {
    async fn append(&mut self, event: &HistoryEvent) -> AquisicaoResult<()> {
        self.backend.check_fault(FaultOp::Append)?;
        self.require_executive(event.new_executive_id, "fk_ownership_history_executive")?;
        self.staged_history.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AssignmentTx for MemoryTx {
    async fn executive_get(&mut self, id: ExecutiveId) -> AquisicaoResult<Option<Executive>> {
        Ok(self.backend.read()?.executives.get(&id).cloned())
    }

    async fn lock_prospects(&mut self, prospect_ids: &[ProspectId]) -> AquisicaoResult<()> {
        let wanted: BTreeSet<&ProspectId> = prospect_ids
            .iter()
            .filter(|id| !self.held.contains(*id))
            .collect();

        for prospect_id in wanted {
            let handle = self.backend.lock_handle(prospect_id)?;
            let guard = handle.lock_owned().await;
            self.guards.push(guard);
            self.held.insert(prospect_id.clone());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AquisicaoResult<()> {
        let mut this = self;
        this.backend.check_fault(FaultOp::Commit)?;

        let staged_ownership = std::mem::take(&mut this.staged_ownership);
        let staged_history = std::mem::take(&mut this.staged_history);
        let mut state = this.backend.write()?;
        state.ownership.extend(staged_ownership);
        state.history.extend(staged_history);
        drop(state);

        this.release_locks();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AquisicaoResult<()> {
        let mut this = self;
        tracing::debug!(
            staged_records = this.staged_ownership.len(),
            staged_events = this.staged_history.len(),
            "discarding in-memory transaction"
        );
        this.release_locks();
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.release_locks();
    }
}

// ============================================================================
// BACKEND
// ============================================================================

#[async_trait]
impl ExecutiveDirectory for MemoryBackend {
    async fn executive_insert(&self, executive: &Executive) -> AquisicaoResult<()> {
        let mut state = self.write()?;
        if state.executives.contains_key(&executive.executive_id) {
            return Err(StorageError::ConstraintViolation {
                constraint: "executives_pkey".to_string(),
                reason: format!("executive {} already exists", executive.executive_id),
            }
            .into());
        }
        if state.executives.values().any(|e| e.email == executive.email) {
            return Err(StorageError::ConstraintViolation {
                constraint: "uq_executives_email".to_string(),
                reason: format!("email {} already registered", executive.email),
            }
            .into());
        }
        state
            .executives
            .insert(executive.executive_id, executive.clone());
        Ok(())
    }

    async fn executive_get(&self, id: ExecutiveId) -> AquisicaoResult<Option<Executive>> {
        Ok(self.read()?.executives.get(&id).cloned())
    }

    async fn executive_list(&self, active_only: bool) -> AquisicaoResult<Vec<Executive>> {
        let state = self.read()?;
        let mut executives: Vec<Executive> = state
            .executives
            .values()
            .filter(|e| !active_only || e.active)
            .cloned()
            .collect();
        executives.sort_by(|a, b| a.name.cmp(&b.name).then(a.executive_id.cmp(&b.executive_id)));
        Ok(executives)
    }

    async fn executive_update(
        &self,
        id: ExecutiveId,
        update: ExecutiveUpdate,
    ) -> AquisicaoResult<Executive> {
        let mut state = self.write()?;
        if let Some(email) = &update.email {
            if state
                .executives
                .values()
                .any(|e| e.executive_id != id && &e.email == email)
            {
                return Err(StorageError::ConstraintViolation {
                    constraint: "uq_executives_email".to_string(),
                    reason: format!("email {} already registered", email),
                }
                .into());
            }
        }

        let executive = state
            .executives
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity_type: EntityType::Executive,
                id: id.to_string(),
            })?;
        executive.apply(update);
        Ok(executive.clone())
    }
}

#[async_trait]
impl AssignmentBackend for MemoryBackend {
    async fn begin(&self) -> AquisicaoResult<Box<dyn AssignmentTx>> {
        Ok(Box::new(MemoryTx::new(self.clone())))
    }

    async fn ownership_get(
        &self,
        prospect_id: &ProspectId,
    ) -> AquisicaoResult<Option<OwnershipRecord>> {
        Ok(self.read()?.ownership.get(prospect_id).cloned())
    }

    async fn ownership_list(
        &self,
        executive_id: Option<ExecutiveId>,
    ) -> AquisicaoResult<Vec<OwnershipRecord>> {
        let state = self.read()?;
        let mut records: Vec<OwnershipRecord> = state
            .ownership
            .values()
            .filter(|r| executive_id.map_or(true, |id| r.executive_id == id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.prospect_id.cmp(&b.prospect_id));
        Ok(records)
    }

    async fn history_page(
        &self,
        query: &HistoryQuery,
        before: Option<LedgerPosition>,
    ) -> AquisicaoResult<HistoryPage> {
        if query.page_size == 0 {
            return Err(ValidationError::InvalidValue {
                field: "page_size".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        let state = self.read()?;
        let upper = before.map_or(state.history.len() as i64, |p| p.value() - 1);
        let mut events = Vec::with_capacity(query.page_size);
        let mut last_position = None;

        for (index, event) in state.history.iter().enumerate().rev() {
            let position = index as i64 + 1;
            if position > upper || !query.matches(event) {
                continue;
            }
            events.push(event.clone());
            last_position = Some(LedgerPosition::new(position));
            if events.len() == query.page_size {
                break;
            }
        }

        let next_before = if events.len() == query.page_size {
            last_position
        } else {
            None
        };
        Ok(HistoryPage {
            events,
            next_before,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aquisicao_core::{AquisicaoError, FilterSnapshot};
    use chrono::Utc;
    use std::time::Duration;

    fn record(prospect: &str, executive_id: ExecutiveId) -> OwnershipRecord {
        OwnershipRecord {
            prospect_id: ProspectId::new(prospect).unwrap(),
            executive_id,
            assigned_at: Utc::now(),
            filter_snapshot: FilterSnapshot::from_raw("{}"),
            reference_period: None,
        }
    }

    async fn backend_with_exec() -> (MemoryBackend, Executive) {
        let backend = MemoryBackend::new();
        let exec = Executive::new("Ana", "ana@example.com", None);
        backend.executive_insert(&exec).await.unwrap();
        (backend, exec)
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let (backend, exec) = backend_with_exec().await;
        let rec = record("111", exec.executive_id);

        let mut tx = backend.begin().await.unwrap();
        tx.upsert_owner(&rec).await.unwrap();

        // Own writes are visible inside the transaction.
        assert_eq!(
            tx.get_current_owner(&rec.prospect_id).await.unwrap(),
            Some(exec.executive_id)
        );
        // Not outside it.
        assert_eq!(backend.ownership_get(&rec.prospect_id).await.unwrap(), None);

        tx.commit().await.unwrap();
        assert_eq!(
            backend.ownership_get(&rec.prospect_id).await.unwrap(),
            Some(rec)
        );
    }

    #[tokio::test]
    async fn test_drop_discards_writes() {
        let (backend, exec) = backend_with_exec().await;
        let rec = record("111", exec.executive_id);
        {
            let mut tx = backend.begin().await.unwrap();
            tx.upsert_owner(&rec).await.unwrap();
            tx.append(&HistoryEvent::for_record(&rec, None)).await.unwrap();
        }
        assert_eq!(backend.ownership_len(), 0);
        assert_eq!(backend.history_len(), 0);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_single_record() {
        let (backend, ana) = backend_with_exec().await;
        let bruno = Executive::new("Bruno", "bruno@example.com", None);
        backend.executive_insert(&bruno).await.unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.upsert_owner(&record("111", ana.executive_id)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.upsert_owner(&record("111", bruno.executive_id)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(backend.ownership_len(), 1);
        let stored = backend
            .ownership_get(&ProspectId::new("111").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.executive_id, bruno.executive_id);
    }

    #[tokio::test]
    async fn test_unknown_executive_is_constraint_violation() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let err = tx
            .upsert_owner(&record("111", ExecutiveId::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AquisicaoError::Storage(StorageError::ConstraintViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_history_content_accepted() {
        let (backend, exec) = backend_with_exec().await;
        let rec = record("111", exec.executive_id);
        let event = HistoryEvent::for_record(&rec, None);

        let mut tx = backend.begin().await.unwrap();
        tx.append(&event).await.unwrap();
        tx.append(&event).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(backend.history_len(), 2);
    }

    #[tokio::test]
    async fn test_fault_plan_fails_nth_upsert() {
        let (backend, exec) = backend_with_exec().await;
        backend.set_faults(FaultPlan::upsert(2));

        let mut tx = backend.begin().await.unwrap();
        tx.upsert_owner(&record("1", exec.executive_id)).await.unwrap();
        let err = tx
            .upsert_owner(&record("2", exec.executive_id))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_commit_fault_leaves_state_untouched() {
        let (backend, exec) = backend_with_exec().await;
        backend.set_faults(FaultPlan::commit());

        let mut tx = backend.begin().await.unwrap();
        tx.upsert_owner(&record("1", exec.executive_id)).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(backend.ownership_len(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_locks_wait_for_commit() {
        let (backend, exec) = backend_with_exec().await;
        let id = ProspectId::new("111").unwrap();

        let mut first = backend.begin().await.unwrap();
        first.lock_prospects(&[id.clone()]).await.unwrap();

        let contender = backend.clone();
        let contender_id = id.clone();
        let waiter = tokio::spawn(async move {
            let mut second = contender.begin().await.unwrap();
            second.lock_prospects(&[contender_id.clone()]).await.unwrap();
            let owner = second.get_current_owner(&contender_id).await.unwrap();
            second.rollback().await.unwrap();
            owner
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.upsert_owner(&record("111", exec.executive_id)).await.unwrap();
        first.commit().await.unwrap();

        // The waiter sees the committed owner once the lock is released.
        assert_eq!(waiter.await.unwrap(), Some(exec.executive_id));
    }

    #[tokio::test]
    async fn test_disjoint_locks_do_not_block() {
        let (backend, _exec) = backend_with_exec().await;

        let mut first = backend.begin().await.unwrap();
        first
            .lock_prospects(&[ProspectId::new("1").unwrap()])
            .await
            .unwrap();

        let mut second = backend.begin().await.unwrap();
        tokio::time::timeout(
            Duration::from_millis(200),
            second.lock_prospects(&[ProspectId::new("2").unwrap()]),
        )
        .await
        .expect("disjoint lock should not wait")
        .unwrap();
    }

    #[tokio::test]
    async fn test_relocking_held_prospect_is_noop() {
        let (backend, _exec) = backend_with_exec().await;
        let id = ProspectId::new("1").unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.lock_prospects(&[id.clone(), id.clone()]).await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), tx.lock_prospects(&[id]))
            .await
            .expect("re-lock should not deadlock")
            .unwrap();
    }

    fn lock_table_len(backend: &MemoryBackend) -> usize {
        backend.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_finished_transactions_leave_no_lock_entries() {
        let (backend, exec) = backend_with_exec().await;

        for i in 0..1000 {
            let mut tx = backend.begin().await.unwrap();
            tx.lock_prospects(&[ProspectId::new(format!("p{}", i)).unwrap()])
                .await
                .unwrap();
            tx.rollback().await.unwrap();
        }
        assert_eq!(lock_table_len(&backend), 0);

        let mut tx = backend.begin().await.unwrap();
        tx.lock_prospects(&[ProspectId::new("111").unwrap()])
            .await
            .unwrap();
        tx.upsert_owner(&record("111", exec.executive_id)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(lock_table_len(&backend), 0);

        {
            let mut tx = backend.begin().await.unwrap();
            tx.lock_prospects(&[ProspectId::new("222").unwrap()])
                .await
                .unwrap();
            assert_eq!(lock_table_len(&backend), 1);
        }
        assert_eq!(lock_table_len(&backend), 0);
    }

    #[tokio::test]
    async fn test_lock_entry_kept_while_contended() {
        let (backend, _exec) = backend_with_exec().await;
        let id = ProspectId::new("111").unwrap();

        let mut first = backend.begin().await.unwrap();
        first.lock_prospects(&[id.clone()]).await.unwrap();

        let contender = backend.clone();
        let contender_id = id.clone();
        let waiter = tokio::spawn(async move {
            let mut second = contender.begin().await.unwrap();
            second.lock_prospects(&[contender_id]).await.unwrap();
            second.rollback().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        first.rollback().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(lock_table_len(&backend), 0);
    }

    #[tokio::test]
    async fn test_executive_email_unique() {
        let (backend, _exec) = backend_with_exec().await;
        let clash = Executive::new("Outra Ana", "ana@example.com", None);
        assert!(backend.executive_insert(&clash).await.is_err());
    }

    #[tokio::test]
    async fn test_executive_update_and_list_active() {
        let (backend, ana) = backend_with_exec().await;
        let bruno = Executive::new("Bruno", "bruno@example.com", None);
        backend.executive_insert(&bruno).await.unwrap();

        let updated = backend
            .executive_update(
                bruno.executive_id,
                ExecutiveUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.active);

        let active = backend.executive_list(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].executive_id, ana.executive_id);
        assert_eq!(backend.executive_list(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_executive_update_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .executive_update(ExecutiveId::new(), ExecutiveUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
