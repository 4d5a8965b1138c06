//! Batch assignment over a transactional backend.

use crate::audit::{self, AuditReport};
use aquisicao_core::{
    AquisicaoResult, AssignmentOutcome, AssignmentSummary, EngineConfig, EntityType, ExecutiveId,
    FilterSnapshot, HistoryEvent, OwnershipRecord, ProspectFilters, ProspectId, StorageError,
    Timestamp, ValidationError,
};
use aquisicao_storage::{
    with_transaction, AssignmentBackend, AssignmentTx, HistoryCursor, HistoryQuery,
};
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tracing::Instrument;

/// Assigns batches of prospects to executives.
///
/// Every batch runs in one transaction: it either commits all of its
/// ownership changes and history events or none of them.
pub struct AssignmentEngine<B: AssignmentBackend + ?Sized> {
    backend: Arc<B>,
    config: EngineConfig,
}

impl<B: AssignmentBackend + ?Sized> Clone for AssignmentEngine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

/// Per-batch values shared by every written record.
struct BatchStamp {
    executive_id: ExecutiveId,
    assigned_at: Timestamp,
    filter_snapshot: FilterSnapshot,
    reference_period: Option<String>,
}

impl BatchStamp {
    fn record_for(&self, prospect_id: &ProspectId) -> OwnershipRecord {
        OwnershipRecord {
            prospect_id: prospect_id.clone(),
            executive_id: self.executive_id,
            assigned_at: self.assigned_at,
            filter_snapshot: self.filter_snapshot.clone(),
            reference_period: self.reference_period.clone(),
        }
    }
}

impl<B: AssignmentBackend + ?Sized> AssignmentEngine<B> {
    /// Create an engine, rejecting an invalid configuration.
    pub fn new(backend: Arc<B>, config: EngineConfig) -> AquisicaoResult<Self> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assign `prospect_ids` to `executive_id`, one decision per occurrence.
    ///
    /// Duplicates are processed in input order and see the batch's own
    /// writes, so a repeated ID is skipped after its first occurrence.
    pub async fn assign_batch(
        &self,
        executive_id: ExecutiveId,
        prospect_ids: &[ProspectId],
        filters: &ProspectFilters,
    ) -> AquisicaoResult<AssignmentSummary> {
        if prospect_ids.len() > self.config.max_batch_size {
            return Err(ValidationError::BatchTooLarge {
                size: prospect_ids.len(),
                limit: self.config.max_batch_size,
            }
            .into());
        }
        filters.validate()?;

        let stamp = BatchStamp {
            executive_id,
            // Microseconds, the precision PostgreSQL stores.
            assigned_at: Utc::now().trunc_subsecs(6),
            filter_snapshot: filters.snapshot()?,
            reference_period: filters.reference_period(),
        };
        let ids = prospect_ids.to_vec();

        let span = tracing::info_span!(
            "assign_batch",
            executive_id = %executive_id,
            batch_size = prospect_ids.len()
        );

        let result = with_transaction(self.backend.as_ref(), move |tx| {
            Box::pin(async move { run_batch(tx, &stamp, &ids).await })
        })
        .instrument(span.clone())
        .await;

        span.in_scope(|| match &result {
            Ok(summary) => tracing::info!(
                total = summary.total,
                newly_assigned = summary.newly_assigned,
                overwritten = summary.overwritten,
                skipped_same_executive = summary.skipped_same_executive,
                "batch committed"
            ),
            Err(err) => tracing::warn!(error = %err, "batch rolled back"),
        });

        result
    }

    /// Current owner of a prospect.
    pub async fn current_owner(
        &self,
        prospect_id: &ProspectId,
    ) -> AquisicaoResult<Option<ExecutiveId>> {
        Ok(self
            .backend
            .ownership_get(prospect_id)
            .await?
            .map(|record| record.executive_id))
    }

    /// Current ownership records, optionally for one executive.
    pub async fn ownership(
        &self,
        executive_id: Option<ExecutiveId>,
    ) -> AquisicaoResult<Vec<OwnershipRecord>> {
        self.backend.ownership_list(executive_id).await
    }

    /// Query over all history using the configured page size.
    pub fn history_query(&self) -> HistoryQuery {
        HistoryQuery::all(self.config.history_page_size)
    }

    /// Lazy newest-first cursor over the ledger.
    pub fn history(&self, query: HistoryQuery) -> HistoryCursor<'_, B> {
        HistoryCursor::new(self.backend.as_ref(), query)
    }

    /// Replay the whole ledger and compare it with the ownership table.
    pub async fn audit(&self) -> AquisicaoResult<AuditReport> {
        let mut events = self.history(self.history_query()).collect_all().await?;
        events.reverse();
        let records = self.backend.ownership_list(None).await?;

        let report = audit::replay(&events, &records);
        if report.is_clean() {
            tracing::info!(
                events = report.events_replayed,
                records = report.records_checked,
                "ledger replay consistent"
            );
        } else {
            tracing::warn!(
                discrepancies = report.discrepancies.len(),
                "ledger replay found discrepancies"
            );
        }
        Ok(report)
    }
}

async fn run_batch(
    tx: &mut dyn AssignmentTx,
    stamp: &BatchStamp,
    prospect_ids: &[ProspectId],
) -> AquisicaoResult<AssignmentSummary> {
    let executive = tx
        .executive_get(stamp.executive_id)
        .await?
        .ok_or_else(|| StorageError::NotFound {
            entity_type: EntityType::Executive,
            id: stamp.executive_id.to_string(),
        })?;
    if !executive.active {
        tracing::warn!(executive = %executive.label(), "assigning to inactive executive");
    }

    if !prospect_ids.is_empty() {
        let mut lock_order = prospect_ids.to_vec();
        lock_order.sort();
        lock_order.dedup();
        tx.lock_prospects(&lock_order).await?;
    }

    let mut summary = AssignmentSummary::default();
    for prospect_id in prospect_ids {
        let current = tx.get_current_owner(prospect_id).await?;
        let outcome = AssignmentOutcome::decide(current, stamp.executive_id);

        if outcome.writes() {
            let record = stamp.record_for(prospect_id);
            tx.upsert_owner(&record).await?;
            tx.append(&HistoryEvent::for_record(&record, outcome.previous_owner()))
                .await?;
        }

        tracing::debug!(prospect_id = %prospect_id, ?outcome, "prospect decided");
        summary.record(outcome);
    }

    Ok(summary)
}
