//! Paged, restartable reads over the history ledger.

use crate::AssignmentBackend;
use aquisicao_core::{AquisicaoResult, ExecutiveId, HistoryEvent, ProspectId};
use std::collections::VecDeque;

/// Position of an event in the ledger. Larger means appended later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerPosition(i64);

impl LedgerPosition {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Which events to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only events assigning to this executive; `None` means all executives.
    pub executive_id: Option<ExecutiveId>,
    /// Only events for this prospect.
    pub prospect_id: Option<ProspectId>,
    /// Events per page, at least 1.
    pub page_size: usize,
}

impl HistoryQuery {
    /// All events, newest first.
    pub fn all(page_size: usize) -> Self {
        Self {
            executive_id: None,
            prospect_id: None,
            page_size: page_size.max(1),
        }
    }

    pub fn for_executive(mut self, executive_id: ExecutiveId) -> Self {
        self.executive_id = Some(executive_id);
        self
    }

    pub fn for_prospect(mut self, prospect_id: ProspectId) -> Self {
        self.prospect_id = Some(prospect_id);
        self
    }

    /// Whether `event` passes this query's filters.
    pub fn matches(&self, event: &HistoryEvent) -> bool {
        self.executive_id
            .map_or(true, |id| event.new_executive_id == id)
            && self
                .prospect_id
                .as_ref()
                .map_or(true, |id| &event.prospect_id == id)
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    /// Where the next page starts; `None` once the ledger is exhausted.
    pub next_before: Option<LedgerPosition>,
}

/// Lazy cursor over the ledger, newest first.
///
/// Pages are fetched on demand. The sequence is finite and can be replayed
/// from the newest event with [`HistoryCursor::restart`]. Events fetched but
/// not yet handed out by [`HistoryCursor::take`] are returned first.
pub struct HistoryCursor<'a, B: AssignmentBackend + ?Sized> {
    backend: &'a B,
    query: HistoryQuery,
    before: Option<LedgerPosition>,
    exhausted: bool,
    pending: VecDeque<HistoryEvent>,
}

impl<'a, B: AssignmentBackend + ?Sized> HistoryCursor<'a, B> {
    pub fn new(backend: &'a B, query: HistoryQuery) -> Self {
        Self {
            backend,
            query,
            before: None,
            exhausted: false,
            pending: VecDeque::new(),
        }
    }

    pub fn query(&self) -> &HistoryQuery {
        &self.query
    }

    /// Fetch the next page, or `None` when no events remain.
    pub async fn next_page(&mut self) -> AquisicaoResult<Option<Vec<HistoryEvent>>> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.drain(..).collect()));
        }
        if self.exhausted {
            return Ok(None);
        }

        let page = self.backend.history_page(&self.query, self.before).await?;
        match page.next_before {
            Some(position) => self.before = Some(position),
            None => self.exhausted = true,
        }

        if page.events.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(Some(page.events))
    }

    /// Start again from the newest event.
    pub fn restart(&mut self) {
        self.before = None;
        self.exhausted = false;
        self.pending.clear();
    }

    /// Drain the remaining pages into one list.
    pub async fn collect_all(mut self) -> AquisicaoResult<Vec<HistoryEvent>> {
        let mut events = Vec::new();
        while let Some(page) = self.next_page().await? {
            events.extend(page);
        }
        Ok(events)
    }

    /// Fetch at most `limit` events from the current position.
    pub async fn take(&mut self, limit: usize) -> AquisicaoResult<Vec<HistoryEvent>> {
        let mut events = Vec::with_capacity(limit.min(self.query.page_size));
        while events.len() < limit {
            match self.next_page().await? {
                Some(page) => events.extend(page),
                None => break,
            }
        }
        if events.len() > limit {
            self.pending.extend(events.drain(limit..));
        }
        Ok(events)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{with_transaction, ExecutiveDirectory, MemoryBackend};
    use aquisicao_core::{Executive, FilterSnapshot, OwnershipRecord};
    use chrono::Utc;

    async fn seed(backend: &MemoryBackend, exec: &Executive, prospects: &[&str]) {
        let records: Vec<OwnershipRecord> = prospects
            .iter()
            .map(|p| OwnershipRecord {
                prospect_id: ProspectId::new(p).unwrap(),
                executive_id: exec.executive_id,
                assigned_at: Utc::now(),
                filter_snapshot: FilterSnapshot::from_raw("{}"),
                reference_period: None,
            })
            .collect();
        with_transaction(backend, move |tx| {
            Box::pin(async move {
                for record in &records {
                    tx.upsert_owner(record).await?;
                    tx.append(&HistoryEvent::for_record(record, None)).await?;
                }
                Ok(())
            })
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cursor_pages_newest_first() {
        let backend = MemoryBackend::new();
        let exec = Executive::new("Ana", "ana@example.com", None);
        backend.executive_insert(&exec).await.unwrap();
        seed(&backend, &exec, &["1", "2", "3", "4", "5"]).await;

        let mut cursor = HistoryCursor::new(&backend, HistoryQuery::all(2));
        let mut seen = Vec::new();
        while let Some(page) = cursor.next_page().await.unwrap() {
            assert!(page.len() <= 2);
            seen.extend(page.into_iter().map(|e| e.prospect_id.to_string()));
        }
        assert_eq!(seen, vec!["5", "4", "3", "2", "1"]);
        assert!(cursor.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_restart_replays_from_newest() {
        let backend = MemoryBackend::new();
        let exec = Executive::new("Ana", "ana@example.com", None);
        backend.executive_insert(&exec).await.unwrap();
        seed(&backend, &exec, &["1", "2", "3"]).await;

        let mut cursor = HistoryCursor::new(&backend, HistoryQuery::all(10));
        let first = cursor.next_page().await.unwrap().unwrap();
        assert!(cursor.next_page().await.unwrap().is_none());

        cursor.restart();
        let again = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_cursor_filters_by_executive() {
        let backend = MemoryBackend::new();
        let ana = Executive::new("Ana", "ana@example.com", None);
        let bruno = Executive::new("Bruno", "bruno@example.com", None);
        backend.executive_insert(&ana).await.unwrap();
        backend.executive_insert(&bruno).await.unwrap();
        seed(&backend, &ana, &["1", "2"]).await;
        seed(&backend, &bruno, &["3"]).await;

        let query = HistoryQuery::all(1).for_executive(ana.executive_id);
        let events = HistoryCursor::new(&backend, query).collect_all().await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.new_executive_id == ana.executive_id));
    }

    #[tokio::test]
    async fn test_take_limits_across_pages() {
        let backend = MemoryBackend::new();
        let exec = Executive::new("Ana", "ana@example.com", None);
        backend.executive_insert(&exec).await.unwrap();
        seed(&backend, &exec, &["1", "2", "3", "4", "5"]).await;

        let mut cursor = HistoryCursor::new(&backend, HistoryQuery::all(2));
        let events = cursor.take(3).await.unwrap();
        let ids: Vec<String> = events.iter().map(|e| e.prospect_id.to_string()).collect();
        assert_eq!(ids, vec!["5", "4", "3"]);
    }

    #[tokio::test]
    async fn test_take_resumes_where_previous_take_stopped() {
        let backend = MemoryBackend::new();
        let exec = Executive::new("Ana", "ana@example.com", None);
        backend.executive_insert(&exec).await.unwrap();
        seed(&backend, &exec, &["1", "2", "3", "4", "5"]).await;

        let ids = |events: Vec<HistoryEvent>| -> Vec<String> {
            events.iter().map(|e| e.prospect_id.to_string()).collect()
        };

        let mut cursor = HistoryCursor::new(&backend, HistoryQuery::all(2));
        assert_eq!(ids(cursor.take(3).await.unwrap()), vec!["5", "4", "3"]);
        assert_eq!(ids(cursor.take(2).await.unwrap()), vec!["2", "1"]);
        assert!(cursor.take(1).await.unwrap().is_empty());

        // Leftovers of a partial take come back through next_page too.
        cursor.restart();
        assert_eq!(ids(cursor.take(1).await.unwrap()), vec!["5"]);
        assert_eq!(ids(cursor.next_page().await.unwrap().unwrap()), vec!["4"]);
        assert_eq!(ids(cursor.next_page().await.unwrap().unwrap()), vec!["3", "2"]);
    }

    #[test]
    fn test_query_page_size_at_least_one() {
        assert_eq!(HistoryQuery::all(0).page_size, 1);
    }
}
