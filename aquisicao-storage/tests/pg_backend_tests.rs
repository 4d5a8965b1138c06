#![cfg(feature = "db-tests")]
//! PostgreSQL Backend Integration Tests
//!
//! Run against a live database configured through `AQUISICAO_DB_*`:
//!
//! ```text
//! cargo test -p aquisicao-storage --features db-tests
//! ```
//!
//! Every test uses fresh executive emails and prospect IDs so runs can share
//! one database.

use aquisicao_core::{
    AquisicaoError, Executive, ExecutiveId, ExecutiveUpdate, FilterSnapshot, HistoryEvent,
    OwnershipRecord, ProspectId, StorageError,
};
use aquisicao_storage::{
    with_transaction, AssignmentBackend, DbConfig, ExecutiveDirectory, HistoryCursor,
    HistoryQuery, PgBackend,
};
use chrono::Utc;
use uuid::Uuid;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

async fn test_backend() -> PgBackend {
    let backend =
        PgBackend::from_config(&DbConfig::from_env()).expect("Failed to create database pool");
    backend.migrate().await.expect("Failed to migrate schema");
    backend
}

async fn fresh_executive(backend: &PgBackend) -> Executive {
    let tag = Uuid::now_v7().simple().to_string();
    let exec = Executive::new(format!("Exec {tag}"), format!("{tag}@example.com"), None);
    backend.executive_insert(&exec).await.expect("insert executive");
    exec
}

fn fresh_prospect() -> ProspectId {
    ProspectId::new(Uuid::now_v7().simple().to_string()).unwrap()
}

fn record(prospect_id: &ProspectId, executive_id: ExecutiveId) -> OwnershipRecord {
    OwnershipRecord {
        prospect_id: prospect_id.clone(),
        executive_id,
        assigned_at: Utc::now(),
        filter_snapshot: FilterSnapshot::from_raw(r#"{"unidade_federal":["SP"]}"#),
        reference_period: Some("2024-01-01".to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let backend = test_backend().await;
    backend.migrate().await.unwrap();
}

#[tokio::test]
async fn test_commit_publishes_record_and_event() {
    let backend = test_backend().await;
    let exec = fresh_executive(&backend).await;
    let prospect = fresh_prospect();
    let rec = record(&prospect, exec.executive_id);

    let written = rec.clone();
    with_transaction(&backend, move |tx| {
        Box::pin(async move {
            tx.lock_prospects(std::slice::from_ref(&written.prospect_id)).await?;
            tx.upsert_owner(&written).await?;
            tx.append(&HistoryEvent::for_record(&written, None)).await
        })
    })
    .await
    .unwrap();

    let stored = backend.ownership_get(&prospect).await.unwrap().unwrap();
    assert_eq!(stored.executive_id, exec.executive_id);
    assert_eq!(stored.filter_snapshot, rec.filter_snapshot);

    let events = HistoryCursor::new(&backend, HistoryQuery::all(10).for_prospect(prospect))
        .collect_all()
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous_executive_id, None);
}

#[tokio::test]
async fn test_rollback_discards_everything() {
    let backend = test_backend().await;
    let exec = fresh_executive(&backend).await;
    let prospect = fresh_prospect();

    let mut tx = backend.begin().await.unwrap();
    let rec = record(&prospect, exec.executive_id);
    tx.upsert_owner(&rec).await.unwrap();
    tx.append(&HistoryEvent::for_record(&rec, None)).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(backend.ownership_get(&prospect).await.unwrap().is_none());
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let backend = test_backend().await;
    let exec = fresh_executive(&backend).await;
    let prospect = fresh_prospect();

    {
        let mut tx = backend.begin().await.unwrap();
        tx.upsert_owner(&record(&prospect, exec.executive_id))
            .await
            .unwrap();
    }

    assert!(backend.ownership_get(&prospect).await.unwrap().is_none());
}

#[tokio::test]
async fn test_upsert_keeps_one_row_per_prospect() {
    let backend = test_backend().await;
    let ana = fresh_executive(&backend).await;
    let bruno = fresh_executive(&backend).await;
    let prospect = fresh_prospect();

    for exec in [&ana, &bruno] {
        let mut tx = backend.begin().await.unwrap();
        tx.upsert_owner(&record(&prospect, exec.executive_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    let owned_by_ana = backend.ownership_list(Some(ana.executive_id)).await.unwrap();
    assert!(owned_by_ana.iter().all(|r| r.prospect_id != prospect));
    let stored = backend.ownership_get(&prospect).await.unwrap().unwrap();
    assert_eq!(stored.executive_id, bruno.executive_id);
}

#[tokio::test]
async fn test_unknown_executive_is_constraint_violation() {
    let backend = test_backend().await;
    let mut tx = backend.begin().await.unwrap();
    let err = tx
        .upsert_owner(&record(&fresh_prospect(), ExecutiveId::new()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AquisicaoError::Storage(StorageError::ConstraintViolation { .. })
    ));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_history_rows_reject_mutation() {
    let backend = test_backend().await;
    let exec = fresh_executive(&backend).await;
    let prospect = fresh_prospect();

    let rec = record(&prospect, exec.executive_id);
    let mut tx = backend.begin().await.unwrap();
    tx.append(&HistoryEvent::for_record(&rec, None)).await.unwrap();
    tx.commit().await.unwrap();

    let pool = DbConfig::from_env().create_pool().unwrap();
    let conn = pool.get().await.unwrap();
    let err = conn
        .execute(
            "DELETE FROM ownership_history WHERE prospect_id = $1",
            &[&prospect.as_str()],
        )
        .await
        .unwrap_err();
    assert!(err.as_db_error().is_some());
}

#[tokio::test]
async fn test_executive_update_round_trip() {
    let backend = test_backend().await;
    let exec = fresh_executive(&backend).await;

    let updated = backend
        .executive_update(
            exec.executive_id,
            ExecutiveUpdate {
                region: Some(Some("Nordeste".to_string())),
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.region.as_deref(), Some("Nordeste"));
    assert!(!updated.active);
    assert_eq!(updated.email, exec.email);

    let missing = backend
        .executive_update(ExecutiveId::new(), ExecutiveUpdate::default())
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let backend = test_backend().await;
    let exec = fresh_executive(&backend).await;
    let clash = Executive::new("Clash", exec.email.clone(), None);
    assert!(backend.executive_insert(&clash).await.is_err());
}
