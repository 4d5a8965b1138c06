//! PostgreSQL Backend
//!
//! Connection pooling via deadpool-postgres. Each [`PgTx`] owns one pooled
//! connection for its whole lifetime and drives `BEGIN`/`COMMIT`/`ROLLBACK`
//! itself, so the transaction can be boxed behind [`AssignmentTx`].
//!
//! A transaction dropped before commit or rollback detaches its connection
//! from the pool and closes it; the server then aborts the open transaction.

use crate::{
    AssignmentBackend, AssignmentTx, ExecutiveDirectory, HistoryLedger, HistoryPage,
    HistoryQuery, LedgerPosition, OwnershipStore,
};
use aquisicao_core::{
    AquisicaoError, AquisicaoResult, ConfigError, EntityType, EventId, Executive, ExecutiveId,
    ExecutiveUpdate, FilterSnapshot, HistoryEvent, OwnershipRecord, ProspectId, StorageError,
};
use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
    Timeouts,
};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

const SCHEMA: &str = include_str!("schema.sql");

/// Advisory lock key serialising concurrent migrations.
const MIGRATION_LOCK_KEY: i64 = 0x6171_7569_7369;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait, create and recycle timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "aquisicao".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Override fields from `AQUISICAO_DB_*` variables that are set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("AQUISICAO_DB_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("AQUISICAO_DB_PORT") {
            self.port = port;
        }
        if let Ok(dbname) = std::env::var("AQUISICAO_DB_NAME") {
            self.dbname = dbname;
        }
        if let Ok(user) = std::env::var("AQUISICAO_DB_USER") {
            self.user = user;
        }
        if let Ok(password) = std::env::var("AQUISICAO_DB_PASSWORD") {
            self.password = password;
        }
        if let Some(max_size) = env_parse("AQUISICAO_DB_POOL_SIZE") {
            self.max_size = max_size;
        }
        if let Some(secs) = env_parse("AQUISICAO_DB_TIMEOUT") {
            self.timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> AquisicaoResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ConfigError::InvalidValue {
                field: "database".to_string(),
                value: format!("{}:{}/{}", self.host, self.port, self.dbname),
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Map a driver error onto the storage taxonomy.
pub(crate) fn pg_error(err: tokio_postgres::Error) -> AquisicaoError {
    if let Some(db) = err.as_db_error() {
        let code = db.code();
        if *code == SqlState::UNIQUE_VIOLATION
            || *code == SqlState::FOREIGN_KEY_VIOLATION
            || *code == SqlState::CHECK_VIOLATION
            || *code == SqlState::NOT_NULL_VIOLATION
            || *code == SqlState::RESTRICT_VIOLATION
        {
            return StorageError::ConstraintViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
                reason: db.message().to_string(),
            }
            .into();
        }
        if *code == SqlState::T_R_DEADLOCK_DETECTED
            || *code == SqlState::T_R_SERIALIZATION_FAILURE
        {
            tracing::warn!(code = code.code(), error = %db, "retryable database conflict");
            return StorageError::Unavailable {
                reason: db.message().to_string(),
            }
            .into();
        }
    }

    if err.is_closed() {
        tracing::error!(error = %err, "database connection closed");
        return StorageError::Unavailable {
            reason: err.to_string(),
        }
        .into();
    }

    tracing::error!(error = %err, "database error");
    StorageError::TransactionFailed {
        reason: err.to_string(),
    }
    .into()
}

fn pool_error(err: PoolError) -> AquisicaoError {
    match err {
        PoolError::Backend(e) => pg_error(e),
        other => {
            tracing::error!(error = %other, "connection pool error");
            StorageError::Unavailable {
                reason: other.to_string(),
            }
            .into()
        }
    }
}

fn finished() -> AquisicaoError {
    StorageError::TransactionFailed {
        reason: "transaction already finished".to_string(),
    }
    .into()
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

const EXECUTIVE_COLUMNS: &str =
    "executive_id, name, email, region, active, created_at, updated_at";
const OWNERSHIP_COLUMNS: &str =
    "prospect_id, executive_id, assigned_at, filter_snapshot, reference_period";
const HISTORY_COLUMNS: &str = "seq, event_id, prospect_id, new_executive_id, \
     previous_executive_id, occurred_at, filter_snapshot, reference_period";

fn executive_from_row(row: &Row) -> AquisicaoResult<Executive> {
    Ok(Executive {
        executive_id: ExecutiveId::from_uuid(row.try_get("executive_id").map_err(pg_error)?),
        name: row.try_get("name").map_err(pg_error)?,
        email: row.try_get("email").map_err(pg_error)?,
        region: row.try_get("region").map_err(pg_error)?,
        active: row.try_get("active").map_err(pg_error)?,
        created_at: row.try_get("created_at").map_err(pg_error)?,
        updated_at: row.try_get("updated_at").map_err(pg_error)?,
    })
}

fn ownership_from_row(row: &Row) -> AquisicaoResult<OwnershipRecord> {
    let prospect_id: String = row.try_get("prospect_id").map_err(pg_error)?;
    let snapshot: String = row.try_get("filter_snapshot").map_err(pg_error)?;
    Ok(OwnershipRecord {
        prospect_id: ProspectId::new(prospect_id)?,
        executive_id: ExecutiveId::from_uuid(row.try_get("executive_id").map_err(pg_error)?),
        assigned_at: row.try_get("assigned_at").map_err(pg_error)?,
        filter_snapshot: FilterSnapshot::from_raw(snapshot),
        reference_period: row.try_get("reference_period").map_err(pg_error)?,
    })
}

fn history_from_row(row: &Row) -> AquisicaoResult<(LedgerPosition, HistoryEvent)> {
    let seq: i64 = row.try_get("seq").map_err(pg_error)?;
    let prospect_id: String = row.try_get("prospect_id").map_err(pg_error)?;
    let previous: Option<uuid::Uuid> = row.try_get("previous_executive_id").map_err(pg_error)?;
    let snapshot: String = row.try_get("filter_snapshot").map_err(pg_error)?;
    let event = HistoryEvent {
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(pg_error)?),
        prospect_id: ProspectId::new(prospect_id)?,
        new_executive_id: ExecutiveId::from_uuid(
            row.try_get("new_executive_id").map_err(pg_error)?,
        ),
        previous_executive_id: previous.map(ExecutiveId::from_uuid),
        occurred_at: row.try_get("occurred_at").map_err(pg_error)?,
        filter_snapshot: FilterSnapshot::from_raw(snapshot),
        reference_period: row.try_get("reference_period").map_err(pg_error)?,
    };
    Ok((LedgerPosition::new(seq), event))
}

// ============================================================================
// BACKEND
// ============================================================================

/// PostgreSQL-backed assignment storage.
#[derive(Clone)]
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Create a backend over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a backend from configuration.
    pub fn from_config(config: &DbConfig) -> AquisicaoResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Apply the schema. Safe to run repeatedly and concurrently.
    pub async fn migrate(&self) -> AquisicaoResult<()> {
        let conn = self.connection().await?;
        let script = format!(
            "BEGIN; SELECT pg_advisory_xact_lock({MIGRATION_LOCK_KEY}); {SCHEMA} COMMIT;"
        );
        if let Err(err) = conn.batch_execute(&script).await {
            let _ = conn.batch_execute("ROLLBACK").await;
            return Err(pg_error(err));
        }
        tracing::info!("schema migrated");
        Ok(())
    }

    async fn connection(&self) -> AquisicaoResult<Object> {
        self.pool.get().await.map_err(pool_error)
    }
}

#[async_trait]
impl ExecutiveDirectory for PgBackend {
    async fn executive_insert(&self, executive: &Executive) -> AquisicaoResult<()> {
        let conn = self.connection().await?;
        let sql = format!(
            "INSERT INTO executives ({EXECUTIVE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        conn.execute(
            sql.as_str(),
            &[
                &executive.executive_id.as_uuid(),
                &executive.name,
                &executive.email,
                &executive.region,
                &executive.active,
                &executive.created_at,
                &executive.updated_at,
            ],
        )
        .await
        .map_err(pg_error)?;
        Ok(())
    }

    async fn executive_get(&self, id: ExecutiveId) -> AquisicaoResult<Option<Executive>> {
        let conn = self.connection().await?;
        let sql = format!("SELECT {EXECUTIVE_COLUMNS} FROM executives WHERE executive_id = $1");
        let row = conn
            .query_opt(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(pg_error)?;
        row.as_ref().map(executive_from_row).transpose()
    }

    async fn executive_list(&self, active_only: bool) -> AquisicaoResult<Vec<Executive>> {
        let conn = self.connection().await?;
        let sql = format!(
            "SELECT {EXECUTIVE_COLUMNS} FROM executives \
             WHERE (NOT $1::boolean OR active) ORDER BY name, executive_id"
        );
        let rows = conn
            .query(sql.as_str(), &[&active_only])
            .await
            .map_err(pg_error)?;
        rows.iter().map(executive_from_row).collect()
    }

    async fn executive_update(
        &self,
        id: ExecutiveId,
        update: ExecutiveUpdate,
    ) -> AquisicaoResult<Executive> {
        let conn = self.connection().await?;
        let sql = format!(
            "UPDATE executives SET \
                 name = COALESCE($2::text, name), \
                 email = COALESCE($3::text, email), \
                 region = CASE WHEN $4::boolean THEN $5::text ELSE region END, \
                 active = COALESCE($6::boolean, active), \
                 updated_at = now() \
             WHERE executive_id = $1 \
             RETURNING {EXECUTIVE_COLUMNS}"
        );
        let set_region = update.region.is_some();
        let region = update.region.flatten();
        let row = conn
            .query_opt(
                sql.as_str(),
                &[
                    &id.as_uuid(),
                    &update.name,
                    &update.email,
                    &set_region,
                    &region,
                    &update.active,
                ],
            )
            .await
            .map_err(pg_error)?;

        match row {
            Some(row) => executive_from_row(&row),
            None => Err(StorageError::NotFound {
                entity_type: EntityType::Executive,
                id: id.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl AssignmentBackend for PgBackend {
    async fn begin(&self) -> AquisicaoResult<Box<dyn AssignmentTx>> {
        let conn = self.connection().await?;
        conn.batch_execute("BEGIN ISOLATION LEVEL READ COMMITTED")
            .await
            .map_err(pg_error)?;
        Ok(Box::new(PgTx { conn: Some(conn) }))
    }

    async fn ownership_get(
        &self,
        prospect_id: &ProspectId,
    ) -> AquisicaoResult<Option<OwnershipRecord>> {
        let conn = self.connection().await?;
        let sql =
            format!("SELECT {OWNERSHIP_COLUMNS} FROM prospect_ownership WHERE prospect_id = $1");
        let row = conn
            .query_opt(sql.as_str(), &[&prospect_id.as_str()])
            .await
            .map_err(pg_error)?;
        row.as_ref().map(ownership_from_row).transpose()
    }

    async fn ownership_list(
        &self,
        executive_id: Option<ExecutiveId>,
    ) -> AquisicaoResult<Vec<OwnershipRecord>> {
        let conn = self.connection().await?;
        let sql = format!(
            "SELECT {OWNERSHIP_COLUMNS} FROM prospect_ownership \
             WHERE ($1::uuid IS NULL OR executive_id = $1) ORDER BY prospect_id"
        );
        let executive = executive_id.map(|id| id.as_uuid());
        let rows = conn
            .query(sql.as_str(), &[&executive])
            .await
            .map_err(pg_error)?;
        rows.iter().map(ownership_from_row).collect()
    }

    async fn history_page(
        &self,
        query: &HistoryQuery,
        before: Option<LedgerPosition>,
    ) -> AquisicaoResult<HistoryPage> {
        let conn = self.connection().await?;
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM ownership_history \
             WHERE ($1::uuid IS NULL OR new_executive_id = $1) \
               AND ($2::text IS NULL OR prospect_id = $2) \
               AND ($3::bigint IS NULL OR seq < $3) \
             ORDER BY seq DESC LIMIT $4"
        );
        let executive = query.executive_id.map(|id| id.as_uuid());
        let prospect = query.prospect_id.as_ref().map(|id| id.as_str());
        let before = before.map(|p| p.value());
        let limit = query.page_size.max(1) as i64;

        let rows = conn
            .query(sql.as_str(), &[&executive, &prospect, &before, &limit])
            .await
            .map_err(pg_error)?;

        let mut events = Vec::with_capacity(rows.len());
        let mut last_position = None;
        for row in &rows {
            let (position, event) = history_from_row(row)?;
            last_position = Some(position);
            events.push(event);
        }

        let next_before = if rows.len() as i64 == limit {
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
// TRANSACTION
// ============================================================================

/// Open PostgreSQL transaction holding one pooled connection.
pub struct PgTx {
    conn: Option<Object>,
}

impl PgTx {
    fn conn(&self) -> AquisicaoResult<&Object> {
        self.conn.as_ref().ok_or_else(finished)
    }

    async fn finish(&mut self, statement: &str) -> AquisicaoResult<()> {
        let conn = self.conn.take().ok_or_else(finished)?;
        match conn.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // The session state is unknown; never hand it back to the pool.
                drop(Object::take(conn));
                Err(pg_error(err))
            }
        }
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!("transaction dropped before completion, discarding connection");
            drop(Object::take(conn));
        }
    }
}

#[async_trait]
impl OwnershipStore for PgTx {
    async fn get_current_owner(
        &mut self,
        prospect_id: &ProspectId,
    ) -> AquisicaoResult<Option<ExecutiveId>> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare_cached("SELECT executive_id FROM prospect_ownership WHERE prospect_id = $1")
            .await
            .map_err(pg_error)?;
        let row = conn
            .query_opt(&stmt, &[&prospect_id.as_str()])
            .await
            .map_err(pg_error)?;
        match row {
            Some(row) => Ok(Some(ExecutiveId::from_uuid(
                row.try_get("executive_id").map_err(pg_error)?,
            ))),
            None => Ok(None),
        }
    }

    async fn upsert_owner(&mut self, record: &OwnershipRecord) -> AquisicaoResult<()> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare_cached(
                "INSERT INTO prospect_ownership \
                     (prospect_id, executive_id, assigned_at, filter_snapshot, reference_period) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (prospect_id) DO UPDATE SET \
                     executive_id = EXCLUDED.executive_id, \
                     assigned_at = EXCLUDED.assigned_at, \
                     filter_snapshot = EXCLUDED.filter_snapshot, \
                     reference_period = EXCLUDED.reference_period",
            )
            .await
            .map_err(pg_error)?;
        conn.execute(
            &stmt,
            &[
                &record.prospect_id.as_str(),
                &record.executive_id.as_uuid(),
                &record.assigned_at,
                &record.filter_snapshot.as_str(),
                &record.reference_period,
            ],
        )
        .await
        .map_err(pg_error)?;
        Ok(())
    }
}

#[async_trait]
impl HistoryLedger for PgTx {
    async fn append(&mut self, event: &HistoryEvent) -> AquisicaoResult<()> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare_cached(
                "INSERT INTO ownership_history \
                     (event_id, prospect_id, new_executive_id, previous_executive_id, \
                      occurred_at, filter_snapshot, reference_period) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .await
            .map_err(pg_error)?;
        let previous = event.previous_executive_id.map(|id| id.as_uuid());
        conn.execute(
            &stmt,
            &[
                &event.event_id.as_uuid(),
                &event.prospect_id.as_str(),
                &event.new_executive_id.as_uuid(),
                &previous,
                &event.occurred_at,
                &event.filter_snapshot.as_str(),
                &event.reference_period,
            ],
        )
        .await
        .map_err(pg_error)?;
        Ok(())
    }
}

#[async_trait]
impl AssignmentTx for PgTx {
    async fn executive_get(&mut self, id: ExecutiveId) -> AquisicaoResult<Option<Executive>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {EXECUTIVE_COLUMNS} FROM executives WHERE executive_id = $1");
        let row = conn
            .query_opt(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(pg_error)?;
        row.as_ref().map(executive_from_row).transpose()
    }

    async fn lock_prospects(&mut self, prospect_ids: &[ProspectId]) -> AquisicaoResult<()> {
        if prospect_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn()?;
        let ids: Vec<&str> = prospect_ids.iter().map(|id| id.as_str()).collect();
        // Keys are taken in ascending order so overlapping batches queue
        // instead of deadlocking. The ORDER BY sits on the outer query: a
        // volatile target list is evaluated after the sort. Advisory locks
        // are re-entrant per session.
        conn.execute(
            "SELECT pg_advisory_xact_lock(keys.k) FROM ( \
                 SELECT DISTINCT hashtextextended(id, 0) AS k \
                 FROM unnest($1::text[]) AS t(id) \
             ) AS keys ORDER BY keys.k",
            &[&ids],
        )
        .await
        .map_err(pg_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AquisicaoResult<()> {
        let mut this = self;
        this.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> AquisicaoResult<()> {
        let mut this = self;
        this.finish("ROLLBACK").await
    }
}

// ============================================================================
// TESTS
// ============================================================================
