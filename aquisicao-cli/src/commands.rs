//! Subcommand implementations.

use crate::config::AppConfig;
use crate::OutputFormat;
use aquisicao_core::{
    AquisicaoResult, ConfigError, EntityType, Executive, ExecutiveId, ExecutiveUpdate,
    ProspectFilters, ProspectId, StorageError, ValidationError,
};
use aquisicao_engine::{AssignmentEngine, AuditReport, Discrepancy};
use aquisicao_prospects::{filter_prospects, FileRepository, ProspectRepository};
use aquisicao_storage::{ExecutiveDirectory, PgBackend};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Context {
    config: AppConfig,
    format: OutputFormat,
    backend: Arc<PgBackend>,
    engine: AssignmentEngine<PgBackend>,
}

impl Context {
    /// The pool is created lazily; nothing connects until a command needs it.
    pub fn new(config: AppConfig, format: OutputFormat) -> AquisicaoResult<Self> {
        let backend = Arc::new(PgBackend::from_config(&config.database.to_db_config())?);
        let engine = AssignmentEngine::new(Arc::clone(&backend), config.engine.clone())?;
        Ok(Self {
            config,
            format,
            backend,
            engine,
        })
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> AquisicaoResult<()> {
        match self.format {
            OutputFormat::Json => println!("{}", to_json(value)?),
            OutputFormat::Text => println!("{}", text()),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------------

    pub async fn migrate(&self) -> AquisicaoResult<()> {
        self.backend.migrate().await?;
        self.emit(&serde_json::json!({ "migrated": true }), || {
            "Schema is up to date".to_string()
        })
    }

    // ------------------------------------------------------------------------
    // Executives
    // ------------------------------------------------------------------------

    pub async fn executive_add(
        &self,
        name: String,
        email: String,
        region: Option<String>,
    ) -> AquisicaoResult<()> {
        let name = required("name", &name)?;
        let email = required("email", &email)?;
        let executive = Executive::new(name, email, region);
        self.backend.executive_insert(&executive).await?;
        tracing::info!(executive_id = %executive.executive_id, "executive added");

        self.emit(&executive, || {
            format!("Added {} {}", executive.executive_id, executive.label())
        })
    }

    pub async fn executive_list(&self, active_only: bool) -> AquisicaoResult<()> {
        let executives = self.backend.executive_list(active_only).await?;
        self.emit(&executives, || {
            if executives.is_empty() {
                return "No executives".to_string();
            }
            executives
                .iter()
                .map(|e| {
                    format!(
                        "{}  {}  {}{}",
                        e.executive_id,
                        e.label(),
                        e.region.as_deref().unwrap_or("-"),
                        if e.active { "" } else { "  (inactive)" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    pub async fn executive_update(
        &self,
        id: ExecutiveId,
        name: Option<String>,
        email: Option<String>,
        region: Option<Option<String>>,
    ) -> AquisicaoResult<()> {
        let name = name.map(|n| required("name", &n)).transpose()?;
        let email = email.map(|e| required("email", &e)).transpose()?;
        if name.is_none() && email.is_none() && region.is_none() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "--name, --email, --region or --clear-region".to_string(),
            }
            .into());
        }

        let update = ExecutiveUpdate {
            name,
            email,
            region,
            active: None,
        };
        let executive = self.backend.executive_update(id, update).await?;
        self.emit(&executive, || format!("Updated {}", executive.label()))
    }

    pub async fn executive_set_active(
        &self,
        id: ExecutiveId,
        active: bool,
    ) -> AquisicaoResult<()> {
        let update = ExecutiveUpdate {
            active: Some(active),
            ..Default::default()
        };
        let executive = self.backend.executive_update(id, update).await?;
        tracing::info!(executive_id = %id, active, "executive status changed");
        self.emit(&executive, || {
            let state = if active { "active" } else { "inactive" };
            format!("{} is now {}", executive.label(), state)
        })
    }

    // ------------------------------------------------------------------------
    // Selection and assignment
    // ------------------------------------------------------------------------

    pub fn filter(&self, filters: &str, dataset: Option<PathBuf>) -> AquisicaoResult<()> {
        let filters = parse_filters(filters)?;
        filters.validate()?;
        let table = self.repository(dataset)?.load()?;
        let filtered = filter_prospects(&table, &filters);
        let ids = filtered.prospect_ids();

        let preview = FilterPreview {
            matched: filtered.len(),
            states: filtered.state_count(),
            polygons: filtered.polygon_count(),
            prospect_ids: ids,
        };
        self.emit(&preview, || {
            let mut out = format!(
                "Matched {} prospects across {} states and {} polygons",
                preview.matched, preview.states, preview.polygons
            );
            for id in &preview.prospect_ids {
                out.push('\n');
                out.push_str(id.as_str());
            }
            out
        })
    }

    pub async fn assign(
        &self,
        executive_id: ExecutiveId,
        filters: &str,
        dataset: Option<PathBuf>,
    ) -> AquisicaoResult<()> {
        let filters = parse_filters(filters)?;
        filters.validate()?;
        let table = self.repository(dataset)?.load()?;
        let ids = filter_prospects(&table, &filters).prospect_ids();
        tracing::info!(executive_id = %executive_id, selected = ids.len(), "assigning selection");

        let summary = self.engine.assign_batch(executive_id, &ids, &filters).await?;
        self.emit(&summary, || {
            format!(
                "Total | New | Reassigned | Skipped\n{} | {} | {} | {}",
                summary.total,
                summary.newly_assigned,
                summary.overwritten,
                summary.skipped_same_executive
            )
        })
    }

    fn repository(&self, dataset: Option<PathBuf>) -> AquisicaoResult<FileRepository> {
        let path = dataset
            .or_else(|| self.config.dataset.path.clone())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "dataset.path (or --dataset)".to_string(),
            })?;
        Ok(FileRepository::new(path))
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn ownership(&self, executive_id: Option<ExecutiveId>) -> AquisicaoResult<()> {
        if let Some(id) = executive_id {
            self.require_executive(id).await?;
        }
        let records = self.engine.ownership(executive_id).await?;
        let labels = self.labels().await?;

        self.emit(&records, || {
            if records.is_empty() {
                return "No owned prospects".to_string();
            }
            records
                .iter()
                .map(|r| {
                    format!(
                        "{}  {}  {}  {}",
                        r.prospect_id,
                        label_for(&labels, r.executive_id),
                        r.assigned_at.format("%Y-%m-%d %H:%M:%S"),
                        r.reference_period.as_deref().unwrap_or("-")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    pub async fn history(
        &self,
        executive_id: Option<ExecutiveId>,
        prospect: Option<String>,
        limit: usize,
    ) -> AquisicaoResult<()> {
        let mut query = self.engine.history_query();
        if let Some(id) = executive_id {
            query = query.for_executive(id);
        }
        if let Some(raw) = prospect {
            query = query.for_prospect(ProspectId::new(raw)?);
        }

        let events = self.engine.history(query).take(limit).await?;
        let labels = self.labels().await?;

        self.emit(&events, || {
            if events.is_empty() {
                return "No history".to_string();
            }
            events
                .iter()
                .map(|e| {
                    let from = e
                        .previous_executive_id
                        .map_or_else(|| "-".to_string(), |id| label_for(&labels, id));
                    format!(
                        "{}  {}  {} -> {}",
                        e.occurred_at.format("%Y-%m-%d %H:%M:%S"),
                        e.prospect_id,
                        from,
                        label_for(&labels, e.new_executive_id)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    /// Print the replay report. Returns whether the ledger and the ownership
    /// table agree; a disagreement is reported in the output, not as an error.
    pub async fn audit(&self) -> AquisicaoResult<bool> {
        let report = self.engine.audit().await?;
        let output = AuditOutput::from(&report);
        self.emit(&output, || {
            let mut out = format!(
                "Replayed {} events against {} records: {}",
                report.events_replayed,
                report.records_checked,
                if output.consistent {
                    "consistent".to_string()
                } else {
                    format!("{} discrepancies", report.discrepancies.len())
                }
            );
            for d in &report.discrepancies {
                out.push('\n');
                out.push_str(&describe(d));
            }
            out
        })?;
        Ok(output.consistent)
    }

    async fn require_executive(&self, id: ExecutiveId) -> AquisicaoResult<Executive> {
        self.backend
            .executive_get(id)
            .await?
            .ok_or_else(|| {
                StorageError::NotFound {
                    entity_type: EntityType::Executive,
                    id: id.to_string(),
                }
                .into()
            })
    }

    async fn labels(&self) -> AquisicaoResult<HashMap<ExecutiveId, String>> {
        Ok(self
            .backend
            .executive_list(false)
            .await?
            .into_iter()
            .map(|e| (e.executive_id, e.label()))
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct AuditOutput<'a> {
    consistent: bool,
    #[serde(flatten)]
    report: &'a AuditReport,
}

impl<'a> From<&'a AuditReport> for AuditOutput<'a> {
    fn from(report: &'a AuditReport) -> Self {
        Self {
            consistent: report.is_clean(),
            report,
        }
    }
}

#[derive(Debug, Serialize)]
struct FilterPreview {
    matched: usize,
    states: usize,
    polygons: usize,
    prospect_ids: Vec<ProspectId>,
}

/// Parse inline filter JSON, or read it from a file when prefixed with `@`.
pub fn parse_filters(raw: &str) -> AquisicaoResult<ProspectFilters> {
    let contents = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidValue {
            field: "filters".to_string(),
            reason: format!("cannot read {}: {}", path, e),
        })?,
        None => raw.to_string(),
    };
    serde_json::from_str(&contents).map_err(|e| {
        ValidationError::InvalidValue {
            field: "filters".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn required(field: &str, value: &str) -> AquisicaoResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }
        .into());
    }
    Ok(trimmed.to_string())
}

fn label_for(labels: &HashMap<ExecutiveId, String>, id: ExecutiveId) -> String {
    labels.get(&id).cloned().unwrap_or_else(|| id.to_string())
}

fn to_json<T: Serialize>(value: &T) -> AquisicaoResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        ValidationError::InvalidValue {
            field: "output".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn describe(discrepancy: &Discrepancy) -> String {
    match discrepancy {
        Discrepancy::OwnerMismatch {
            prospect_id,
            replayed,
            current,
        } => format!("{}: ledger says {}, table says {}", prospect_id, replayed, current),
        Discrepancy::MissingRecord {
            prospect_id,
            replayed,
        } => format!("{}: ledger says {}, no ownership record", prospect_id, replayed),
        Discrepancy::UnrecordedOwnership {
            prospect_id,
            current,
        } => format!("{}: owned by {} with no history", prospect_id, current),
        Discrepancy::BrokenChain {
            prospect_id,
            event_id,
            expected_previous,
            recorded_previous,
        } => format!(
            "{}: event {} records previous owner {:?}, expected {:?}",
            prospect_id, event_id, recorded_previous, expected_previous
        ),
    }
}
