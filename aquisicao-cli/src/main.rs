//! Prospect Assignment Command Line Interface
//!
//! # Usage
//!
//! ```bash
//! # Create the schema
//! aquisicao migrate
//!
//! # Register an executive
//! aquisicao executive add --name "Ana Souza" --email ana@example.com --region Sul
//!
//! # Preview a selection, then assign it
//! aquisicao filter --filters '{"unidade_federal": ["SP"]}'
//! aquisicao assign --executive <uuid> --filters @filters.json
//!
//! # Inspect
//! aquisicao ownership --executive <uuid>
//! aquisicao history --limit 20 --format json
//! aquisicao audit
//! ```

mod commands;
mod config;
mod telemetry;

use aquisicao_core::{AquisicaoResult, ExecutiveId};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "aquisicao")]
#[command(version)]
#[command(about = "Assign filtered prospects to sales executives and audit ownership history")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, env = "AQUISICAO_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the database schema
    Migrate,

    /// Manage executives
    Executive {
        #[command(subcommand)]
        action: ExecutiveAction,
    },

    /// Show the prospects matching a filter
    Filter {
        /// Filter JSON, or @path to read it from a file
        #[arg(long)]
        filters: String,

        /// Prospect dataset (.json, .jsonl or .csv); overrides [dataset].path
        #[arg(long)]
        dataset: Option<PathBuf>,
    },

    /// Assign the prospects matching a filter to an executive
    Assign {
        /// Target executive ID
        #[arg(long)]
        executive: ExecutiveId,

        /// Filter JSON, or @path to read it from a file
        #[arg(long)]
        filters: String,

        /// Prospect dataset (.json, .jsonl or .csv); overrides [dataset].path
        #[arg(long)]
        dataset: Option<PathBuf>,
    },

    /// List current ownership
    Ownership {
        /// Only prospects owned by this executive
        #[arg(long)]
        executive: Option<ExecutiveId>,
    },

    /// List ownership changes, newest first
    History {
        /// Only changes assigning to this executive
        #[arg(long)]
        executive: Option<ExecutiveId>,

        /// Only changes for this prospect
        #[arg(long)]
        prospect: Option<String>,

        /// Maximum number of events
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Replay the history ledger against current ownership
    Audit,
}

#[derive(Subcommand)]
enum ExecutiveAction {
    /// Register a new executive
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// List executives
    List {
        /// Only active executives
        #[arg(long)]
        active: bool,
    },

    /// Change name, email or region
    Update {
        id: ExecutiveId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, conflicts_with = "clear_region")]
        region: Option<String>,
        /// Remove the region
        #[arg(long)]
        clear_region: bool,
    },

    /// Mark an executive active
    Activate { id: ExecutiveId },

    /// Mark an executive inactive
    Deactivate { id: ExecutiveId },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli.command, cli.config, cli.format).await;

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            } else {
                eprintln!("error: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}

/// Exit code for a command that completed: failure when it found a problem
/// it already reported on stdout.
fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(
    command: Commands,
    config: Option<PathBuf>,
    format: OutputFormat,
) -> AquisicaoResult<ExitCode> {
    let config = config::AppConfig::load(config.as_deref())?;
    telemetry::init(&config.logging)?;
    let ctx = commands::Context::new(config, format)?;

    let completed = match command {
        Commands::Migrate => ctx.migrate().await,
        Commands::Executive { action } => match action {
            ExecutiveAction::Add {
                name,
                email,
                region,
            } => ctx.executive_add(name, email, region).await,
            ExecutiveAction::List { active } => ctx.executive_list(active).await,
            ExecutiveAction::Update {
                id,
                name,
                email,
                region,
                clear_region,
            } => {
                let region = if clear_region { Some(None) } else { region.map(Some) };
                ctx.executive_update(id, name, email, region).await
            }
            ExecutiveAction::Activate { id } => ctx.executive_set_active(id, true).await,
            ExecutiveAction::Deactivate { id } => ctx.executive_set_active(id, false).await,
        },
        Commands::Filter { filters, dataset } => ctx.filter(&filters, dataset),
        Commands::Assign {
            executive,
            filters,
            dataset,
        } => ctx.assign(executive, &filters, dataset).await,
        Commands::Ownership { executive } => ctx.ownership(executive).await,
        Commands::History {
            executive,
            prospect,
            limit,
        } => ctx.history(executive, prospect, limit).await,
        Commands::Audit => return ctx.audit().await.map(exit_code),
    };
    completed.map(|()| ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_assign() {
        let id = ExecutiveId::new().to_string();
        let cli = Cli::try_parse_from([
            "aquisicao",
            "assign",
            "--executive",
            id.as_str(),
            "--filters",
            r#"{"unidade_federal": ["SP"]}"#,
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Assign { executive, .. } => assert_eq!(executive.to_string(), id),
            _ => panic!("expected assign"),
        }
    }

    #[test]
    fn test_region_and_clear_region_conflict() {
        let id = ExecutiveId::new().to_string();
        let result = Cli::try_parse_from([
            "aquisicao",
            "executive",
            "update",
            id.as_str(),
            "--region",
            "Sul",
            "--clear-region",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_executive_id_rejected() {
        let result = Cli::try_parse_from(["aquisicao", "ownership", "--executive", "nope"]);
        assert!(result.is_err());
    }
}
