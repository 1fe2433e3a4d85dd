use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use sqlx::SqlitePool;

use flockbook_lib::{
    audit::{self, AuditReport, AuditStatus, CheckSeverity},
    commands,
    config::{AppConfig, ConfigOverrides},
    db,
    error::VALIDATION_INVALID_INPUT,
    logging, migrate,
    model::{FlockScopePayload, RecordIdPayload},
    AppError, CommandOutcome,
};

const EXIT_AUDIT_ERROR: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "flockbook", about = "Flock head-count ledger", version)]
struct Cli {
    /// Ledger database file.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Caller identity recorded on every change.
    #[arg(long = "as", global = true, value_name = "CALLER")]
    caller: Option<String>,

    /// Also write JSON logs to a daily file in this directory.
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance and consistency commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Register and inspect flocks.
    #[command(subcommand)]
    Flock(FlockCommand),
    /// Record, correct and remove deaths.
    #[command(subcommand)]
    Mortality(MortalityCommand),
    /// Track treated cohorts.
    #[command(subcommand)]
    Treatment(TreatmentCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending schema migrations.
    Migrate,
    /// Check every flock, treatment and mortality record for consistency.
    Audit {
        /// Emit the raw JSON audit report instead of the table view.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum FlockCommand {
    Create {
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    Get {
        id: String,
    },
    List,
}

#[derive(Debug, Subcommand)]
enum MortalityCommand {
    Create {
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    Update {
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    Delete {
        id: String,
    },
    Get {
        id: String,
    },
    List {
        #[arg(long, value_name = "FLOCK_ID")]
        flock: String,
    },
}

#[derive(Debug, Subcommand)]
enum TreatmentCommand {
    Create {
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    Update {
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    /// Set absolute still-sick, recovered and deceased counts.
    Status {
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    Delete {
        id: String,
    },
    Get {
        id: String,
    },
    List {
        #[arg(long, value_name = "FLOCK_ID")]
        flock: String,
    },
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = AppConfig::resolve(ConfigOverrides {
        db: cli.db,
        caller: cli.caller,
        log_dir: cli.log_dir,
    })
    .context("resolve configuration")?;
    let _log_guard = logging::init_logging(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async {
        let pool = db::open_sqlite_pool(&config.db_path).await?;
        migrate::apply_migrations(&pool)
            .await
            .context("apply migrations")?;
        let code = dispatch(&pool, config.caller.as_deref(), cli.command).await;
        pool.close().await;
        code
    })
}

async fn dispatch(pool: &SqlitePool, caller: Option<&str>, command: Commands) -> Result<i32> {
    match command {
        Commands::Db(DbCommand::Migrate) => {
            let payload = json!({ "success": true, "message": "Migrations applied." });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(0)
        }
        Commands::Db(DbCommand::Audit { json }) => {
            let report = audit::run_audit(pool).await.context("run ledger audit")?;
            if json {
                let serialized =
                    serde_json::to_string_pretty(&report).context("serialize audit report")?;
                println!("{serialized}");
            } else {
                print_report_table(&report);
            }
            Ok(match report.status {
                AuditStatus::Ok | AuditStatus::Warning => 0,
                AuditStatus::Error => EXIT_AUDIT_ERROR,
            })
        }
        Commands::Flock(command) => match command {
            FlockCommand::Create { data } => match parse_payload(&data) {
                Ok(payload) => emit(&commands::flock_create(pool, caller, payload).await),
                Err(outcome) => emit(&outcome),
            },
            FlockCommand::Get { id } => {
                emit(&commands::flock_get(pool, RecordIdPayload { id }).await)
            }
            FlockCommand::List => emit(&commands::flock_list(pool).await),
        },
        Commands::Mortality(command) => match command {
            MortalityCommand::Create { data } => match parse_payload(&data) {
                Ok(payload) => emit(&commands::mortality_create(pool, caller, payload).await),
                Err(outcome) => emit(&outcome),
            },
            MortalityCommand::Update { data } => match parse_payload(&data) {
                Ok(payload) => emit(&commands::mortality_update(pool, caller, payload).await),
                Err(outcome) => emit(&outcome),
            },
            MortalityCommand::Delete { id } => {
                emit(&commands::mortality_delete(pool, caller, RecordIdPayload { id }).await)
            }
            MortalityCommand::Get { id } => {
                emit(&commands::mortality_get(pool, RecordIdPayload { id }).await)
            }
            MortalityCommand::List { flock } => emit(
                &commands::mortality_list(pool, FlockScopePayload { flock_id: flock }).await,
            ),
        },
        Commands::Treatment(command) => match command {
            TreatmentCommand::Create { data } => match parse_payload(&data) {
                Ok(payload) => emit(&commands::treatment_create(pool, caller, payload).await),
                Err(outcome) => emit(&outcome),
            },
            TreatmentCommand::Update { data } => match parse_payload(&data) {
                Ok(payload) => emit(&commands::treatment_update(pool, caller, payload).await),
                Err(outcome) => emit(&outcome),
            },
            TreatmentCommand::Status { data } => match parse_payload(&data) {
                Ok(payload) => {
                    emit(&commands::treatment_status_update(pool, caller, payload).await)
                }
                Err(outcome) => emit(&outcome),
            },
            TreatmentCommand::Delete { id } => {
                emit(&commands::treatment_delete(pool, caller, RecordIdPayload { id }).await)
            }
            TreatmentCommand::Get { id } => {
                emit(&commands::treatment_get(pool, RecordIdPayload { id }).await)
            }
            TreatmentCommand::List { flock } => emit(
                &commands::treatment_list(pool, FlockScopePayload { flock_id: flock }).await,
            ),
        },
    }
}

/// A payload that does not deserialize is reported like any other invalid input.
fn parse_payload<P: DeserializeOwned>(
    raw: &str,
) -> std::result::Result<P, CommandOutcome<serde_json::Value>> {
    serde_json::from_str(raw).map_err(|err| {
        CommandOutcome::failed(
            AppError::new(VALIDATION_INVALID_INPUT, "The payload could not be read.")
                .with_context("error", err.to_string())
                .with_cause(err),
        )
    })
}

fn emit<T: Serialize>(outcome: &CommandOutcome<T>) -> Result<i32> {
    let serialized = serde_json::to_string_pretty(outcome).context("serialize command outcome")?;
    println!("{serialized}");
    Ok(if outcome.success { 0 } else { 1 })
}

fn status_label(status: AuditStatus) -> &'static str {
    match status {
        AuditStatus::Ok => "ok",
        AuditStatus::Warning => "warning",
        AuditStatus::Error => "error",
    }
}

fn print_report_table(report: &AuditReport) {
    println!("Ledger audit report");
    println!("Status       : {}", status_label(report.status));
    println!("App version  : {} ({})", report.app_version, report.git_commit);
    println!("Generated at : {}", report.generated_at);

    println!("\nChecks:");
    println!(
        "{:<26} {:<9} {:<7} {:>13}  Details",
        "Check", "Severity", "Passed", "Duration (ms)"
    );
    for check in &report.checks {
        let severity = match check.severity {
            CheckSeverity::Hard => "hard",
            CheckSeverity::Advisory => "advisory",
        };
        let passed = if check.passed { "yes" } else { "no" };
        let details = check.details.as_deref().unwrap_or("-");
        println!(
            "{:<26} {:<9} {:<7} {:>13}  {}",
            check.name, severity, passed, check.duration_ms, details
        );
    }

    if report.findings.is_empty() {
        println!("\nFindings: none");
    } else {
        println!("\nFindings:");
        println!("{:<26} {:<18} {:<38}  Message", "Check", "Table", "ID");
        for finding in &report.findings {
            println!(
                "{:<26} {:<18} {:<38}  {}",
                finding.check, finding.table, finding.id, finding.message
            );
        }
    }
}
