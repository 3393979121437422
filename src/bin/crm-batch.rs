//! crm-batch CLI: operator interface for bulk lead operations.

use clap::{Args, Parser, Subcommand};
use crm_batch::audit::AuditRecorder;
use crm_batch::batch::{AuditRequest, BatchMutationEngine, DeleteLeads, LogProgress, UpdateLeads};
use crm_batch::config::{BatchSettings, Config};
use crm_batch::db::Db;
use crm_batch::gateway::memory::MemoryGateway;
use crm_batch::ingest::{ImportReport, import_records};
use crm_batch::model::{BatchResult, LeadFilter, LeadPatch, RawRecord, RecordId, WorkingSet};
use crm_batch::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use secrecy::ExposeSecret;
use std::fmt::Display;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crm-batch", about = "Chunked bulk operations on CRM leads")]
struct Cli {
    /// Batch settings TOML file (env CRM_* variables override it)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Upload leads from a JSON array of objects
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Field holding the dedup key (e.g. phone)
        #[arg(long)]
        key: String,
        /// Check the file against an empty in-memory store; touch nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete leads (and their notes)
    Delete {
        #[command(flatten)]
        target: Target,
        /// Actor recorded in the audit log
        #[arg(long)]
        requested_by: String,
        /// Free-form reason stored with the audit entry
        #[arg(long)]
        reason: Option<String>,
    },
    /// Set the grade of leads
    Grade {
        grade: String,
        #[command(flatten)]
        target: Target,
    },
    /// Assign unassigned leads to a counselor
    Assign {
        counselor: String,
        #[command(flatten)]
        target: Target,
    },
    /// Move leads to a different counselor
    Reassign {
        counselor: String,
        #[command(flatten)]
        target: Target,
    },
    /// Show recent audit entries
    Audit {
        /// Maximum entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Which leads a bulk action targets.
#[derive(Args)]
struct Target {
    /// Comma-separated lead IDs
    #[arg(long, value_delimiter = ',', conflicts_with = "count")]
    ids: Vec<String>,
    /// Act on the first N leads of the filtered view (newest first)
    #[arg(long)]
    count: Option<usize>,
    /// View filter: grade
    #[arg(long)]
    filter_grade: Option<String>,
    /// View filter: current counselor
    #[arg(long)]
    filter_counselor: Option<String>,
    /// View filter: substring of the dedup key
    #[arg(long)]
    search: Option<String>,
}

impl Target {
    fn filter(&self) -> LeadFilter {
        LeadFilter {
            grade: self.filter_grade.clone(),
            counselor_id: self.filter_counselor.clone(),
            unassigned: false,
            search: self.search.clone(),
        }
    }

    fn working_set(&self, db: &Db, filter: LeadFilter) -> anyhow::Result<WorkingSet<RecordId>> {
        match self.count {
            Some(n) => Ok(WorkingSet::counted(db.lead_view(filter), n)),
            None if self.ids.is_empty() => anyhow::bail!("pass either --ids or --count"),
            None => {
                let ids = self
                    .ids
                    .iter()
                    .map(|s| {
                        s.parse::<RecordId>()
                            .map_err(|e| anyhow::anyhow!("invalid lead id '{s}': {e}"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(WorkingSet::selected(ids))
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = BatchSettings::load(cli.settings.as_deref())?;

    match cli.command {
        Command::Import {
            file,
            key,
            dry_run: true,
        } => {
            let _guard = init_local_telemetry()?;
            let gateway = MemoryGateway::new(&key);
            let report = import_records(
                &gateway,
                &settings,
                read_records(&file)?,
                &key,
                &LogProgress::new("import"),
            )
            .await?;
            print_import(&report);
            Ok(())
        }
        command => {
            let config = Config::from_env()?;
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "crm-batch".to_string(),
                log_level: config.log_level.clone(),
            })?;
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;
            run_command(&db, &settings, command).await
        }
    }
}

fn init_local_telemetry() -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "crm-batch".to_string(),
        log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
    })?)
}

async fn run_command(db: &Db, settings: &BatchSettings, command: Command) -> anyhow::Result<()> {
    let engine = BatchMutationEngine::from_settings(settings)?;

    match command {
        Command::Migrate => {
            db.health_check().await?;
            println!("Database reachable, migrations applied.");
            Ok(())
        }
        Command::Import { file, key, .. } => {
            let store = db.lead_store(&key);
            let report = import_records(
                &store,
                settings,
                read_records(&file)?,
                &key,
                &LogProgress::new("import"),
            )
            .await?;
            print_import(&report);
            Ok(())
        }
        Command::Delete {
            target,
            requested_by,
            reason,
        } => {
            let store = db.lead_store("");
            let audit_log = db.audit_log();
            let audit = AuditRequest::new(&audit_log, requested_by).context(serde_json::json!({
                "reason": reason,
                "filter": target.filter(),
            }));
            let result = engine
                .run(
                    target.working_set(db, target.filter())?,
                    &DeleteLeads::new(&store),
                    &LogProgress::new("delete"),
                    Some(audit),
                )
                .await?;
            print_result(&result);
            Ok(())
        }
        Command::Grade { grade, target } => {
            update(db, &engine, &target, target.filter(), LeadPatch::grade(grade)).await
        }
        Command::Assign { counselor, target } => {
            let filter = LeadFilter {
                unassigned: true,
                ..target.filter()
            };
            update(
                db,
                &engine,
                &target,
                filter,
                LeadPatch::assign(counselor).if_unassigned(),
            )
            .await
        }
        Command::Reassign { counselor, target } => {
            update(db, &engine, &target, target.filter(), LeadPatch::assign(counselor))
                .await
        }
        Command::Audit { limit } => {
            let entries = db.audit_log().list(limit).await?;
            if entries.is_empty() {
                println!("No audit entries found.");
                return Ok(());
            }

            println!(
                "{:<8}  {:<12}  {:<10}  {:<12}  {:<7}  {:<16}  SUMMARY",
                "ID", "OPERATION", "STATUS", "BY", "TARGETS", "STARTED"
            );
            println!("{}", "-".repeat(100));
            for entry in &entries {
                println!(
                    "{:<8}  {:<12}  {:<10}  {:<12}  {:<7}  {:<16}  {}",
                    &entry.id.to_string()[..8],
                    entry.operation_kind,
                    entry.status,
                    entry.requested_by,
                    entry.target_ids.len(),
                    entry.started_at.format("%Y-%m-%d %H:%M"),
                    entry.outcome_summary
                );
            }
            println!("\n{} entr(ies)", entries.len());
            Ok(())
        }
    }
}

async fn update(
    db: &Db,
    engine: &BatchMutationEngine,
    target: &Target,
    filter: LeadFilter,
    patch: LeadPatch,
) -> anyhow::Result<()> {
    let store = db.lead_store("");
    let result = engine
        .run(
            target.working_set(db, filter)?,
            &UpdateLeads::new(&store, patch),
            &LogProgress::new("update"),
            None,
        )
        .await?;
    print_result(&result);
    Ok(())
}

fn read_records(path: &PathBuf) -> anyhow::Result<Vec<RawRecord>> {
    let content = std::fs::read_to_string(path)?;
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("{} is not a JSON array of objects: {e}", path.display()))?;
    Ok(RawRecord::from_rows(rows))
}

fn print_import(report: &ImportReport) {
    let dedup = &report.dedup;
    println!("Unique:               {}", dedup.unique.len());
    println!("Duplicates in file:   {}", dedup.intra_file_duplicates.len());
    println!("Already in store:     {}", dedup.store_duplicates.len());
    println!("Missing key:          {}", dedup.discarded.len());
    if let Some(warning) = report.warning() {
        println!("WARNING: {warning}");
    }
    for dup in &dedup.intra_file_duplicates {
        println!(
            "  row {} duplicates row {}",
            dup.origin_index + 1,
            dup.first_index + 1
        );
    }
    println!("---");
    print_result(&report.insert);
}

fn print_result<Id: Display>(result: &BatchResult<Id>) {
    println!("{}", result.summary());
    if !result.failed_ids.is_empty() {
        let shown: Vec<String> = result
            .failed_ids
            .iter()
            .take(20)
            .map(|id| id.to_string())
            .collect();
        let more = result.failed_ids.len().saturating_sub(shown.len());
        println!("Failed: {}", shown.join(", "));
        if more > 0 {
            println!("        ... and {more} more");
        }
    }
}
