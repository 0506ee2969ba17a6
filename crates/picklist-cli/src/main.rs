//! Picklist CLI - Offline sync manager for warehouse pull sessions
//!
//! Inspects the durable local store left behind by the handheld app and
//! retries parked submissions once connectivity is back.

use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use picklist_core::db::{SyncRecordRepository, SyncStore};
use picklist_core::models::{RequestId, SyncRecord};
use picklist_core::remote::{Actor, HttpOrderStore};
use picklist_core::submit::{self, CancelFlag};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "picklist")]
#[command(about = "Inspect and retry offline warehouse pull sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions awaiting submission (pending or failed)
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored session for one request
    Show {
        /// Request ID
        request_id: String,
    },
    /// Retry submission for one request, or every unsynced record
    Retry {
        /// Request ID (omit with --all)
        request_id: Option<String>,
        /// Retry every pending and failed record
        #[arg(long)]
        all: bool,
    },
    /// Drop the stored record for one request
    Clear {
        /// Request ID
        request_id: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] picklist_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid request ID: {0}")]
    InvalidRequestId(String),
    #[error("No stored session for request: {0}")]
    RecordNotFound(String),
    #[error("Provide a request ID or --all")]
    MissingRetryTarget,
    #[error("Refusing to clear without --yes")]
    ConfirmationRequired,
    #[error("PICKLIST_API_URL is not set")]
    MissingApiUrl,
    #[error("PICKLIST_ACTOR is not set")]
    MissingActor,
    #[error("{0} retries failed")]
    RetriesFailed(usize),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("picklist=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Pending { json } => run_pending(json, &db_path).await,
        Commands::Show { request_id } => run_show(&request_id, &db_path).await,
        Commands::Retry { request_id, all } => {
            run_retry(request_id.as_deref(), all, &db_path).await
        }
        Commands::Clear { request_id, yes } => run_clear(&request_id, yes, &db_path).await,
    }
}

#[derive(Debug, Serialize)]
struct PendingListItem {
    request_id: String,
    request_number: String,
    tech_name: String,
    sync_status: String,
    entries: usize,
    pulled: usize,
    last_attempt: Option<i64>,
    error: Option<String>,
}

fn pending_list_item(record: &SyncRecord) -> PendingListItem {
    let progress = record.session.progress();
    PendingListItem {
        request_id: record.session.request_id.to_string(),
        request_number: record.session.meta.request_number.clone(),
        tech_name: record.session.meta.tech_name.clone(),
        sync_status: record.sync_status.to_string(),
        entries: progress.total_count,
        pulled: progress.pulled_count,
        last_attempt: record.last_attempt,
        error: record.error.clone(),
    }
}

async fn run_pending(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let records = SyncStore::open_path(db_path).await?;
    let unsynced = records.list_unsynced().await?;

    if as_json {
        let items: Vec<PendingListItem> = unsynced.iter().map(pending_list_item).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if unsynced.is_empty() {
        println!("No sessions awaiting submission");
        return Ok(());
    }

    let now_ms = Utc::now().timestamp_millis();
    for record in &unsynced {
        let item = pending_list_item(record);
        let attempt = item
            .last_attempt
            .map_or_else(|| "never".to_string(), |ts| format_relative_time(ts, now_ms));
        let mut line = format!(
            "{:<12}  {:<8}  {}/{} pulled  last attempt {}",
            item.request_number, item.sync_status, item.pulled, item.entries, attempt
        );
        if let Some(error) = &item.error {
            line.push_str(&format!("  ({error})"));
        }
        println!("{line}");
    }

    Ok(())
}

async fn run_show(raw_request_id: &str, db_path: &Path) -> Result<(), CliError> {
    let records = SyncStore::open_path(db_path).await?;
    let record = load_record(&records, raw_request_id).await?;
    println!("{}", serde_json::to_string_pretty(&record.session)?);
    Ok(())
}

async fn run_retry(
    raw_request_id: Option<&str>,
    all: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = order_store_from_env()?;
    let actor = actor_from_env()?;
    let records = SyncStore::open_path(db_path).await?;

    let targets: Vec<SyncRecord> = if all {
        records.list_unsynced().await?
    } else if let Some(raw) = raw_request_id {
        vec![load_record(&records, raw).await?]
    } else {
        return Err(CliError::MissingRetryTarget);
    };

    if targets.is_empty() {
        println!("Nothing to retry");
        return Ok(());
    }

    let mut failures = 0_usize;
    for record in targets {
        let mut session = record.session;
        let request_number = session.meta.request_number.clone();
        match submit::submit(&mut session, &store, &records, &actor, &CancelFlag::new()).await {
            Ok(outcome) => {
                if outcome.has_shortages {
                    println!("{request_number}: synced, shortages flagged for review");
                } else {
                    println!("{request_number}: synced");
                }
            }
            Err(error) => {
                failures += 1;
                eprintln!("{request_number}: {error}");
            }
        }
    }

    if failures > 0 {
        return Err(CliError::RetriesFailed(failures));
    }
    Ok(())
}

async fn run_clear(raw_request_id: &str, yes: bool, db_path: &Path) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::ConfirmationRequired);
    }

    let records = SyncStore::open_path(db_path).await?;
    let record = load_record(&records, raw_request_id).await?;
    records.delete(&record.session.request_id).await?;
    println!("{}", record.session.request_id);
    Ok(())
}

async fn load_record(records: &SyncStore, raw: &str) -> Result<SyncRecord, CliError> {
    let request_id: RequestId = raw
        .parse()
        .map_err(|_| CliError::InvalidRequestId(raw.to_string()))?;
    records
        .get(&request_id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(raw.to_string()))
}

fn order_store_from_env() -> Result<HttpOrderStore, CliError> {
    let base_url = env::var("PICKLIST_API_URL").map_err(|_| CliError::MissingApiUrl)?;
    Ok(HttpOrderStore::new(base_url)?)
}

fn actor_from_env() -> Result<Actor, CliError> {
    let actor = env::var("PICKLIST_ACTOR").map_err(|_| CliError::MissingActor)?;
    if actor.trim().is_empty() {
        return Err(CliError::MissingActor);
    }
    Ok(Actor::new(actor.trim().to_string()))
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("PICKLIST_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("picklist")
        .join("picklist.db")
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
