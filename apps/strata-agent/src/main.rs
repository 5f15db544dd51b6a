//! # Strata Agent
//!
//! Command-line entry point for the sync engine.
//!
//! ## Commands
//! ```text
//! strata-agent [--config sync.toml] [--db strata.db] <COMMAND>
//!
//!   run      background loop (timer + triggers) until Ctrl-C   [default]
//!   pull     one pull of every registered table
//!   push     one push of the pending journal
//!   status   device, journal and per-table row counts
//!   scope    set the programs and collars this device syncs
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use strata_core::SyncContext;
use strata_db::{Database, DbConfig};
use strata_sync::{
    HttpRpcClient, SyncAgent, SyncConfig, SyncEventEmitter, SyncStatus, SyncTrigger, TableOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "strata-agent", version, about = "Offline-first reference data sync")]
struct Cli {
    /// Path to sync.toml (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database (overrides STRATA_DB_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the sync loop until Ctrl-C.
    Run,
    /// Pull every registered table once.
    Pull,
    /// Push pending changes once.
    Push,
    /// Show sync status.
    Status,
    /// Store the scoping context sent with every push.
    Scope {
        /// Drill program id (repeatable).
        #[arg(long = "program")]
        programs: Vec<String>,

        /// Collar id (repeatable).
        #[arg(long = "collar")]
        collars: Vec<String>,
    },
}

/// Forwards agent events to the log.
struct LogEmitter;

impl SyncEventEmitter for LogEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        tracing::debug!(
            state = %status.state,
            pending = status.pending_changes,
            revision = ?status.last_revision,
            "Sync status"
        );
    }

    fn emit_progress(&self, rows_pulled: usize, changes_pushed: usize) {
        info!(rows_pulled, changes_pushed, "Sync progress");
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        warn!(retryable, "Sync error: {}", message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(SyncConfig::default_config_path);
    let config = SyncConfig::load(config_path.clone())?;

    // First run: persist the generated device id
    if let Some(path) = config_path.filter(|p| !p.exists()) {
        if let Err(e) = config.save(Some(path)) {
            warn!(error = %e, "Could not write initial sync config");
        }
    }

    let db_path = match cli.db.clone() {
        Some(path) => path,
        None => database_path()?,
    };
    let db = Database::new(DbConfig::new(&db_path)).await?;

    info!(
        device_id = %config.device_id(),
        db = %db_path.display(),
        server = %config.server.base_url,
        "Strata agent starting"
    );

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Status => print_status(&config, &db).await,
        Command::Scope { programs, collars } => set_scope(&db, programs, collars).await,
        command => run_sync(command, config, db.clone()).await,
    };

    db.close().await;

    if let Err(e) = &result {
        error!(error = %e, "Strata agent failed");
    }
    result
}

async fn run_sync(command: Command, config: SyncConfig, db: Database) -> Result<(), Box<dyn std::error::Error>> {
    let rpc = Arc::new(HttpRpcClient::new(&config.server)?);
    let agent = SyncAgent::with_emitter(config, db, rpc, Arc::new(LogEmitter))?;

    match command {
        Command::Pull => {
            let report = agent.run_cycle(SyncTrigger::Pull).await?;
            if let Some(pull) = report.pull {
                for (table, outcome) in &pull.tables {
                    match outcome {
                        TableOutcome::Applied(stats) => println!(
                            "{:<28} received {:>6}  written {:>6}  skipped {:>4}",
                            table, stats.received, stats.written, stats.skipped
                        ),
                        TableOutcome::Failed { error } => println!("{:<28} FAILED: {}", table, error),
                        TableOutcome::NotReturned => println!("{:<28} not returned", table),
                    }
                }
            }
        }
        Command::Push => {
            let report = agent.run_cycle(SyncTrigger::Push).await?;
            for outcome in &report.pushes {
                println!(
                    "sent {}  applied {}  conflicts {}  revision {}",
                    outcome.sent,
                    outcome.server_changes_applied,
                    outcome.conflicts,
                    outcome.revision.as_deref().unwrap_or("-")
                );
            }
        }
        _ => {
            let handle = agent.spawn();
            tokio::signal::ctrl_c().await?;
            info!("Ctrl-C received, stopping");
            handle.shutdown().await;
        }
    }

    Ok(())
}

async fn print_status(config: &SyncConfig, db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    let state = db.sync_state();

    println!("device        {} ({})", config.device_id(), config.device.name);
    println!("mode          {}", config.mode());
    println!("server        {}", config.server.base_url);
    println!("pending       {}", db.changes().count_pending().await?);
    let scope = state.sync_context().await?.unwrap_or_else(|| config.default_context());
    println!(
        "scope         programs [{}]  collars [{}]",
        scope.selected_program_ids.join(", "),
        scope.selected_collar_ids.join(", ")
    );
    println!(
        "revision      {}",
        state.last_revision().await?.unwrap_or_else(|| "-".into())
    );
    println!(
        "last pull     {}",
        state.last_pull_at().await?.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into())
    );
    println!(
        "last push     {}",
        state.last_push_at().await?.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into())
    );
    println!();

    let records = db.records();
    for spec in config.registry()?.iter() {
        let name = spec.name.as_str();
        let count = records.count(name).await?;
        let cursor = records.latest_version(name).await?;
        println!("{:<28} {:>8} rows  rv {}", name, count, cursor.encode());
    }

    Ok(())
}

async fn set_scope(db: &Database, programs: Vec<String>, collars: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let context = SyncContext {
        selected_program_ids: programs,
        selected_collar_ids: collars,
    };
    db.sync_state().set_sync_context(&context).await?;

    info!(
        programs = context.selected_program_ids.len(),
        collars = context.selected_collar_ids.len(),
        "Sync scope stored"
    );
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=strata_sync=trace` - Trace the sync engine only
/// - Default: info, debug for strata crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Determines the database file path.
///
/// `STRATA_DB_PATH` wins; otherwise `strata.db` in the platform data
/// directory, which is created if missing.
fn database_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(path) = std::env::var("STRATA_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    let proj_dirs = ProjectDirs::from("com", "strata", "strata").ok_or("Could not determine app data directory")?;

    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;

    Ok(data_dir.join("strata.db"))
}
