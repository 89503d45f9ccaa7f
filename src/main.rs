use account_reconciler::{
    AccountInput, ConflictResolution, ReconcileOptions, Reconciler, StoreConfig, Timestamps,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "account-reconciler")]
#[command(about = "Reconcile a stored account table against an observed batch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply one batch (a JSON array of accounts) to the table in --state
    Reconcile {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        batch: PathBuf,
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
        /// Stamp rows with this RFC 3339 instant instead of the current time
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Keep active/deleted flags of reappearing accounts as stored
        #[arg(long)]
        legacy_merge: bool,
    },
    /// Print the table in --state as JSON
    Show {
        #[arg(long)]
        state: PathBuf,
        /// Include soft-deleted accounts
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Reconcile {
            state,
            batch,
            timeout_ms,
            at,
            legacy_merge,
        } => run_reconcile(&state, &batch, timeout_ms, at, legacy_merge).await,
        Command::Show { state, all } => show(&state, all).await,
    }
}

fn open(state: &Path) -> Result<Reconciler> {
    let config = StoreConfig::new().snapshot_path(state);
    Reconciler::open(config)
        .with_context(|| format!("Failed to open account state '{}'", state.display()))
}

fn read_batch(path: &Path) -> Result<Vec<AccountInput>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Batch '{}' is not a JSON array of accounts", path.display()))
}

async fn run_reconcile(
    state: &Path,
    batch_path: &Path,
    timeout_ms: u64,
    at: Option<DateTime<Utc>>,
    legacy_merge: bool,
) -> Result<()> {
    let reconciler = open(state)?;
    let batch = read_batch(batch_path)?;

    let timestamps = at.map(Timestamps::at).unwrap_or_else(Timestamps::now);
    let mut options = ReconcileOptions::new(timestamps).timeout(Duration::from_millis(timeout_ms));
    if legacy_merge {
        options = options.conflict_resolution(ConflictResolution::legacy());
    }

    let summary = reconciler.run(batch, options).await?;
    reconciler
        .checkpoint()
        .await
        .with_context(|| format!("Failed to write account state '{}'", state.display()))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn show(state: &Path, all: bool) -> Result<()> {
    let reconciler = open(state)?;
    let accounts: Vec<_> = reconciler
        .accounts()
        .await?
        .into_iter()
        .filter(|account| all || !account.is_deleted)
        .collect();

    println!("{}", serde_json::to_string_pretty(&accounts)?);
    Ok(())
}
