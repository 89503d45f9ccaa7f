use super::{ReconcileError, ReconcileOptions, lock, stale, upsert};
use crate::core::{Account, AccountInput, Address};
use crate::storage::{AccountStore, AccountTransaction};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Outcome of a committed reconciliation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationSummary {
    /// Rows that existed (and were locked) when the run started
    pub locked: Vec<Account>,
    /// Rows newly soft-deleted by this run
    pub marked_stale: u64,
    /// Row images written by the upsert, ascending by address
    pub upserted: Vec<Account>,
    pub inserted: usize,
    pub updated: usize,
}

impl ReconciliationSummary {
    pub fn upserted_addresses(&self) -> Vec<&Address> {
        self.upserted.iter().map(|account| &account.address).collect()
    }
}

/// Converge the account table in `store` onto `batch`.
///
/// Locks every stored row, soft-deletes rows missing from the batch and
/// upserts the batch, all inside one transaction bounded by
/// `options.timeout`. Any failure, timeout or cancellation rolls the whole
/// transaction back.
pub async fn reconcile<S: AccountStore>(
    store: &S,
    batch: Vec<AccountInput>,
    options: ReconcileOptions,
) -> Result<ReconciliationSummary, ReconcileError> {
    upsert::validate(&batch, &options.conflict_resolution)?;

    let txn = store.begin().await.map_err(ReconcileError::Begin)?;
    let id = txn.id();
    info!("{} reconciling batch of {} accounts", id, batch.len());

    // The transaction is owned by the timed future, so expiry drops it and
    // the store discards its writes.
    match tokio::time::timeout(options.timeout, run_in_transaction(txn, batch, &options)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} exceeded {:?}, rolled back", id, options.timeout);
            Err(ReconcileError::Timeout(options.timeout))
        }
    }
}

async fn run_in_transaction<T: AccountTransaction>(
    mut txn: T,
    batch: Vec<AccountInput>,
    options: &ReconcileOptions,
) -> Result<ReconciliationSummary, ReconcileError> {
    let id = txn.id();
    match apply_steps(&mut txn, batch, options).await {
        Ok(summary) => {
            txn.commit().await.map_err(ReconcileError::Commit)?;
            info!(
                "{} committed: {} locked, {} marked stale, {} inserted, {} updated",
                id,
                summary.locked.len(),
                summary.marked_stale,
                summary.inserted,
                summary.updated
            );
            Ok(summary)
        }
        Err(e) => {
            let step = e.step().map(|s| s.to_string()).unwrap_or_default();
            warn!("{} failed at {}: {}", id, step, e);
            if let Err(rollback_err) = txn.rollback().await {
                warn!("{} rollback failed: {}", id, rollback_err);
            }
            Err(e)
        }
    }
}

async fn apply_steps<T: AccountTransaction>(
    txn: &mut T,
    batch: Vec<AccountInput>,
    options: &ReconcileOptions,
) -> Result<ReconciliationSummary, ReconcileError> {
    let batch_keys: BTreeSet<Address> = batch.iter().map(|entry| entry.address.clone()).collect();

    let locked = lock::acquire_all(txn, &batch_keys).await?;
    debug!("{} acquired {} row locks", txn.id(), locked.len());

    let marked_stale = stale::mark_stale(txn, &batch_keys, options.timestamps.updated_at).await?;
    debug!("{} marked {} rows stale", txn.id(), marked_stale);

    let upserted = upsert::upsert(txn, batch, options).await?;
    debug!("{} upserted {} rows", txn.id(), upserted.len());

    let existing: HashSet<&Address> = locked.iter().map(|account| &account.address).collect();
    let updated = upserted
        .iter()
        .filter(|account| existing.contains(&account.address))
        .count();

    Ok(ReconciliationSummary {
        inserted: upserted.len() - updated,
        updated,
        locked,
        marked_stale,
        upserted,
    })
}
