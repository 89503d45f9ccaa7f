use super::ReconcileError;
use crate::core::{Account, Address};
use crate::storage::AccountTransaction;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};

/// Soft-delete every locked row whose address is not in `batch_keys`.
///
/// Only rows this transaction already holds are considered. A row another
/// run committed after the lock step is left for the next reconciliation.
/// Rows already marked stale are left alone, so repeating a batch does not
/// re-stamp them. Returns the number of rows flipped.
pub async fn mark_stale<T: AccountTransaction>(
    txn: &mut T,
    batch_keys: &BTreeSet<Address>,
    at: DateTime<Utc>,
) -> Result<u64, ReconcileError> {
    let held: HashSet<Address> = txn.held_locks().into_iter().collect();
    let absent = |row: &Account| {
        held.contains(&row.address) && !batch_keys.contains(&row.address) && !row.is_stale()
    };
    let soft_delete = |row: &mut Account| {
        row.is_active = false;
        row.is_deleted = true;
        row.updated_at = at;
    };

    txn.update_where(&absent, &soft_delete)
        .await
        .map_err(ReconcileError::StaleMark)
}
