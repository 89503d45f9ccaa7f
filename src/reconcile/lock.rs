use super::ReconcileError;
use crate::core::{Account, Address};
use crate::storage::AccountTransaction;
use std::collections::BTreeSet;

/// Lock every stored account row, plus the batch keys, in ascending address
/// order.
///
/// Must run before any other write to the table in the same transaction:
/// afterwards the stale and upsert steps only touch rows already held, so a
/// run never waits for a lock while holding a higher one. The stored rows
/// are returned for reporting only.
pub async fn acquire_all<T: AccountTransaction>(
    txn: &mut T,
    batch_keys: &BTreeSet<Address>,
) -> Result<Vec<Account>, ReconcileError> {
    txn.lock_all(batch_keys)
        .await
        .map_err(ReconcileError::LockAcquisition)
}
