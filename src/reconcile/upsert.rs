use super::{ConflictResolution, InvalidEntry, ReconcileError, ReconcileOptions};
use crate::core::{Account, AccountInput, Address};
use crate::storage::AccountTransaction;
use std::collections::BTreeMap;

/// Check every entry up front and report all offenders at once.
pub fn validate(batch: &[AccountInput], resolution: &ConflictResolution) -> Result<(), ReconcileError> {
    let required = resolution.required_fields();
    let invalid: Vec<InvalidEntry> = batch
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            if entry.address.is_blank() {
                return Some(InvalidEntry {
                    index,
                    address: None,
                    missing: Vec::new(),
                });
            }
            let missing: Vec<_> = required
                .iter()
                .copied()
                .filter(|field| !entry.has_field(*field))
                .collect();
            (!missing.is_empty()).then(|| InvalidEntry {
                index,
                address: Some(entry.address.clone()),
                missing,
            })
        })
        .collect();

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::Validation(invalid))
    }
}

/// Collapse repeated addresses (the last entry wins) and order the batch
/// ascending by address, matching the lock acquisition order.
pub fn dedup_sorted(batch: Vec<AccountInput>) -> Vec<AccountInput> {
    let unique: BTreeMap<Address, AccountInput> = batch
        .into_iter()
        .map(|entry| (entry.address.clone(), entry))
        .collect();
    unique.into_values().collect()
}

/// Write the batch as one insert-or-update keyed on address.
pub async fn upsert<T: AccountTransaction>(
    txn: &mut T,
    batch: Vec<AccountInput>,
    options: &ReconcileOptions,
) -> Result<Vec<Account>, ReconcileError> {
    validate(&batch, &options.conflict_resolution)?;
    let rows = dedup_sorted(batch);

    txn.upsert(rows, &options.conflict_resolution, &options.timestamps)
        .await
        .map_err(ReconcileError::Upsert)
}
