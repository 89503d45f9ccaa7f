// ============================================================================
// Reconciliation
// ============================================================================
//
// One reconciliation = one transaction with three ordered steps:
//
//   lock::acquire_all   lock every stored row, ascending by address
//   stale::mark_stale   soft-delete rows missing from the batch
//   upsert::upsert      dedup + sort the batch, insert-or-update it
//
// Both lock-taking steps go in ascending address order, so concurrent runs
// over overlapping rows queue behind each other instead of deadlocking.
//
// ============================================================================

pub mod error;
pub mod lock;
pub mod options;
pub mod stale;
pub mod transaction;
pub mod upsert;

pub use error::{InvalidEntry, ReconcileError, Step};
pub use options::{ConflictResolution, DEFAULT_TIMEOUT, ReconcileOptions};
pub use transaction::{ReconciliationSummary, reconcile};
