// ============================================================================
// Account Reconciler Library
// ============================================================================

pub mod core;
pub mod facade;
pub mod reconcile;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use crate::core::{Account, AccountField, AccountInput, AccountType, Address, StoreError, Timestamps};
pub use facade::Reconciler;
pub use reconcile::{
    ConflictResolution, InvalidEntry, ReconcileError, ReconcileOptions, ReconciliationSummary,
    Step, reconcile,
};
pub use storage::{AccountStore, AccountTransaction, InMemoryAccountStore, StoreConfig};
