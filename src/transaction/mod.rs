// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transaction identity, lifecycle state and the buffered change log used by
// the account store. Row-level locking lives in `storage::locks`.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{TransactionId, TransactionState};
