use crate::core::{AccountField, Address, StoreError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stage of a reconciliation run an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Validate,
    Begin,
    AcquireLocks,
    MarkStale,
    Upsert,
    Commit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Validate => "validate",
            Step::Begin => "begin",
            Step::AcquireLocks => "acquire_locks",
            Step::MarkStale => "mark_stale",
            Step::Upsert => "upsert",
            Step::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// One malformed batch entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntry {
    /// Position in the batch as submitted
    pub index: usize,
    /// `None` when the entry has no usable address
    pub address: Option<Address>,
    pub missing: Vec<AccountField>,
}

impl fmt::Display for InvalidEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            None => write!(f, "entry #{}: missing address", self.index),
            Some(address) => {
                let fields: Vec<&str> = self.missing.iter().map(|field| field.name()).collect();
                write!(f, "entry #{} ({}): missing {}", self.index, address, fields.join(", "))
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid batch: {}", format_entries(.0))]
    Validation(Vec<InvalidEntry>),

    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] StoreError),

    #[error("Lock acquisition failed: {0}")]
    LockAcquisition(#[source] StoreError),

    #[error("Stale marking failed: {0}")]
    StaleMark(#[source] StoreError),

    #[error("Upsert failed: {0}")]
    Upsert(#[source] StoreError),

    #[error("Commit failed: {0}")]
    Commit(#[source] StoreError),

    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

fn format_entries(entries: &[InvalidEntry]) -> String {
    entries
        .iter()
        .map(|entry| entry.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    /// Step that failed; `None` for a timeout, which can strike anywhere.
    pub fn step(&self) -> Option<Step> {
        match self {
            ReconcileError::Validation(_) => Some(Step::Validate),
            ReconcileError::Begin(_) => Some(Step::Begin),
            ReconcileError::LockAcquisition(_) => Some(Step::AcquireLocks),
            ReconcileError::StaleMark(_) => Some(Step::MarkStale),
            ReconcileError::Upsert(_) => Some(Step::Upsert),
            ReconcileError::Commit(_) => Some(Step::Commit),
            ReconcileError::Timeout(_) => None,
        }
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ReconcileError::Begin(e)
            | ReconcileError::LockAcquisition(e)
            | ReconcileError::StaleMark(e)
            | ReconcileError::Upsert(e)
            | ReconcileError::Commit(e) => Some(e),
            ReconcileError::Validation(_) | ReconcileError::Timeout(_) => None,
        }
    }

    /// Conflicting key of a storage constraint violation
    pub fn constraint_address(&self) -> Option<&Address> {
        match self.store_error() {
            Some(StoreError::ConstraintViolation { address, .. }) => Some(address),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReconcileError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_tags() {
        let err = ReconcileError::StaleMark(StoreError::Storage("disk on fire".into()));
        assert_eq!(err.step(), Some(Step::MarkStale));
        assert!(err.to_string().contains("disk on fire"));
        assert!(ReconcileError::Timeout(Duration::from_secs(1)).step().is_none());
    }

    #[test]
    fn test_constraint_address() {
        let err = ReconcileError::Upsert(StoreError::constraint(&Address::from("0xa"), "negative"));
        assert_eq!(err.constraint_address(), Some(&Address::from("0xa")));
        assert!(ReconcileError::Timeout(Duration::ZERO).constraint_address().is_none());
    }

    #[test]
    fn test_validation_message_lists_entries() {
        let err = ReconcileError::Validation(vec![
            InvalidEntry { index: 0, address: None, missing: vec![] },
            InvalidEntry {
                index: 2,
                address: Some(Address::from("0xb")),
                missing: vec![AccountField::Gold, AccountField::Usd],
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid batch: entry #0: missing address; entry #2 (0xb): missing gold, usd"
        );
    }
}
