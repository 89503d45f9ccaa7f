use super::Address;
use crate::transaction::TransactionId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Constraint violation on account '{address}': {reason}")]
    ConstraintViolation { address: Address, reason: String },

    #[error("Write-write conflict on account '{0}'")]
    WriteConflict(Address),

    #[error("Transaction {0} is no longer active")]
    TransactionClosed(TransactionId),

    #[error("Timed out after {waited:?} waiting for row lock on '{address}'")]
    LockTimeout { address: Address, waited: Duration },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn constraint(address: &Address, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            address: address.clone(),
            reason: reason.into(),
        }
    }

    /// Key the failure is attached to, when the store reported one.
    pub fn address(&self) -> Option<&Address> {
        match self {
            Self::ConstraintViolation { address, .. } | Self::LockTimeout { address, .. } => {
                Some(address)
            }
            Self::WriteConflict(address) => Some(address),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
