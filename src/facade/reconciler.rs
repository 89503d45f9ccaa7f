use crate::core::{Account, AccountInput, Address, StoreError};
use crate::reconcile::{ReconcileError, ReconcileOptions, ReconciliationSummary, reconcile};
use crate::storage::{AccountStore, InMemoryAccountStore, StoreConfig};
use std::sync::Arc;

/// Entry point for import orchestrators.
///
/// Cheap to clone; clones share the same store, so runs started from
/// different tasks contend on the same row locks.
///
/// # Examples
///
/// ```
/// use account_reconciler::{AccountInput, AccountType, ReconcileOptions, Reconciler, Timestamps};
/// use rust_decimal::Decimal;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let reconciler = Reconciler::in_memory();
/// let batch = vec![AccountInput::full(
///     "0xa",
///     AccountType::Normal,
///     Decimal::ONE,
///     Decimal::ZERO,
///     Decimal::ZERO,
///     Decimal::ZERO,
///     Decimal::ZERO,
/// )];
///
/// let summary = reconciler
///     .run(batch, ReconcileOptions::new(Timestamps::now()))
///     .await?;
/// assert_eq!(summary.inserted, 1);
/// # Ok(())
/// # }
/// ```
pub struct Reconciler<S = InMemoryAccountStore> {
    store: Arc<S>,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl Reconciler<InMemoryAccountStore> {
    /// Reconciler over an empty, purely in-memory table
    pub fn in_memory() -> Self {
        Self::new(InMemoryAccountStore::new())
    }

    /// Reconciler over a store restored from (and checkpointed to) the
    /// configured snapshot file
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        Ok(Self::new(InMemoryAccountStore::with_config(config)?))
    }

    /// Persist the committed table, if the store has a snapshot file
    pub async fn checkpoint(&self) -> Result<bool, StoreError> {
        self.store.checkpoint().await
    }
}

impl<S: AccountStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile the stored table against `batch` in one transaction.
    pub async fn run(
        &self,
        batch: Vec<AccountInput>,
        options: ReconcileOptions,
    ) -> Result<ReconciliationSummary, ReconcileError> {
        reconcile(self.store.as_ref(), batch, options).await
    }

    /// All committed rows, deleted ones included
    pub async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.store.list().await
    }

    pub async fn account(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        self.store.get(address).await
    }

    /// Addresses of rows that are not soft-deleted, ascending
    pub async fn live_addresses(&self) -> Result<Vec<Address>, StoreError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|account| !account.is_deleted)
            .map(|account| account.address)
            .collect())
    }
}
