use crate::core::{Account, AccountInput, Address, Result, Timestamps};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Merge rule applied when an upserted key already exists
/// (the `ON CONFLICT ... DO UPDATE SET` clause).
///
/// The store stamps `inserted_at`/`updated_at` on the result itself and
/// rejects results that change the key.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, existing: &Account, incoming: &AccountInput) -> Account;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Account, &AccountInput) -> Account + Send + Sync,
{
    fn resolve(&self, existing: &Account, incoming: &AccountInput) -> Account {
        self(existing, incoming)
    }
}

/// Row filter for bulk updates
pub type RowFilter<'a> = &'a (dyn Fn(&Account) -> bool + Send + Sync);

/// In-place row mutation for bulk updates
pub type RowUpdate<'a> = &'a (dyn Fn(&mut Account) + Send + Sync);

/// Storage backend holding the account table - allows pluggable backends
#[async_trait]
pub trait AccountStore: Send + Sync {
    type Transaction: AccountTransaction;

    /// Start a new transaction
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Committed row for `address`
    async fn get(&self, address: &Address) -> Result<Option<Account>>;

    /// All committed rows, ascending by address
    async fn list(&self) -> Result<Vec<Account>>;
}

/// A unit of work against the account table.
///
/// Row locks taken through a transaction are exclusive and held until
/// `commit` or `rollback` (or until the transaction is dropped, which rolls
/// back). Nothing written through a transaction is visible to other
/// transactions before commit.
#[async_trait]
pub trait AccountTransaction: Send + Sync {
    fn id(&self) -> TransactionId;

    /// Keys this transaction holds row locks on, ascending
    fn held_locks(&self) -> Vec<Address>;

    /// Read every existing row ascending by address, taking an exclusive
    /// lock on each (`SELECT ... ORDER BY address FOR UPDATE`). The keys in
    /// `reserve` are locked in the same ascending pass whether or not they
    /// exist yet.
    ///
    /// Call before writing: once this returns, later writes to the locked
    /// keys never wait.
    async fn lock_all(&mut self, reserve: &BTreeSet<Address>) -> Result<Vec<Account>>;

    /// Row for `address` as seen by this transaction
    async fn get(&self, address: &Address) -> Result<Option<Account>>;

    /// Apply `update` to every row matching `filter`, locking matched rows
    /// in ascending order. Returns the number of rows changed.
    async fn update_where(&mut self, filter: RowFilter<'_>, update: RowUpdate<'_>) -> Result<u64>;

    /// Insert-or-update keyed on address, locking rows in input order.
    /// Each key may appear at most once.
    async fn upsert(
        &mut self,
        rows: Vec<AccountInput>,
        on_conflict: &dyn ConflictResolver,
        timestamps: &Timestamps,
    ) -> Result<Vec<Account>>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
