use super::engine::{AccountStore, AccountTransaction, ConflictResolver, RowFilter, RowUpdate};
use super::locks::{RowGuard, RowLocks};
use super::persistence::{SnapshotManager, TableSnapshot};
use super::{AccountTable, StoreConfig};
use crate::core::{Account, AccountInput, Address, Result, StoreError, Timestamps};
use crate::transaction::{Change, TransactionId, TransactionState};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

struct Shared {
    /// Committed rows. The latch is only held for short reads and for
    /// applying a commit, never while waiting on a row lock.
    table: RwLock<AccountTable>,
    locks: RowLocks,
    config: StoreConfig,
    snapshots: Option<SnapshotManager>,
}

/// Account table kept in memory with row-level locking and buffered,
/// all-or-nothing transactions. Optionally backed by a snapshot file.
#[derive(Clone)]
pub struct InMemoryAccountStore {
    shared: Arc<Shared>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::from_table(AccountTable::new(), StoreConfig::default())
    }

    /// Open a store, restoring the table from the configured snapshot file
    /// if one exists.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(StoreError::Storage)?;

        let table = match &config.snapshot_path {
            Some(path) => match SnapshotManager::new(path).load()? {
                Some(snapshot) => {
                    info!(
                        "Restored {} accounts from snapshot {}",
                        snapshot.metadata.row_count,
                        path.display()
                    );
                    snapshot.into_table()?
                }
                None => AccountTable::new(),
            },
            None => AccountTable::new(),
        };

        Ok(Self::from_table(table, config))
    }

    /// Store pre-populated with `rows`
    pub fn from_accounts(rows: impl IntoIterator<Item = Account>) -> Result<Self> {
        Ok(Self::from_table(AccountTable::from_rows(rows)?, StoreConfig::default()))
    }

    fn from_table(table: AccountTable, config: StoreConfig) -> Self {
        let snapshots = config.snapshot_path.as_ref().map(SnapshotManager::new);
        Self {
            shared: Arc::new(Shared {
                table: RwLock::new(table),
                locks: RowLocks::new(),
                config,
                snapshots,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub async fn row_count(&self) -> usize {
        self.shared.table.read().await.row_count()
    }

    /// Whether any transaction currently holds the row lock on `address`
    pub fn is_row_locked(&self, address: &Address) -> Result<bool> {
        self.shared.locks.is_locked(address)
    }

    /// Write the committed table to the snapshot file. Returns `false` when
    /// the store has no snapshot file configured.
    pub async fn checkpoint(&self) -> Result<bool> {
        let Some(snapshots) = &self.shared.snapshots else {
            return Ok(false);
        };
        let table = self.shared.table.read().await;
        snapshots.save(&TableSnapshot::new(&table))?;
        debug!("Checkpointed {} accounts to {}", table.row_count(), snapshots.path().display());
        Ok(true)
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let txn = MemoryTransaction::new(Arc::clone(&self.shared));
        debug!("Began {}", txn.id);
        Ok(txn)
    }

    async fn get(&self, address: &Address) -> Result<Option<Account>> {
        Ok(self.shared.table.read().await.get(address).cloned())
    }

    async fn list(&self) -> Result<Vec<Account>> {
        Ok(self.shared.table.read().await.scan())
    }
}

/// Transaction over an [`InMemoryAccountStore`].
///
/// Writes go to a private overlay and change log; the shared table only sees
/// them on commit. Row guards are held until the transaction finishes, and
/// dropping an active transaction rolls it back.
pub struct MemoryTransaction {
    id: TransactionId,
    state: TransactionState,
    shared: Arc<Shared>,
    held: BTreeMap<Address, RowGuard>,
    pending: BTreeMap<Address, Account>,
    changes: Vec<Change>,
}

impl MemoryTransaction {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            shared,
            held: BTreeMap::new(),
            pending: BTreeMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(StoreError::TransactionClosed(self.id));
        }
        Ok(())
    }

    async fn lock_row(&mut self, address: &Address) -> Result<()> {
        if self.held.contains_key(address) {
            return Ok(());
        }
        let guard = self
            .shared
            .locks
            .acquire(address, self.shared.config.lock_timeout)
            .await?;
        self.held.insert(address.clone(), guard);
        Ok(())
    }

    async fn visible(&self, address: &Address) -> Option<Account> {
        if let Some(row) = self.pending.get(address) {
            return Some(row.clone());
        }
        self.shared.table.read().await.get(address).cloned()
    }

    fn record(&mut self, change: Change) {
        self.pending
            .insert(change.address().clone(), change.after().clone());
        self.changes.push(change);
    }

    /// Discard buffered writes and release every row lock.
    fn finish(&mut self, state: TransactionState) {
        self.changes.clear();
        self.pending.clear();
        let released = std::mem::take(&mut self.held).len();
        self.state = state;
        debug!("{} {}, released {} row locks", self.id, state, released);
    }
}

#[async_trait]
impl AccountTransaction for MemoryTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn held_locks(&self) -> Vec<Address> {
        self.held.keys().cloned().collect()
    }

    async fn lock_all(&mut self, reserve: &BTreeSet<Address>) -> Result<Vec<Account>> {
        self.ensure_active()?;

        loop {
            let wanted: BTreeSet<Address> = {
                let table = self.shared.table.read().await;
                table
                    .addresses()
                    .into_iter()
                    .chain(self.pending.keys().cloned())
                    .chain(reserve.iter().cloned())
                    .collect()
            };

            // Locking a key below one we already hold would break the global
            // order, so start over from an empty lock set instead.
            let below_held = self.held.keys().next_back().is_some_and(|highest| {
                wanted
                    .iter()
                    .any(|address| address < highest && !self.held.contains_key(address))
            });
            if below_held {
                if !self.changes.is_empty() {
                    return Err(StoreError::LockError(format!(
                        "{} cannot reorder row locks after writing",
                        self.id
                    )));
                }
                debug!("{} releasing {} row locks to relock in order", self.id, self.held.len());
                self.held.clear();
            }

            for address in &wanted {
                self.lock_row(address).await?;
            }

            // Rows committed while we waited may sit below locks we now hold.
            let table = self.shared.table.read().await;
            if table.iter().all(|row| self.held.contains_key(&row.address)) {
                let mut visible: BTreeMap<&Address, &Account> =
                    table.iter().map(|row| (&row.address, row)).collect();
                visible.extend(self.pending.iter());
                let rows: Vec<Account> = visible.into_values().cloned().collect();

                debug!("{} locked {} rows, {} keys held", self.id, rows.len(), self.held.len());
                return Ok(rows);
            }
        }
    }

    async fn get(&self, address: &Address) -> Result<Option<Account>> {
        self.ensure_active()?;
        Ok(self.visible(address).await)
    }

    async fn update_where(&mut self, filter: RowFilter<'_>, update: RowUpdate<'_>) -> Result<u64> {
        self.ensure_active()?;

        let candidates: BTreeSet<Address> = {
            let table = self.shared.table.read().await;
            let committed = table
                .iter()
                .map(|row| self.pending.get(&row.address).unwrap_or(row));
            let inserted = self
                .pending
                .values()
                .filter(|row| !table.contains(&row.address));
            committed
                .chain(inserted)
                .filter(|row| filter(*row))
                .map(|row| row.address.clone())
                .collect()
        };

        let mut changes = Vec::with_capacity(candidates.len());
        for address in &candidates {
            self.lock_row(address).await?;

            let Some(current) = self.visible(address).await else {
                continue;
            };
            if !filter(&current) {
                continue;
            }

            let mut next = current.clone();
            update(&mut next);
            if next.address != current.address {
                return Err(StoreError::constraint(address, "address is immutable"));
            }
            AccountTable::check_constraints(&next)?;
            if next != current {
                changes.push(Change::Update {
                    before: current,
                    after: next,
                });
            }
        }

        let count = changes.len() as u64;
        for change in changes {
            self.record(change);
        }
        debug!("{} updated {} rows", self.id, count);
        Ok(count)
    }

    async fn upsert(
        &mut self,
        rows: Vec<AccountInput>,
        on_conflict: &dyn ConflictResolver,
        timestamps: &Timestamps,
    ) -> Result<Vec<Account>> {
        self.ensure_active()?;

        let mut seen = HashSet::with_capacity(rows.len());
        let mut changes = Vec::with_capacity(rows.len());
        for input in &rows {
            if !seen.insert(input.address.clone()) {
                return Err(StoreError::constraint(
                    &input.address,
                    "upsert cannot affect a row a second time",
                ));
            }

            self.lock_row(&input.address).await?;

            let change = match self.visible(&input.address).await {
                Some(existing) => {
                    let mut merged = on_conflict.resolve(&existing, input);
                    if merged.address != existing.address {
                        return Err(StoreError::constraint(&input.address, "address is immutable"));
                    }
                    merged.inserted_at = existing.inserted_at;
                    merged.updated_at = timestamps.updated_at;
                    Change::Update {
                        before: existing,
                        after: merged,
                    }
                }
                None => Change::Insert {
                    account: Account::create(input, timestamps),
                },
            };

            AccountTable::check_constraints(change.after())?;
            changes.push(change);
        }

        let written: Vec<Account> = changes.iter().map(|c| c.after().clone()).collect();
        for change in changes {
            self.record(change);
        }
        debug!("{} upserted {} rows", self.id, written.len());
        Ok(written)
    }

    async fn commit(self) -> Result<()> {
        let mut txn = self;
        txn.ensure_active()?;

        let changes = std::mem::take(&mut txn.changes);
        let shared = Arc::clone(&txn.shared);
        let mut table = shared.table.write().await;

        // No await between applying and finishing: a cancelled commit either
        // never touched the table or has fully landed.
        match table.apply(&changes) {
            Ok(written) => {
                txn.finish(TransactionState::Committed);
                debug!(
                    "{} committed, {} rows written ({} inserted)",
                    txn.id,
                    written,
                    changes.iter().filter(|change| change.is_insert()).count()
                );

                if shared.config.checkpoint_on_commit {
                    if let Some(snapshots) = &shared.snapshots {
                        let table = table.downgrade();
                        if let Err(e) = snapshots.save(&TableSnapshot::new(&table)) {
                            warn!("{} committed but checkpoint failed: {}", txn.id, e);
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                drop(table);
                warn!("{} failed to commit: {}", txn.id, e);
                txn.finish(TransactionState::Aborted);
                Err(e)
            }
        }
    }

    async fn rollback(self) -> Result<()> {
        let mut txn = self;
        txn.ensure_active()?;
        debug!("{} rolled back {} buffered changes", txn.id, txn.changes.len());
        txn.finish(TransactionState::Aborted);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            debug!(
                "{} dropped while active, discarding {} buffered changes",
                self.id,
                self.changes.len()
            );
            self.finish(TransactionState::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn seeded() -> InMemoryAccountStore {
        let ts = Timestamps::now();
        InMemoryAccountStore::from_accounts(vec![
            Account::create(&AccountInput::new("0xb").gold(dec!(2)), &ts),
            Account::create(&AccountInput::new("0xa").gold(dec!(1)), &ts),
        ])
        .unwrap()
    }

    fn replace_gold(existing: &Account, incoming: &AccountInput) -> Account {
        let mut merged = existing.clone();
        merged.gold = incoming.gold.unwrap_or(existing.gold);
        merged
    }

    #[tokio::test]
    async fn test_lock_all_returns_ordered_rows_and_holds_locks() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();

        let rows = txn.lock_all(&BTreeSet::new()).await.unwrap();
        let addresses: Vec<_> = rows.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addresses, vec!["0xa", "0xb"]);
        assert!(store.is_row_locked(&"0xa".into()).unwrap());
        assert!(store.is_row_locked(&"0xb".into()).unwrap());

        txn.rollback().await.unwrap();
        assert!(!store.is_row_locked(&"0xa".into()).unwrap());
    }

    #[tokio::test]
    async fn test_lock_all_reserves_missing_keys() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();

        let reserve: BTreeSet<Address> = [Address::from("0xc"), Address::from("0xb")].into_iter().collect();
        let rows = txn.lock_all(&reserve).await.unwrap();

        assert_eq!(rows.len(), 2);
        let held: Vec<_> = txn.held_locks().iter().map(|a| a.to_string()).collect();
        assert_eq!(held, vec!["0xa", "0xb", "0xc"]);
        assert!(store.is_row_locked(&"0xc".into()).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_all_relocks_when_a_lower_row_appears() {
        let store = seeded();

        let mut holder = store.begin().await.unwrap();
        holder.lock_all(&BTreeSet::new()).await.unwrap();
        holder
            .upsert(vec![AccountInput::new("0x0").gold(dec!(9))], &replace_gold, &Timestamps::now())
            .await
            .unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut txn = store.begin().await.unwrap();
                let rows = txn.lock_all(&BTreeSet::new()).await.unwrap();
                (rows, txn.held_locks())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        holder.commit().await.unwrap();
        let (rows, held) = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();

        let addresses: Vec<_> = rows.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addresses, vec!["0x0", "0xa", "0xb"]);
        assert_eq!(held.len(), 3);
    }

    #[tokio::test]
    async fn test_lock_all_refuses_to_reorder_after_writes() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();
        txn.upsert(vec![AccountInput::new("0xb").gold(dec!(1))], &replace_gold, &Timestamps::now())
            .await
            .unwrap();

        let err = txn.lock_all(&BTreeSet::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::LockError(_)));
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_commit() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();
        let ts = Timestamps::now();

        txn.upsert(vec![AccountInput::new("0xc").gold(dec!(3))], &replace_gold, &ts)
            .await
            .unwrap();
        assert!(txn.get(&"0xc".into()).await.unwrap().is_some());
        assert!(store.get(&"0xc".into()).await.unwrap().is_none());

        txn.commit().await.unwrap();
        assert_eq!(store.get(&"0xc".into()).await.unwrap().map(|a| a.gold), Some(dec!(3)));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();

        let changed = txn
            .update_where(&|_| true, &|row| {
                row.is_active = false;
                row.is_deleted = true;
            })
            .await
            .unwrap();
        assert_eq!(changed, 2);

        txn.rollback().await.unwrap();
        let rows = store.list().await.unwrap();
        assert!(rows.iter().all(|a| a.is_active && !a.is_deleted));
    }

    #[tokio::test]
    async fn test_drop_releases_locks() {
        let store = seeded();
        {
            let mut txn = store.begin().await.unwrap();
            txn.lock_all(&BTreeSet::new()).await.unwrap();
        }
        assert!(!store.is_row_locked(&"0xa".into()).unwrap());
    }

    #[tokio::test]
    async fn test_upsert_merges_existing_and_stamps_times() {
        let store = seeded();
        let original = store.get(&"0xa".into()).await.unwrap().unwrap();
        let ts = Timestamps::at(original.updated_at + chrono::Duration::seconds(60));

        let mut txn = store.begin().await.unwrap();
        let written = txn
            .upsert(vec![AccountInput::new("0xa").gold(dec!(10))], &replace_gold, &ts)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(written[0].gold, dec!(10));
        let stored = store.get(&"0xa".into()).await.unwrap().unwrap();
        assert_eq!(stored.inserted_at, original.inserted_at);
        assert_eq!(stored.updated_at, ts.updated_at);
    }

    #[tokio::test]
    async fn test_upsert_rejects_repeated_key() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();
        let err = txn
            .upsert(
                vec![AccountInput::new("0xc"), AccountInput::new("0xc")],
                &replace_gold,
                &Timestamps::now(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.address().map(|a| a.as_str()), Some("0xc"));
        assert_eq!(txn.change_count(), 0);
    }

    #[tokio::test]
    async fn test_upsert_check_constraint_names_key() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();
        let err = txn
            .upsert(vec![AccountInput::new("0xz").usd(dec!(-5))], &replace_gold, &Timestamps::now())
            .await
            .unwrap_err();
        match err {
            StoreError::ConstraintViolation { address, .. } => assert_eq!(address.as_str(), "0xz"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolver_cannot_change_key() {
        let store = seeded();
        let mut txn = store.begin().await.unwrap();
        let rename = |existing: &Account, _: &AccountInput| {
            let mut merged = existing.clone();
            merged.address = Address::from("0xother");
            merged
        };
        let err = txn
            .upsert(vec![AccountInput::new("0xa")], &rename, &Timestamps::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_closed_transaction_rejects_work() {
        let store = seeded();
        let txn = store.begin().await.unwrap();
        let id = txn.id();
        txn.commit().await.unwrap();

        // A finished transaction cannot be reached through the trait, so
        // exercise the guard directly.
        let mut closed = MemoryTransaction::new(Arc::clone(&store.shared));
        closed.finish(TransactionState::Committed);
        assert!(matches!(
            closed.lock_all(&BTreeSet::new()).await,
            Err(StoreError::TransactionClosed(_))
        ));
        assert_ne!(closed.id(), id);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_reported() {
        let config = StoreConfig::new().lock_timeout(Duration::from_millis(20));
        let store = InMemoryAccountStore::with_config(config).unwrap();

        let mut first = store.begin().await.unwrap();
        first
            .upsert(vec![AccountInput::new("0xa")], &replace_gold, &Timestamps::now())
            .await
            .unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second
            .upsert(vec![AccountInput::new("0xa")], &replace_gold, &Timestamps::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        first.commit().await.unwrap();
    }
}
