/// Failure propagation tests
///
/// Wraps the in-memory store so a chosen store call fails, then checks the
/// run reports the right step and leaves the table untouched.
/// Run with: cargo test --test fault_injection_tests

use account_reconciler::storage::{ConflictResolver, MemoryTransaction, RowFilter, RowUpdate};
use account_reconciler::transaction::TransactionId;
use account_reconciler::{
    Account, AccountInput, AccountStore, AccountTransaction, AccountType, Address, InMemoryAccountStore,
    ReconcileOptions, Reconciler, Step, StoreError, Timestamps,
};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Begin,
    LockAll,
    UpdateWhere,
    Upsert,
    Commit,
}

struct FaultyStore {
    inner: InMemoryAccountStore,
    fault: Fault,
}

struct FaultyTransaction {
    inner: MemoryTransaction,
    fault: Fault,
}

impl FaultyTransaction {
    fn fail_on(&self, call: Fault) -> Result<(), StoreError> {
        if self.fault == call {
            return Err(StoreError::Storage(format!("injected {:?} failure", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FaultyStore {
    type Transaction = FaultyTransaction;

    async fn begin(&self) -> Result<FaultyTransaction, StoreError> {
        if self.fault == Fault::Begin {
            return Err(StoreError::Storage("injected Begin failure".into()));
        }
        Ok(FaultyTransaction {
            inner: self.inner.begin().await?,
            fault: self.fault,
        })
    }

    async fn get(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        self.inner.get(address).await
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        self.inner.list().await
    }
}

#[async_trait]
impl AccountTransaction for FaultyTransaction {
    fn id(&self) -> TransactionId {
        self.inner.id()
    }

    fn held_locks(&self) -> Vec<Address> {
        self.inner.held_locks()
    }

    async fn lock_all(&mut self, reserve: &BTreeSet<Address>) -> Result<Vec<Account>, StoreError> {
        self.fail_on(Fault::LockAll)?;
        self.inner.lock_all(reserve).await
    }

    async fn get(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        self.inner.get(address).await
    }

    async fn update_where(&mut self, filter: RowFilter<'_>, update: RowUpdate<'_>) -> Result<u64, StoreError> {
        // Let the write land in the overlay first so rollback has something
        // to discard.
        let changed = self.inner.update_where(filter, update).await?;
        self.fail_on(Fault::UpdateWhere)?;
        Ok(changed)
    }

    async fn upsert(
        &mut self,
        rows: Vec<AccountInput>,
        on_conflict: &dyn ConflictResolver,
        timestamps: &Timestamps,
    ) -> Result<Vec<Account>, StoreError> {
        let written = self.inner.upsert(rows, on_conflict, timestamps).await?;
        self.fail_on(Fault::Upsert)?;
        Ok(written)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.fail_on(Fault::Commit)?;
        self.inner.commit().await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

fn entry(address: &str) -> AccountInput {
    AccountInput::full(address, AccountType::Normal, dec!(7), dec!(0), dec!(0), dec!(0), dec!(0))
}

fn faulty(fault: Fault) -> Reconciler<FaultyStore> {
    let ts = Timestamps::now();
    let inner = InMemoryAccountStore::from_accounts(vec![
        Account::create(&entry("A"), &ts),
        Account::create(&entry("B"), &ts),
    ])
    .unwrap();
    Reconciler::new(FaultyStore { inner, fault })
}

async fn assert_fails_at(fault: Fault, step: Step) {
    let reconciler = faulty(fault);
    let before = reconciler.accounts().await.unwrap();

    let err = reconciler
        .run(vec![entry("B"), entry("C")], ReconcileOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.step(), Some(step), "{:?} should surface as {}", fault, step);
    assert!(matches!(err.store_error(), Some(StoreError::Storage(_))));
    assert_eq!(reconciler.accounts().await.unwrap(), before);

    let inner = &reconciler.store().inner;
    for address in ["A", "B", "C"] {
        assert!(!inner.is_row_locked(&Address::from(address)).unwrap());
    }
}

#[tokio::test]
async fn test_begin_failure() {
    assert_fails_at(Fault::Begin, Step::Begin).await;
}

#[tokio::test]
async fn test_lock_failure() {
    assert_fails_at(Fault::LockAll, Step::AcquireLocks).await;
}

#[tokio::test]
async fn test_stale_mark_failure_discards_marks() {
    assert_fails_at(Fault::UpdateWhere, Step::MarkStale).await;
}

#[tokio::test]
async fn test_upsert_failure_discards_stale_marks_and_writes() {
    assert_fails_at(Fault::Upsert, Step::Upsert).await;
}

#[tokio::test]
async fn test_commit_failure_rolls_back() {
    assert_fails_at(Fault::Commit, Step::Commit).await;
}
