use crate::core::{Address, Result, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<Address, Arc<RowMutex<()>>>>>;

/// Exclusive lock on one row, released on drop.
///
/// Dropping the last guard or waiter for an address also removes its slot.
#[derive(Debug)]
pub struct RowGuard {
    address: Address,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl RowGuard {
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.slots, &self.address);
    }
}

/// Remove the slot for `address` if nobody holds or waits on it.
///
/// Every clone of a slot is taken under the map latch, so a strong count of
/// one seen under that latch means the map holds the only reference.
fn prune(slots: &Slots, address: &Address) {
    let Ok(mut slots) = slots.lock() else {
        return;
    };
    if slots
        .get(address)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        slots.remove(address);
    }
}

/// Per-address exclusive row locks.
///
/// A slot exists while some transaction holds or waits for the row, which
/// covers keys about to be inserted as well as stored ones. Callers must
/// request locks in ascending address order.
#[derive(Default)]
pub struct RowLocks {
    slots: Slots,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, address: &Address) -> Result<Arc<RowMutex<()>>> {
        let mut slots = self.slots.lock()?;
        Ok(slots
            .entry(address.clone())
            .or_insert_with(|| Arc::new(RowMutex::new(())))
            .clone())
    }

    /// Wait for the lock on `address`, optionally bounded by `wait`.
    pub async fn acquire(&self, address: &Address, wait: Option<Duration>) -> Result<RowGuard> {
        let slot = self.slot(address)?;
        let guard = match wait {
            None => slot.lock_owned().await,
            Some(limit) => match tokio::time::timeout(limit, slot.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    prune(&self.slots, address);
                    return Err(StoreError::LockTimeout {
                        address: address.clone(),
                        waited: limit,
                    });
                }
            },
        };

        Ok(RowGuard {
            address: address.clone(),
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        })
    }

    /// Whether some transaction currently holds the lock on `address`
    pub fn is_locked(&self, address: &Address) -> Result<bool> {
        let slots = self.slots.lock()?;
        Ok(slots
            .get(address)
            .is_some_and(|slot| slot.try_lock().is_err()))
    }
}
