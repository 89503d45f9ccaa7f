pub mod config;
pub mod engine;
pub mod locks;
pub mod memory;
pub mod persistence;
pub mod table;

pub use config::StoreConfig;
pub use engine::{AccountStore, AccountTransaction, ConflictResolver, RowFilter, RowUpdate};
pub use locks::{RowGuard, RowLocks};
pub use memory::{InMemoryAccountStore, MemoryTransaction};
pub use persistence::{SnapshotManager, TableSnapshot};
pub use table::AccountTable;
