//! Snapshot persistence for the account table

use crate::core::{Account, Result};
use crate::storage::table::AccountTable;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Table Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub version: u32,
    pub accounts: Vec<Account>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: u64,
    pub row_count: usize,
    pub deleted_count: usize,
}

impl TableSnapshot {
    pub fn new(table: &AccountTable) -> Self {
        let accounts = table.scan();
        let deleted_count = accounts.iter().filter(|a| a.is_deleted).count();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            version: SNAPSHOT_VERSION,
            metadata: SnapshotMetadata {
                created_at,
                row_count: accounts.len(),
                deleted_count,
            },
            accounts,
        }
    }

    pub fn into_table(self) -> Result<AccountTable> {
        AccountTable::from_rows(self.accounts)
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Write the snapshot next to its final location, fsync, then rename
    /// over the previous one.
    pub fn save(&self, snapshot: &TableSnapshot) -> Result<()> {
        let parent = match self.snapshot_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let temp = NamedTempFile::new_in(&parent)?;
        let serialized = rmp_serde::to_vec_named(snapshot)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer.write_all(&serialized)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.snapshot_path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<TableSnapshot>> {
        if !self.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let snapshot: TableSnapshot = rmp_serde::from_slice(&data)?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}
