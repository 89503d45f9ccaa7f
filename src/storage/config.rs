use std::path::{Path, PathBuf};
use std::time::Duration;

/// Account store configuration
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Snapshot file the table is restored from and checkpointed to
    pub snapshot_path: Option<PathBuf>,

    /// Upper bound on waiting for a single row lock
    pub lock_timeout: Option<Duration>,

    /// Write a snapshot after every successful commit
    pub checkpoint_on_commit: bool,
}

impl StoreConfig {
    /// Create a configuration for a purely in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the snapshot file
    pub fn snapshot_path(mut self, path: impl AsRef<Path>) -> Self {
        self.snapshot_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the row lock wait bound
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Checkpoint on every commit
    pub fn checkpoint_on_commit(mut self, enabled: bool) -> Self {
        self.checkpoint_on_commit = enabled;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout == Some(Duration::ZERO) {
            return Err("lock_timeout must be > 0".to_string());
        }

        if self.checkpoint_on_commit && self.snapshot_path.is_none() {
            return Err("checkpoint_on_commit requires a snapshot_path".to_string());
        }

        Ok(())
    }
}
