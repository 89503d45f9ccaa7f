use crate::core::{Account, AccountField, AccountInput, Timestamps};
use crate::storage::ConflictResolver;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Budget for a whole reconciliation transaction unless overridden
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

type MergeFn = dyn Fn(&Account, &AccountInput) -> Account + Send + Sync;

/// What happens to an existing row when its address shows up again.
#[derive(Clone)]
pub enum ConflictResolution {
    /// Overwrite `fields` from the incoming entry. With `revive`, the row is
    /// also reset to `is_active = true, is_deleted = false`.
    Replace {
        fields: BTreeSet<AccountField>,
        revive: bool,
    },

    /// Caller-supplied merge. Address and timestamps are enforced by the
    /// store regardless of what the function returns.
    Custom(Arc<MergeFn>),
}

impl ConflictResolution {
    pub fn replace(fields: impl IntoIterator<Item = AccountField>) -> Self {
        ConflictResolution::Replace {
            fields: fields.into_iter().collect(),
            revive: true,
        }
    }

    /// Overwrite the six value fields and leave `is_active`/`is_deleted` as
    /// stored, so a soft-deleted row stays deleted when it reappears.
    pub fn legacy() -> Self {
        ConflictResolution::Replace {
            fields: AccountField::ALL.into_iter().collect(),
            revive: false,
        }
    }

    pub fn custom<F>(merge: F) -> Self
    where
        F: Fn(&Account, &AccountInput) -> Account + Send + Sync + 'static,
    {
        ConflictResolution::Custom(Arc::new(merge))
    }

    /// Toggle revival on a `Replace` policy; no effect on `Custom`.
    pub fn with_revive(self, revive: bool) -> Self {
        match self {
            ConflictResolution::Replace { fields, .. } => ConflictResolution::Replace { fields, revive },
            custom => custom,
        }
    }

    /// Value fields every batch entry must carry under this policy
    pub fn required_fields(&self) -> Vec<AccountField> {
        match self {
            ConflictResolution::Replace { fields, .. } => fields.iter().copied().collect(),
            ConflictResolution::Custom(_) => Vec::new(),
        }
    }
}

impl Default for ConflictResolution {
    fn default() -> Self {
        Self::replace(AccountField::ALL)
    }
}

impl fmt::Debug for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictResolution::Replace { fields, revive } => f
                .debug_struct("Replace")
                .field("fields", fields)
                .field("revive", revive)
                .finish(),
            ConflictResolution::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl ConflictResolver for ConflictResolution {
    fn resolve(&self, existing: &Account, incoming: &AccountInput) -> Account {
        match self {
            ConflictResolution::Replace { fields, revive } => {
                let mut merged = existing.clone();
                for field in fields {
                    merged.replace_field(*field, incoming);
                }
                if *revive {
                    merged.is_active = true;
                    merged.is_deleted = false;
                }
                merged
            }
            ConflictResolution::Custom(merge) => merge(existing, incoming),
        }
    }
}

/// Per-run reconciliation options
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Merge policy for keys that already exist
    pub conflict_resolution: ConflictResolution,

    /// Wall-clock budget for the whole transaction, commit included
    pub timeout: Duration,

    /// Stamped on every row the run writes
    pub timestamps: Timestamps,
}

impl ReconcileOptions {
    pub fn new(timestamps: Timestamps) -> Self {
        Self {
            conflict_resolution: ConflictResolution::default(),
            timeout: DEFAULT_TIMEOUT,
            timestamps,
        }
    }

    pub fn conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::new(Timestamps::now())
    }
}
