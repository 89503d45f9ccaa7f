// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change is one buffered row write. The list is replayed against the
// shared table on COMMIT and simply discarded on ROLLBACK.
//
// ============================================================================

use crate::core::{Account, Address};

/// A single buffered row write
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a row whose key did not exist
    Insert { account: Account },

    /// Replace an existing row image
    Update { before: Account, after: Account },
}

impl Change {
    /// Key of the row affected by this change
    pub fn address(&self) -> &Address {
        match self {
            Change::Insert { account } => &account.address,
            Change::Update { after, .. } => &after.address,
        }
    }

    /// Row image after the change is applied
    pub fn after(&self) -> &Account {
        match self {
            Change::Insert { account } => account,
            Change::Update { after, .. } => after,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Change::Insert { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AccountInput, Timestamps};

    #[test]
    fn test_change_accessors() {
        let ts = Timestamps::now();
        let before = Account::create(&AccountInput::new("0xa"), &ts);
        let mut after = before.clone();
        after.is_active = false;

        let insert = Change::Insert { account: before.clone() };
        let update = Change::Update { before, after: after.clone() };

        assert!(insert.is_insert());
        assert!(!update.is_insert());
        assert_eq!(update.address().as_str(), "0xa");
        assert_eq!(update.after(), &after);
    }
}
