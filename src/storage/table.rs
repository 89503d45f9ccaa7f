use crate::core::{Account, Address, Result, StoreError};
use crate::transaction::Change;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Committed account rows keyed (and therefore uniquely constrained) on
/// address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountTable {
    rows: BTreeMap<Address, Account>,
}

impl AccountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from loaded rows, enforcing the key and check
    /// constraints.
    pub fn from_rows(rows: impl IntoIterator<Item = Account>) -> Result<Self> {
        let mut table = Self::new();
        for row in rows {
            Self::check_constraints(&row)?;
            if table.rows.contains_key(&row.address) {
                return Err(StoreError::constraint(&row.address, "duplicate key value"));
            }
            table.rows.insert(row.address.clone(), row);
        }
        Ok(table)
    }

    pub fn get(&self, address: &Address) -> Option<&Account> {
        self.rows.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.rows.contains_key(address)
    }

    /// Borrowing iterator over all rows, ascending by address
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.rows.values()
    }

    /// All rows, ascending by address
    pub fn scan(&self) -> Vec<Account> {
        self.rows.values().cloned().collect()
    }

    /// All keys, ascending
    pub fn addresses(&self) -> Vec<Address> {
        self.rows.keys().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column and row level checks every stored image must pass.
    pub fn check_constraints(row: &Account) -> Result<()> {
        if row.address.is_blank() {
            return Err(StoreError::constraint(&row.address, "address cannot be empty"));
        }

        let balances = [
            ("gold", row.gold),
            ("usd", row.usd),
            ("locked_gold", row.locked_gold),
            ("notice_period", row.notice_period),
            ("rewards", row.rewards),
        ];
        for (column, value) in balances {
            if value < Decimal::ZERO {
                return Err(StoreError::constraint(
                    &row.address,
                    format!("column '{}' must be non-negative, got {}", column, value),
                ));
            }
        }

        if row.is_deleted && row.is_active {
            return Err(StoreError::constraint(
                &row.address,
                "a deleted account cannot be active",
            ));
        }

        Ok(())
    }

    /// Replay a transaction's change log.
    ///
    /// Every change is validated against the current rows before any is
    /// applied, so a failed apply leaves the table untouched. Returns the
    /// number of distinct rows written.
    pub fn apply(&mut self, changes: &[Change]) -> Result<usize> {
        let mut staged: BTreeMap<Address, Account> = BTreeMap::new();

        for change in changes {
            let address = change.address();
            let current = staged.get(address).or_else(|| self.rows.get(address));

            match change {
                Change::Insert { .. } => {
                    if current.is_some() {
                        return Err(StoreError::constraint(address, "duplicate key value"));
                    }
                }
                Change::Update { before, .. } => {
                    if current != Some(before) {
                        return Err(StoreError::WriteConflict(address.clone()));
                    }
                }
            }

            Self::check_constraints(change.after())?;
            staged.insert(address.clone(), change.after().clone());
        }

        let written = staged.len();
        self.rows.extend(staged);
        Ok(written)
    }
}
