use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque primary key of an account row.
///
/// Ordering is plain byte-wise string ordering; it is the single global
/// order in which row locks are requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    #[default]
    Normal,
    Validator,
    Group,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Normal => write!(f, "normal"),
            AccountType::Validator => write!(f, "validator"),
            AccountType::Group => write!(f, "group"),
        }
    }
}

/// Mutable value columns an incoming entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountField {
    AccountType,
    Gold,
    Usd,
    LockedGold,
    NoticePeriod,
    Rewards,
}

impl AccountField {
    pub const ALL: [AccountField; 6] = [
        AccountField::AccountType,
        AccountField::Gold,
        AccountField::Usd,
        AccountField::LockedGold,
        AccountField::NoticePeriod,
        AccountField::Rewards,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AccountField::AccountType => "account_type",
            AccountField::Gold => "gold",
            AccountField::Usd => "usd",
            AccountField::LockedGold => "locked_gold",
            AccountField::NoticePeriod => "notice_period",
            AccountField::Rewards => "rewards",
        }
    }
}

impl fmt::Display for AccountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `inserted_at` / `updated_at` pair stamped on every touched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timestamps {
    pub fn new(inserted_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            inserted_at,
            updated_at,
        }
    }

    /// Both columns set to the same instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::new(instant, instant)
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }
}

/// A persisted account row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub account_type: AccountType,
    pub gold: Decimal,
    pub usd: Decimal,
    pub locked_gold: Decimal,
    pub notice_period: Decimal,
    pub rewards: Decimal,
    pub is_active: bool,
    pub is_deleted: bool,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Row image for a first-time insert. Absent value fields fall back to
    /// zero / `Normal`.
    pub fn create(input: &AccountInput, timestamps: &Timestamps) -> Self {
        Self {
            address: input.address.clone(),
            account_type: input.account_type.unwrap_or_default(),
            gold: input.gold.unwrap_or_default(),
            usd: input.usd.unwrap_or_default(),
            locked_gold: input.locked_gold.unwrap_or_default(),
            notice_period: input.notice_period.unwrap_or_default(),
            rewards: input.rewards.unwrap_or_default(),
            is_active: true,
            is_deleted: false,
            inserted_at: timestamps.inserted_at,
            updated_at: timestamps.updated_at,
        }
    }

    /// Overwrite `field` from `input` if the entry carries it.
    pub fn replace_field(&mut self, field: AccountField, input: &AccountInput) {
        match field {
            AccountField::AccountType => {
                if let Some(value) = input.account_type {
                    self.account_type = value;
                }
            }
            AccountField::Gold => {
                if let Some(value) = input.gold {
                    self.gold = value;
                }
            }
            AccountField::Usd => {
                if let Some(value) = input.usd {
                    self.usd = value;
                }
            }
            AccountField::LockedGold => {
                if let Some(value) = input.locked_gold {
                    self.locked_gold = value;
                }
            }
            AccountField::NoticePeriod => {
                if let Some(value) = input.notice_period {
                    self.notice_period = value;
                }
            }
            AccountField::Rewards => {
                if let Some(value) = input.rewards {
                    self.rewards = value;
                }
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_deleted && !self.is_active
    }
}

/// One observed account state from an ingestion batch.
///
/// Only `address` is structurally required; which value fields must be
/// present depends on the conflict resolution in use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInput {
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub account_type: Option<AccountType>,
    #[serde(default)]
    pub gold: Option<Decimal>,
    #[serde(default)]
    pub usd: Option<Decimal>,
    #[serde(default)]
    pub locked_gold: Option<Decimal>,
    #[serde(default)]
    pub notice_period: Option<Decimal>,
    #[serde(default)]
    pub rewards: Option<Decimal>,
}

impl AccountInput {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Entry with every value field set.
    pub fn full(
        address: impl Into<Address>,
        account_type: AccountType,
        gold: Decimal,
        usd: Decimal,
        locked_gold: Decimal,
        notice_period: Decimal,
        rewards: Decimal,
    ) -> Self {
        Self {
            address: address.into(),
            account_type: Some(account_type),
            gold: Some(gold),
            usd: Some(usd),
            locked_gold: Some(locked_gold),
            notice_period: Some(notice_period),
            rewards: Some(rewards),
        }
    }

    pub fn account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = Some(account_type);
        self
    }

    pub fn gold(mut self, gold: Decimal) -> Self {
        self.gold = Some(gold);
        self
    }

    pub fn usd(mut self, usd: Decimal) -> Self {
        self.usd = Some(usd);
        self
    }

    pub fn locked_gold(mut self, locked_gold: Decimal) -> Self {
        self.locked_gold = Some(locked_gold);
        self
    }

    pub fn notice_period(mut self, notice_period: Decimal) -> Self {
        self.notice_period = Some(notice_period);
        self
    }

    pub fn rewards(mut self, rewards: Decimal) -> Self {
        self.rewards = Some(rewards);
        self
    }

    pub fn has_field(&self, field: AccountField) -> bool {
        match field {
            AccountField::AccountType => self.account_type.is_some(),
            AccountField::Gold => self.gold.is_some(),
            AccountField::Usd => self.usd.is_some(),
            AccountField::LockedGold => self.locked_gold.is_some(),
            AccountField::NoticePeriod => self.notice_period.is_some(),
            AccountField::Rewards => self.rewards.is_some(),
        }
    }
}
