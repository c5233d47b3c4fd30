//! Account data models and API response types.
//!
//! This module defines:
//! - `Cents`: non-negative balance in minor currency units
//! - `Account`: an account record as held by the account store
//! - `Revision`: one committed balance change of an account
//! - `AccountResponse`: Response body returned to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Account identifier, assigned by the store.
pub type AccountId = Uuid;

/// Transfer identifier. Every balance revision is tagged with one.
pub type TransferId = Uuid;

/// Balance in minor currency units (cents).
///
/// # Invariant
///
/// A `Cents` value is never negative. The only constructors are
/// [`Cents::new`] and the checked arithmetic helpers, all of which refuse to
/// produce a negative amount. Because the account store only accepts `Cents`
/// for new balances, a negative balance cannot reach storage.
///
/// For example:
/// - $10.50 is stored as 1050 cents
/// - $100.00 is stored as 10000 cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    /// Returns `None` for negative amounts.
    pub fn new(value: i64) -> Option<Self> {
        (value >= 0).then_some(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// `self + amount`, or `None` on overflow or a negative result.
    pub fn checked_add(self, amount: i64) -> Option<Self> {
        self.0.checked_add(amount).and_then(Self::new)
    }

    /// `self - amount`, or `None` on overflow or a negative result.
    pub fn checked_sub(self, amount: i64) -> Option<Self> {
        self.0.checked_sub(amount).and_then(Self::new)
    }
}

impl<'de> Deserialize<'de> for Cents {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Cents::new(value).ok_or_else(|| serde::de::Error::custom("balance must not be negative"))
    }
}

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An account record.
///
/// Accounts know nothing about transfers. The only way their balance
/// changes is the store's compare-and-update, which bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    /// Unique identifier for this account
    pub id: AccountId,

    /// Human-readable display name
    pub name: String,

    /// Current balance in cents (never negative)
    pub balance: Cents,

    /// Optimistic concurrency counter, incremented on every update
    pub version: i64,

    /// Timestamp when account was created
    pub created_at: DateTime<Utc>,

    /// Timestamp of last balance update
    pub updated_at: DateTime<Utc>,
}

/// Raw `accounts` row as read by sqlx.
///
/// Converted into [`Account`] through `TryFrom`, which re-checks the balance
/// invariant on the way out of the database.
#[derive(Debug, sqlx::FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub name: String,
    pub balance: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let balance = Cents::new(row.balance).ok_or_else(|| {
            StoreError::Corrupt(format!("account {} has negative balance", row.id))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            balance,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// An account to provision.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub balance: Cents,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, balance: Cents) -> Self {
        Self {
            name: name.into(),
            balance,
        }
    }
}

/// The fixed seed set installed by `POST /create-users`.
pub fn seed_accounts() -> Vec<NewAccount> {
    vec![
        NewAccount::new("Alice", Cents(1000)),
        NewAccount::new("Bob", Cents(500)),
    ]
}

/// One committed balance change.
///
/// Written by the store in the same atomic step as the update it describes.
/// `transfer_id` names the transfer that issued the update, which lets the
/// engine tell after a crash exactly which of its own updates took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub account_id: AccountId,

    /// Account version produced by this update
    pub version: i64,

    pub balance: Cents,

    pub previous_balance: Cents,

    pub transfer_id: TransferId,

    pub recorded_at: DateTime<Utc>,
}

impl Revision {
    /// Signed balance change made by this revision.
    pub fn delta(&self) -> i64 {
        self.balance.get() - self.previous_balance.get()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RevisionRow {
    pub account_id: Uuid,
    pub version: i64,
    pub balance: i64,
    pub previous_balance: i64,
    pub transfer_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

impl TryFrom<RevisionRow> for Revision {
    type Error = StoreError;

    fn try_from(row: RevisionRow) -> Result<Self, Self::Error> {
        let corrupt = || {
            StoreError::Corrupt(format!(
                "revision {}@{} has negative balance",
                row.account_id, row.version
            ))
        };

        Ok(Self {
            account_id: row.account_id,
            version: row.version,
            balance: Cents::new(row.balance).ok_or_else(corrupt)?,
            previous_balance: Cents::new(row.previous_balance).ok_or_else(corrupt)?,
            transfer_id: row.transfer_id,
            recorded_at: row.recorded_at,
        })
    }
}

/// Response body for user endpoints.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "name": "Alice",
///   "balance": 1000,
///   "version": 0,
///   "createdAt": "2025-12-20T10:00:00Z",
///   "updatedAt": "2025-12-20T10:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: Uuid,
    pub name: String,
    pub balance: Cents,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            balance: account.balance,
            version: account.version,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}
