//! Storage ports for accounts and the transfer ledger.
//!
//! The engine only ever talks to these two traits. Both are implemented by
//! [`postgres::PgStore`] for production and by [`memory::MemoryStore`] for
//! database-less runs and tests.
//!
//! # Atomicity contract
//!
//! Each method is atomic on its own. Nothing here offers atomicity across
//! two accounts; the engine builds that out of ordered compare-and-update
//! calls plus compensation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    models::{
        account::{Account, AccountId, Cents, NewAccount, Revision, TransferId},
        transfer::{Ownership, TransferOutcome, TransferRecord},
    },
};

pub mod memory;
pub mod postgres;

/// Result of a compare-and-update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// Applied; carries the account as it is after the update.
    Updated(Account),
    /// The account moved past the expected version. Nothing was written.
    VersionConflict,
    NotFound,
    /// The transfer is no longer pending at the caller's epoch. Nothing was
    /// written.
    Fenced,
}

/// Keyed account storage with single-record atomic updates.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Set the balance of `id` to `new_balance` only if its version is still
    /// `expected_version` and `owner` still owns its pending transfer.
    ///
    /// On success the version is bumped by one and a [`Revision`] tagged with
    /// the transfer id is appended in the same atomic step. This is the only
    /// way a balance changes. A concurrent [`TransferLedger::claim`] of the
    /// same transfer is ordered strictly before or after this call.
    async fn compare_and_update(
        &self,
        id: AccountId,
        expected_version: i64,
        new_balance: Cents,
        owner: Ownership,
    ) -> Result<CasOutcome, StoreError>;

    /// All revisions written on behalf of `transfer_id`, ordered by account
    /// and version.
    async fn revisions_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<Revision>, StoreError>;

    async fn list(&self) -> Result<Vec<Account>, StoreError>;

    /// Drop every account and install `seed` instead. Provisioning only.
    async fn replace_all(&self, seed: Vec<NewAccount>) -> Result<Vec<Account>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Outcome of writing a pending intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The intent was stored and the caller owns it.
    Started(TransferRecord),
    /// A record with the same idempotency key already exists.
    Existing(TransferRecord),
}

/// The idempotency/audit ledger.
#[async_trait]
pub trait TransferLedger: Send + Sync {
    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, StoreError>;

    async fn find_by_key(&self, key: &str) -> Result<Option<TransferRecord>, StoreError>;

    /// Store a pending intent unless its idempotency key is already taken.
    /// Records without a key always start.
    async fn begin(&self, intent: TransferRecord) -> Result<BeginOutcome, StoreError>;

    /// Take over a pending record that is still at `seen_epoch`.
    ///
    /// Bumps the epoch, which fences off every later write of the previous
    /// owner, and returns the record as now owned. `None` if the record
    /// completed or someone else claimed it first.
    async fn claim(
        &self,
        id: TransferId,
        seen_epoch: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TransferRecord>, StoreError>;

    /// Drop the lease of a pending record so a retry can claim it at once.
    /// No-op unless `owner` still owns it.
    async fn release(&self, owner: Ownership) -> Result<(), StoreError>;

    /// Move a pending record owned by `owner` to its final state.
    ///
    /// If the record already completed or changed owner, the stored record is
    /// returned unchanged; callers must treat the returned record as the truth.
    async fn complete(
        &self,
        owner: Ownership,
        outcome: TransferOutcome,
    ) -> Result<TransferRecord, StoreError>;

    /// Pending records whose lease expired before `now`, oldest first.
    ///
    /// Released records (no lease) are left out: nothing of theirs is in
    /// flight.
    async fn find_stale(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, StoreError>;
}
