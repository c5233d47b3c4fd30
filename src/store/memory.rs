//! In-process account store and transfer ledger.
//!
//! Backed by `DashMap`, which locks per shard. Every compare-and-update runs
//! while holding the entry of the one account it touches, so it is atomic
//! with respect to every other update on that account and never blocks
//! updates on other accounts. No lock is held across an `.await`.
//!
//! Lock order is transfer entry, then account entry. A compare-and-update
//! holds a read guard on its transfer record while it writes, so a claim
//! (which needs the write guard) lands strictly before or after it.
//!
//! Used when `DATABASE_URL` is not set, and by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use super::{AccountStore, BeginOutcome, CasOutcome, TransferLedger};
use crate::{
    error::StoreError,
    models::{
        account::{Account, AccountId, Cents, NewAccount, Revision, TransferId},
        transfer::{Ownership, TransferOutcome, TransferRecord, TransferStatus},
    },
};

#[derive(Debug)]
struct AccountEntry {
    account: Account,
    revisions: Vec<Revision>,
}

/// In-process implementation of [`AccountStore`] and [`TransferLedger`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, AccountEntry>,
    transfers: DashMap<TransferId, TransferRecord>,
    keys: DashMap<String, TransferId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one account and return it. Provisioning helper.
    pub fn insert(&self, account: NewAccount) -> Account {
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            name: account.name,
            balance: account.balance,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.accounts.insert(
            account.id,
            AccountEntry {
                account: account.clone(),
                revisions: Vec::new(),
            },
        );
        account
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&id).map(|entry| entry.account.clone()))
    }

    async fn compare_and_update(
        &self,
        id: AccountId,
        expected_version: i64,
        new_balance: Cents,
        owner: Ownership,
    ) -> Result<CasOutcome, StoreError> {
        let Some(transfer) = self.transfers.get(&owner.transfer_id) else {
            return Ok(CasOutcome::Fenced);
        };
        if transfer.status != TransferStatus::Pending || transfer.epoch != owner.epoch {
            return Ok(CasOutcome::Fenced);
        }

        let Some(mut entry) = self.accounts.get_mut(&id) else {
            return Ok(CasOutcome::NotFound);
        };

        if entry.account.version != expected_version {
            return Ok(CasOutcome::VersionConflict);
        }

        let now = Utc::now();
        let previous_balance = entry.account.balance;
        entry.account.balance = new_balance;
        entry.account.version += 1;
        entry.account.updated_at = now;

        let revision = Revision {
            account_id: id,
            version: entry.account.version,
            balance: new_balance,
            previous_balance,
            transfer_id: owner.transfer_id,
            recorded_at: now,
        };
        entry.revisions.push(revision);

        Ok(CasOutcome::Updated(entry.account.clone()))
    }

    async fn revisions_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<Revision>, StoreError> {
        let mut revisions: Vec<Revision> = self
            .accounts
            .iter()
            .flat_map(|entry| {
                entry
                    .revisions
                    .iter()
                    .filter(|r| r.transfer_id == transfer_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        revisions.sort_by_key(|r| (r.account_id, r.version));
        Ok(revisions)
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .map(|entry| entry.account.clone())
            .collect();

        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn replace_all(&self, seed: Vec<NewAccount>) -> Result<Vec<Account>, StoreError> {
        self.accounts.clear();
        Ok(seed.into_iter().map(|account| self.insert(account)).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TransferLedger for MemoryStore {
    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self.transfers.get(&id).map(|record| record.clone()))
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<TransferRecord>, StoreError> {
        let Some(id) = self.keys.get(key).map(|id| *id) else {
            return Ok(None);
        };
        TransferLedger::get(self, id).await
    }

    async fn begin(&self, intent: TransferRecord) -> Result<BeginOutcome, StoreError> {
        let Some(key) = intent.idempotency_key.clone() else {
            self.transfers.insert(intent.id, intent.clone());
            return Ok(BeginOutcome::Started(intent));
        };

        // The key entry stays locked until the record is in place, so a
        // concurrent begin with the same key always finds the record.
        match self.keys.entry(key) {
            Entry::Occupied(existing) => {
                let record = self
                    .transfers
                    .get(existing.get())
                    .map(|record| record.clone())
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "idempotency key {} points at a missing transfer",
                            existing.key()
                        ))
                    })?;
                Ok(BeginOutcome::Existing(record))
            }
            Entry::Vacant(slot) => {
                self.transfers.insert(intent.id, intent.clone());
                slot.insert(intent.id);
                Ok(BeginOutcome::Started(intent))
            }
        }
    }

    async fn claim(
        &self,
        id: TransferId,
        seen_epoch: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let Some(mut record) = self.transfers.get_mut(&id) else {
            return Ok(None);
        };

        if record.status != TransferStatus::Pending || record.epoch != seen_epoch {
            return Ok(None);
        }

        record.epoch += 1;
        record.lease_until = Some(lease_until);
        Ok(Some(record.clone()))
    }

    async fn release(&self, owner: Ownership) -> Result<(), StoreError> {
        if let Some(mut record) = self.transfers.get_mut(&owner.transfer_id)
            && record.status == TransferStatus::Pending
            && record.epoch == owner.epoch
        {
            record.lease_until = None;
        }
        Ok(())
    }

    async fn complete(
        &self,
        owner: Ownership,
        outcome: TransferOutcome,
    ) -> Result<TransferRecord, StoreError> {
        let id = owner.transfer_id;
        let mut record = self.transfers.get_mut(&id).ok_or_else(|| {
            StoreError::Corrupt(format!("transfer {id} vanished before completion"))
        })?;

        if record.status == TransferStatus::Pending && record.epoch == owner.epoch {
            record.complete(outcome, Utc::now());
        }
        Ok(record.clone())
    }

    async fn find_stale(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let mut stale: Vec<TransferRecord> = self
            .transfers
            .iter()
            .filter(|record| {
                record.status == TransferStatus::Pending
                    && record.lease_until.is_some_and(|until| until <= now)
            })
            .map(|record| record.clone())
            .collect();

        stale.sort_by_key(|record| record.lease_until);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transfer::{RejectReason, TransferRequest};

    fn cents(value: i64) -> Cents {
        Cents::new(value).unwrap()
    }

    fn request(key: Option<&str>) -> TransferRequest {
        TransferRequest {
            from: Uuid::new_v4(),
            to: Uuid::new_v4(),
            amount: 300,
            idempotency_key: key.map(str::to_string),
        }
    }

    /// Start a keyless pending transfer and return its owner token.
    async fn start(store: &MemoryStore) -> Ownership {
        let intent = TransferRecord::pending(Uuid::new_v4(), &request(None), Utc::now());
        store.begin(intent.clone()).await.unwrap();
        intent.ownership()
    }

    #[tokio::test]
    async fn test_compare_and_update_bumps_version_and_records_revision() {
        let store = MemoryStore::new();
        let alice = store.insert(NewAccount::new("Alice", cents(1000)));
        let owner = start(&store).await;

        let outcome = store
            .compare_and_update(alice.id, 0, cents(700), owner)
            .await
            .unwrap();

        let CasOutcome::Updated(updated) = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(updated.balance, cents(700));
        assert_eq!(updated.version, 1);

        let revisions = store.revisions_by_transfer(owner.transfer_id).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].delta(), -300);
        assert_eq!(revisions[0].version, 1);
    }

    #[tokio::test]
    async fn test_compare_and_update_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let alice = store.insert(NewAccount::new("Alice", cents(1000)));

        let owner = start(&store).await;

        store
            .compare_and_update(alice.id, 0, cents(900), owner)
            .await
            .unwrap();
        let outcome = store
            .compare_and_update(alice.id, 0, cents(800), owner)
            .await
            .unwrap();

        assert_eq!(outcome, CasOutcome::VersionConflict);
        let current = AccountStore::get(&store, alice.id).await.unwrap().unwrap();
        assert_eq!(current.balance, cents(900));
    }

    #[tokio::test]
    async fn test_compare_and_update_unknown_account() {
        let store = MemoryStore::new();
        let owner = start(&store).await;
        let outcome = store
            .compare_and_update(Uuid::new_v4(), 0, cents(1), owner)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_compare_and_update_after_claim_is_fenced() {
        let store = MemoryStore::new();
        let alice = store.insert(NewAccount::new("Alice", cents(1000)));
        let stale_owner = start(&store).await;

        let claimed = store
            .claim(stale_owner.transfer_id, stale_owner.epoch, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.epoch, stale_owner.epoch + 1);

        let outcome = store
            .compare_and_update(alice.id, 0, cents(700), stale_owner)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Fenced);
        let current = AccountStore::get(&store, alice.id).await.unwrap().unwrap();
        assert_eq!(current.balance, cents(1000));

        let outcome = store
            .compare_and_update(alice.id, 0, cents(700), claimed.ownership())
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn test_compare_and_update_without_pending_transfer_is_fenced() {
        let store = MemoryStore::new();
        let alice = store.insert(NewAccount::new("Alice", cents(1000)));
        let unknown = Ownership {
            transfer_id: Uuid::new_v4(),
            epoch: 0,
        };

        let outcome = store
            .compare_and_update(alice.id, 0, cents(1), unknown)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Fenced);
    }

    #[tokio::test]
    async fn test_replace_all_drops_previous_accounts() {
        let store = MemoryStore::new();
        let old = store.insert(NewAccount::new("Old", cents(5)));

        let seeded = store
            .replace_all(crate::models::account::seed_accounts())
            .await
            .unwrap();

        assert_eq!(seeded.len(), 2);
        assert!(AccountStore::get(&store, old.id).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_begin_with_taken_key_returns_existing() {
        let store = MemoryStore::new();
        let first = TransferRecord::pending(Uuid::new_v4(), &request(Some("k1")), Utc::now());
        let second = TransferRecord::pending(Uuid::new_v4(), &request(Some("k1")), Utc::now());

        assert_eq!(
            store.begin(first.clone()).await.unwrap(),
            BeginOutcome::Started(first.clone())
        );
        assert_eq!(
            store.begin(second).await.unwrap(),
            BeginOutcome::Existing(first)
        );
    }

    #[tokio::test]
    async fn test_begin_without_key_always_starts() {
        let store = MemoryStore::new();
        for _ in 0..2 {
            let intent = TransferRecord::pending(Uuid::new_v4(), &request(None), Utc::now());
            assert!(matches!(
                store.begin(intent).await.unwrap(),
                BeginOutcome::Started(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_claim_requires_current_epoch() {
        let store = MemoryStore::new();
        let intent = TransferRecord::pending(Uuid::new_v4(), &request(Some("k")), Utc::now());
        store.begin(intent.clone()).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(30);
        assert!(store.claim(intent.id, 1, later).await.unwrap().is_none());

        let claimed = store.claim(intent.id, 0, later).await.unwrap().unwrap();
        assert_eq!(claimed.epoch, 1);
        assert_eq!(claimed.lease_until, Some(later));

        assert!(store.claim(intent.id, 0, later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_is_one_way() {
        let store = MemoryStore::new();
        let owner = start(&store).await;

        let applied = store
            .complete(
                owner,
                TransferOutcome::Applied {
                    sender_balance: cents(700),
                    receiver_balance: cents(800),
                },
            )
            .await
            .unwrap();
        let again = store
            .complete(
                owner,
                TransferOutcome::Rejected(RejectReason::InsufficientFunds),
            )
            .await
            .unwrap();

        assert_eq!(applied.status, TransferStatus::Applied);
        assert_eq!(again, applied);
    }

    #[tokio::test]
    async fn test_complete_by_previous_owner_is_ignored() {
        let store = MemoryStore::new();
        let stale_owner = start(&store).await;
        store
            .claim(stale_owner.transfer_id, stale_owner.epoch, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let record = store
            .complete(
                stale_owner,
                TransferOutcome::Rejected(RejectReason::InsufficientFunds),
            )
            .await
            .unwrap();

        assert_eq!(record.status, TransferStatus::Pending);
        assert_eq!(record.epoch, 1);
    }

    #[tokio::test]
    async fn test_find_stale_skips_live_and_released_leases() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let expired = TransferRecord::pending(
            Uuid::new_v4(),
            &request(None),
            now - chrono::Duration::seconds(5),
        );
        let live = TransferRecord::pending(
            Uuid::new_v4(),
            &request(None),
            now + chrono::Duration::seconds(30),
        );
        let released = TransferRecord::pending(Uuid::new_v4(), &request(None), now);
        for intent in [&expired, &live, &released] {
            store.begin(intent.clone()).await.unwrap();
        }
        store.release(released.ownership()).await.unwrap();

        let stale = store.find_stale(now, 10).await.unwrap();

        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, expired.id);
        assert!(store.find_stale(now, 0).await.unwrap().is_empty());
    }
}
