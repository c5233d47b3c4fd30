//! Transfer engine - Core business logic for moving money between accounts.
//!
//! This service handles:
//! - Request validation and balance checks
//! - Idempotency checking and replay
//! - The two-account commit
//! - Settling transfers interrupted mid-commit
//!
//! # Atomicity Guarantees
//!
//! The account store only offers atomic updates of a single account, so the
//! engine builds the two-sided transfer itself:
//!
//! 1. A pending ledger record (the intent) is written before any balance moves.
//! 2. Both accounts are read with their versions.
//! 3. Two compare-and-update calls are issued in ascending account id order,
//!    whatever the roles. Every update is tagged with the transfer id.
//! 4. If the second update loses a version race, the first one is reverted
//!    and the attempt starts over with fresh reads.
//! 5. The record is completed.
//!
//! The revisions tagged with the transfer id tell exactly which updates took
//! effect. After a store error the engine reads them back and settles the
//! transfer to all-or-nothing on the spot. If that fails too, the intent
//! keeps its lease and is settled later, either by a replay with the same
//! idempotency key or by the recovery sweep.
//!
//! # Ownership
//!
//! Whoever claims a pending record bumps its epoch. Every balance update is
//! fenced on the epoch of the request that issues it, so a request that
//! stalled past its lease cannot write once another one took over.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{StoreError, TransferError},
    models::{
        account::{Account, AccountId, Cents, Revision},
        transfer::{
            Ownership, TransferOutcome, TransferReceipt, TransferRecord, TransferRequest,
            TransferStatus,
        },
    },
    services::retry::RetryPolicy,
    store::{AccountStore, BeginOutcome, CasOutcome, TransferLedger},
};

/// Outcome of one commit attempt.
enum Attempt {
    /// Both updates applied, in commit order.
    Applied(Account, Account),
    /// A version race was lost and anything applied was reverted.
    Conflict,
}

/// An applied transfer as seen by the request that committed it.
struct Committed {
    sender_name: String,
    receiver_name: String,
    sender_balance: Cents,
    receiver_balance: Cents,
}

/// Executes transfers against an account store and a transfer ledger.
pub struct TransferEngine {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn TransferLedger>,
    policy: RetryPolicy,
}

impl TransferEngine {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn TransferLedger>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            accounts,
            ledger,
            policy,
        }
    }

    /// Execute a transfer.
    ///
    /// # Process
    ///
    /// 1. Reject self-transfers and non-positive amounts
    /// 2. Serve a stored outcome if the idempotency key was seen before
    /// 3. Write the pending intent
    /// 4. Commit with bounded optimistic retries
    /// 5. Complete the ledger record
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: self-transfer, non-positive amount, or a reused
    ///   idempotency key with different parameters
    /// - `AccountNotFound`: sender or receiver doesn't exist
    /// - `InsufficientFunds`: sender balance below amount
    /// - `Contention`: retry budget spent on version conflicts
    /// - `InProgress`: the transfer is owned by another request
    /// - `CompensationFailed`, `StoreUnavailable`: the transfer could not be
    ///   settled now; a replay or the recovery sweep finishes it
    pub async fn execute(
        &self,
        request: TransferRequest,
    ) -> Result<TransferReceipt, TransferError> {
        validate(&request)?;

        if let Some(key) = request.idempotency_key.as_deref()
            && let Some(existing) = self.ledger.find_by_key(key).await?
        {
            return self.replay(existing, &request).await;
        }

        let intent = TransferRecord::pending(Uuid::new_v4(), &request, self.lease_deadline());
        match self.ledger.begin(intent).await? {
            BeginOutcome::Started(record) => {
                debug!(transfer_id = %record.id, "Transfer started");
                self.drive(record).await
            }
            BeginOutcome::Existing(existing) => self.replay(existing, &request).await,
        }
    }

    /// Settle pending transfers whose owner let the lease lapse.
    ///
    /// Each one is claimed, then brought to all-or-nothing from its revision
    /// log: completed as applied if both updates are in place, otherwise
    /// rolled back and released. A transfer is never run again from here;
    /// only a replay of its idempotency key does that.
    ///
    /// Returns how many transfers were settled.
    pub async fn recover_stale(&self, limit: usize) -> Result<usize, TransferError> {
        let stale = self.ledger.find_stale(Utc::now(), limit).await?;
        let mut settled = 0;

        for record in stale {
            let Some(claimed) = self
                .ledger
                .claim(record.id, record.epoch, self.lease_deadline())
                .await?
            else {
                debug!(transfer_id = %record.id, "Stale transfer was claimed elsewhere");
                continue;
            };

            match self.recover(&claimed).await {
                Ok(()) => settled += 1,
                Err(err) => {
                    error!(transfer_id = %claimed.id, error = %err, "Failed to recover transfer");
                }
            }
        }

        Ok(settled)
    }

    async fn recover(&self, record: &TransferRecord) -> Result<(), TransferError> {
        let owner = record.ownership();
        match self.settle(record).await? {
            Some((sender_balance, receiver_balance)) => {
                self.ledger
                    .complete(
                        owner,
                        TransferOutcome::Applied {
                            sender_balance,
                            receiver_balance,
                        },
                    )
                    .await?;
                info!(transfer_id = %record.id, "Recovered transfer as applied");
            }
            None => {
                self.ledger.release(owner).await?;
                info!(transfer_id = %record.id, "Recovered transfer, nothing left in flight");
            }
        }
        Ok(())
    }

    /// Answer a request whose idempotency key already has a record.
    async fn replay(
        &self,
        existing: TransferRecord,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, TransferError> {
        if !existing.matches(request) {
            return Err(TransferError::InvalidRequest(format!(
                "Idempotency key {:?} was already used for a different transfer",
                existing.idempotency_key.as_deref().unwrap_or_default()
            )));
        }

        match existing.status {
            TransferStatus::Applied => {
                info!(transfer_id = %existing.id, "Replaying applied transfer");
                let sender_name = self.display_name(existing.sender_id).await?;
                let receiver_name = self.display_name(existing.receiver_id).await?;
                receipt(&existing, sender_name, receiver_name, true)
            }
            TransferStatus::Rejected => {
                let reason = existing.reason.ok_or_else(|| {
                    StoreError::Corrupt(format!("rejected transfer {} has no reason", existing.id))
                })?;
                Err(reason.into())
            }
            TransferStatus::Pending => {
                let in_progress = TransferError::InProgress {
                    transfer_id: existing.id,
                };
                if existing.is_leased(Utc::now()) {
                    return Err(in_progress);
                }
                let Some(claimed) = self
                    .ledger
                    .claim(existing.id, existing.epoch, self.lease_deadline())
                    .await?
                else {
                    return Err(in_progress);
                };
                self.reconcile(claimed).await
            }
        }
    }

    /// Finish a claimed pending transfer for a replayed request: complete it
    /// if it took effect, otherwise roll back what applied and run it.
    async fn reconcile(&self, record: TransferRecord) -> Result<TransferReceipt, TransferError> {
        let Some((sender_balance, receiver_balance)) = self.settle(&record).await? else {
            return self.drive(record).await;
        };

        info!(
            transfer_id = %record.id,
            "Reconciled transfer applied before its record was completed"
        );
        let stored = self
            .ledger
            .complete(
                record.ownership(),
                TransferOutcome::Applied {
                    sender_balance,
                    receiver_balance,
                },
            )
            .await?;
        let sender_name = self.display_name(record.sender_id).await?;
        let receiver_name = self.display_name(record.receiver_id).await?;
        receipt(&stored, sender_name, receiver_name, true)
    }

    /// Bring an owned transfer to all-or-nothing from its revision log.
    ///
    /// Sums the revisions written under the transfer id per account:
    /// - exactly `-amount` / `+amount`: the transfer took effect; returns the
    ///   sender and receiver balances it left behind
    /// - anything else: reverts every non-zero sum and returns `None`
    async fn settle(
        &self,
        record: &TransferRecord,
    ) -> Result<Option<(Cents, Cents)>, TransferError> {
        let revisions = self.accounts.revisions_by_transfer(record.id).await?;
        let sender_net = net_delta(&revisions, record.sender_id);
        let receiver_net = net_delta(&revisions, record.receiver_id);

        if sender_net == -record.amount && receiver_net == record.amount {
            return match (
                last_balance(&revisions, record.sender_id),
                last_balance(&revisions, record.receiver_id),
            ) {
                (Some(sender_balance), Some(receiver_balance)) => {
                    Ok(Some((sender_balance, receiver_balance)))
                }
                _ => Err(StoreError::Corrupt(format!(
                    "transfer {} has deltas without revisions",
                    record.id
                ))
                .into()),
            };
        }

        for (account_id, delta) in [
            (record.sender_id, sender_net),
            (record.receiver_id, receiver_net),
        ] {
            if delta != 0 {
                warn!(
                    transfer_id = %record.id,
                    account_id = %account_id,
                    delta,
                    "Reverting partially applied transfer"
                );
                self.revert(account_id, delta, record.ownership()).await?;
            }
        }

        Ok(None)
    }

    /// Commit an owned pending transfer and complete its record.
    async fn drive(&self, record: TransferRecord) -> Result<TransferReceipt, TransferError> {
        let owner = record.ownership();
        match self.commit(&record).await {
            Ok(committed) => {
                let stored = self
                    .ledger
                    .complete(
                        owner,
                        TransferOutcome::Applied {
                            sender_balance: committed.sender_balance,
                            receiver_balance: committed.receiver_balance,
                        },
                    )
                    .await?;
                info!(
                    transfer_id = %record.id,
                    amount = record.amount,
                    sender_balance = %committed.sender_balance,
                    receiver_balance = %committed.receiver_balance,
                    "Transfer applied"
                );
                receipt(&stored, committed.sender_name, committed.receiver_name, false)
            }
            Err(err) => {
                if let Some(reason) = err.reject_reason() {
                    self.ledger
                        .complete(owner, TransferOutcome::Rejected(reason))
                        .await?;
                    info!(
                        transfer_id = %record.id,
                        reason = reason.as_str(),
                        "Transfer rejected"
                    );
                } else if matches!(
                    err,
                    TransferError::Contention { .. } | TransferError::InvalidRequest(_)
                ) {
                    // Nothing is in flight, so a retry may take the record over at once.
                    self.release(owner).await;
                }
                Err(err)
            }
        }
    }

    /// Read, validate and commit, retrying on version conflicts.
    async fn commit(&self, record: &TransferRecord) -> Result<Committed, TransferError> {
        let owner = record.ownership();
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            let sender = self.load(record.sender_id).await?;
            let receiver = self.load(record.receiver_id).await?;

            let sender_after = sender
                .balance
                .checked_sub(record.amount)
                .ok_or(TransferError::InsufficientFunds)?;
            let receiver_after = receiver.balance.checked_add(record.amount).ok_or_else(|| {
                TransferError::InvalidRequest(
                    "Transfer would overflow the receiver balance".to_string(),
                )
            })?;
            let names = (sender.name.clone(), receiver.name.clone());

            // Fixed global order: two transfers over the same pair always
            // race on the same account first.
            let mut legs = [(sender, sender_after), (receiver, receiver_after)];
            legs.sort_by_key(|(account, _)| account.id);
            let [first, second] = legs;

            match self.apply_pair(owner, first, second).await {
                Ok(Attempt::Applied(a, b)) => {
                    let (sender, receiver) = if a.id == record.sender_id { (a, b) } else { (b, a) };
                    return Ok(Committed {
                        sender_name: sender.name,
                        receiver_name: receiver.name,
                        sender_balance: sender.balance,
                        receiver_balance: receiver.balance,
                    });
                }
                Ok(Attempt::Conflict) => {
                    debug!(transfer_id = %record.id, attempt, "Version conflict, retrying");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
                Err(TransferError::StoreUnavailable(err)) => {
                    let (sender_name, receiver_name) = names;
                    return self
                        .settle_after_store_error(record, err, sender_name, receiver_name)
                        .await;
                }
                Err(err) => return Err(err),
            }
        }

        warn!(transfer_id = %record.id, attempts = max_attempts, "Transfer gave up on contention");
        Err(TransferError::Contention {
            attempts: max_attempts,
        })
    }

    /// A store error leaves the attempt's writes unknown. Read them back and
    /// settle at once. If even that fails, the intent keeps its lease and is
    /// left to a replay or the recovery sweep.
    async fn settle_after_store_error(
        &self,
        record: &TransferRecord,
        error: StoreError,
        sender_name: String,
        receiver_name: String,
    ) -> Result<Committed, TransferError> {
        warn!(transfer_id = %record.id, error = %error, "Store error during commit, settling");

        match self.settle(record).await {
            Ok(Some((sender_balance, receiver_balance))) => {
                info!(transfer_id = %record.id, "Revision log shows the transfer applied");
                Ok(Committed {
                    sender_name,
                    receiver_name,
                    sender_balance,
                    receiver_balance,
                })
            }
            Ok(None) => {
                self.release(record.ownership()).await;
                Err(TransferError::StoreUnavailable(error))
            }
            Err(err @ TransferError::InProgress { .. }) => Err(err),
            Err(err) => {
                error!(
                    transfer_id = %record.id,
                    error = %err,
                    "Could not settle transfer, leaving it to recovery"
                );
                Err(TransferError::StoreUnavailable(error))
            }
        }
    }

    /// Issue the ordered pair of compare-and-update calls.
    ///
    /// A store error is returned as is. The update it interrupted may or may
    /// not have applied; the caller settles from the revision log.
    async fn apply_pair(
        &self,
        owner: Ownership,
        (first, first_balance): (Account, Cents),
        (second, second_balance): (Account, Cents),
    ) -> Result<Attempt, TransferError> {
        let first_updated = match self
            .accounts
            .compare_and_update(first.id, first.version, first_balance, owner)
            .await?
        {
            CasOutcome::Updated(account) => account,
            CasOutcome::VersionConflict => return Ok(Attempt::Conflict),
            CasOutcome::NotFound => return Err(TransferError::AccountNotFound),
            CasOutcome::Fenced => return Err(superseded(owner)),
        };
        let first_delta = first_balance.get() - first.balance.get();

        match self
            .accounts
            .compare_and_update(second.id, second.version, second_balance, owner)
            .await?
        {
            CasOutcome::Updated(second_updated) => {
                Ok(Attempt::Applied(first_updated, second_updated))
            }
            CasOutcome::VersionConflict => {
                self.revert(first.id, first_delta, owner).await?;
                Ok(Attempt::Conflict)
            }
            CasOutcome::NotFound => {
                self.revert(first.id, first_delta, owner).await?;
                Err(TransferError::AccountNotFound)
            }
            // The new owner settles the first update from the revision log.
            CasOutcome::Fenced => Err(superseded(owner)),
        }
    }

    /// Undo a `delta` this transfer applied to `account_id`.
    ///
    /// Works on fresh reads so it composes with whatever else happened to
    /// the account since. A reversal that would overdraw the account is not
    /// attempted; the loop waits for the budget instead.
    async fn revert(
        &self,
        account_id: AccountId,
        delta: i64,
        owner: Ownership,
    ) -> Result<(), TransferError> {
        let transfer_id = owner.transfer_id;

        for attempt in 1..=self.policy.compensation_attempts {
            let Some(current) = self.accounts.get(account_id).await? else {
                break;
            };

            match current.balance.checked_sub(delta) {
                Some(restored) => match self
                    .accounts
                    .compare_and_update(account_id, current.version, restored, owner)
                    .await?
                {
                    CasOutcome::Updated(_) => {
                        debug!(
                            transfer_id = %transfer_id,
                            account_id = %account_id,
                            delta,
                            "Reverted update"
                        );
                        return Ok(());
                    }
                    CasOutcome::VersionConflict => {}
                    CasOutcome::NotFound => break,
                    CasOutcome::Fenced => return Err(superseded(owner)),
                },
                None => {
                    warn!(
                        transfer_id = %transfer_id,
                        account_id = %account_id,
                        balance = %current.balance,
                        delta,
                        attempt,
                        "Reversal would overdraw account, waiting"
                    );
                }
            }

            tokio::time::sleep(self.policy.backoff(attempt)).await;
        }

        error!(
            transfer_id = %transfer_id,
            account_id = %account_id,
            delta,
            "Could not revert partially applied transfer"
        );
        Err(TransferError::CompensationFailed { transfer_id })
    }

    async fn release(&self, owner: Ownership) {
        if let Err(err) = self.ledger.release(owner).await {
            warn!(
                transfer_id = %owner.transfer_id,
                error = %err,
                "Failed to release transfer lease"
            );
        }
    }

    async fn load(&self, id: AccountId) -> Result<Account, TransferError> {
        self.accounts
            .get(id)
            .await?
            .ok_or(TransferError::AccountNotFound)
    }

    /// Account name for messages; falls back to the id for accounts that
    /// have since been removed by reseeding.
    async fn display_name(&self, id: AccountId) -> Result<String, StoreError> {
        Ok(self
            .accounts
            .get(id)
            .await?
            .map(|account| account.name)
            .unwrap_or_else(|| id.to_string()))
    }

    fn lease_deadline(&self) -> DateTime<Utc> {
        let now = Utc::now();
        TimeDelta::from_std(self.policy.lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

fn superseded(owner: Ownership) -> TransferError {
    warn!(transfer_id = %owner.transfer_id, epoch = owner.epoch, "Transfer was taken over");
    TransferError::InProgress {
        transfer_id: owner.transfer_id,
    }
}

fn validate(request: &TransferRequest) -> Result<(), TransferError> {
    if request.from == request.to {
        return Err(TransferError::InvalidRequest(
            "Cannot transfer to same account".to_string(),
        ));
    }

    if request.amount <= 0 {
        return Err(TransferError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }

    Ok(())
}

fn net_delta(revisions: &[Revision], account_id: AccountId) -> i64 {
    revisions
        .iter()
        .filter(|r| r.account_id == account_id)
        .map(Revision::delta)
        .sum()
}

fn last_balance(revisions: &[Revision], account_id: AccountId) -> Option<Cents> {
    revisions
        .iter()
        .filter(|r| r.account_id == account_id)
        .max_by_key(|r| r.version)
        .map(|r| r.balance)
}

/// Build the caller-facing result from the ledger's view of the transfer.
fn receipt(
    record: &TransferRecord,
    sender_name: String,
    receiver_name: String,
    replayed: bool,
) -> Result<TransferReceipt, TransferError> {
    let missing_outcome = || {
        TransferError::from(StoreError::Corrupt(format!(
            "transfer {} is {} without an outcome",
            record.id,
            record.status.as_str()
        )))
    };

    match (record.status, record.sender_balance, record.receiver_balance) {
        (TransferStatus::Applied, Some(sender_balance), Some(receiver_balance)) => {
            Ok(TransferReceipt {
                transfer_id: record.id,
                sender_id: record.sender_id,
                sender_name,
                receiver_id: record.receiver_id,
                receiver_name,
                amount: record.amount,
                sender_balance,
                receiver_balance,
                replayed,
            })
        }
        (TransferStatus::Rejected, _, _) => {
            Err(record.reason.map_or_else(missing_outcome, TransferError::from))
        }
        // Another request took the record over before this one completed it.
        (TransferStatus::Pending, _, _) => Err(TransferError::InProgress {
            transfer_id: record.id,
        }),
        _ => Err(missing_outcome()),
    }
}
