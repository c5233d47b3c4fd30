//! Transfer data models and API request/response types.
//!
//! This module defines:
//! - `TransferRequest`: a validated-shape request handed to the engine
//! - `TransferPayload`: the wire body of `POST /transfer`
//! - `TransferRecord`: the idempotency/audit ledger entry
//! - `TransferReceipt`: the engine's outcome for an applied transfer
//! - `TransferResponse`: Response body returned to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::account::{AccountId, Cents, TransferId},
};

/// A transfer as the engine sees it.
///
/// Only the shape is guaranteed here (ids are UUIDs, amount is an integer).
/// Value checks such as self-transfer and non-positive amounts belong to the
/// engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: i64,
    pub idempotency_key: Option<String>,
}

/// Request body for `POST /transfer`.
///
/// # JSON Example
///
/// ```json
/// {
///   "fromUserId": "550e8400-e29b-41d4-a716-446655440000",
///   "toUserId": "660e8400-e29b-41d4-a716-446655440001",
///   "amount": 300,
///   "idempotencyKey": "invoice-789"
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: serde_json::Number,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl TransferPayload {
    /// Convert the wire body into a [`TransferRequest`].
    ///
    /// `header_key` is the `Idempotency-Key` header, used when the body does
    /// not carry a key of its own. A self-transfer is reported before any
    /// problem with the amount.
    pub fn into_request(self, header_key: Option<String>) -> Result<TransferRequest, String> {
        let from = parse_user_id("fromUserId", &self.from_user_id)?;
        let to = parse_user_id("toUserId", &self.to_user_id)?;
        if from == to {
            return Err("Cannot transfer to same account".to_string());
        }
        let amount = self
            .amount
            .as_i64()
            .ok_or_else(|| format!("amount must be an integer, got {}", self.amount))?;

        let idempotency_key = match self.idempotency_key.or(header_key) {
            Some(key) if key.trim().is_empty() => {
                return Err("idempotency key must not be blank".to_string());
            }
            key => key,
        };

        Ok(TransferRequest {
            from,
            to,
            amount,
            idempotency_key,
        })
    }
}

fn parse_user_id(field: &str, value: &str) -> Result<AccountId, String> {
    Uuid::parse_str(value).map_err(|_| format!("{field} is not a valid user id: {value:?}"))
}

/// Ledger status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Intent written, balances possibly in flight
    Pending,
    /// Both balances updated
    Applied,
    /// Definitively refused, no balance touched
    Rejected,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Applied => "applied",
            TransferStatus::Rejected => "rejected",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransferStatus::Pending),
            "applied" => Some(TransferStatus::Applied),
            "rejected" => Some(TransferStatus::Rejected),
            _ => None,
        }
    }
}

/// Why a transfer was rejected. Only definitive business outcomes are
/// recorded; transient failures leave the intent pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AccountNotFound,
    InsufficientFunds,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::AccountNotFound => "account_not_found",
            RejectReason::InsufficientFunds => "insufficient_funds",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "account_not_found" => Some(RejectReason::AccountNotFound),
            "insufficient_funds" => Some(RejectReason::InsufficientFunds),
            _ => None,
        }
    }
}

/// How a pending transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Applied {
        sender_balance: Cents,
        receiver_balance: Cents,
    },
    Rejected(RejectReason),
}

/// Idempotency/audit ledger entry.
///
/// # Lifecycle
///
/// Written as `Pending` before any balance is touched, with a lease that
/// marks the request currently driving it. Moves once to `Applied` or
/// `Rejected` and is immutable from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub idempotency_key: Option<String>,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: i64,
    pub status: TransferStatus,
    pub reason: Option<RejectReason>,
    pub sender_balance: Option<Cents>,
    pub receiver_balance: Option<Cents>,

    /// Owner lease of a pending record. `None` once released or completed.
    pub lease_until: Option<DateTime<Utc>>,

    /// Ownership generation, bumped by every claim. Writes made on behalf
    /// of the transfer carry the epoch they were started under.
    pub epoch: i64,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    /// A fresh pending intent for `request`.
    pub fn pending(id: TransferId, request: &TransferRequest, lease_until: DateTime<Utc>) -> Self {
        Self {
            id,
            idempotency_key: request.idempotency_key.clone(),
            sender_id: request.from,
            receiver_id: request.to,
            amount: request.amount,
            status: TransferStatus::Pending,
            reason: None,
            sender_balance: None,
            receiver_balance: None,
            lease_until: Some(lease_until),
            epoch: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// The fence token of the current owner.
    pub fn ownership(&self) -> Ownership {
        Ownership {
            transfer_id: self.id,
            epoch: self.epoch,
        }
    }

    /// Whether `request` asks for the same movement of money as this record.
    pub fn matches(&self, request: &TransferRequest) -> bool {
        self.sender_id == request.from
            && self.receiver_id == request.to
            && self.amount == request.amount
    }

    /// Whether another request currently owns this pending record.
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease_until.is_some_and(|until| until > now)
    }

    /// Apply the final outcome in place.
    pub fn complete(&mut self, outcome: TransferOutcome, at: DateTime<Utc>) {
        match outcome {
            TransferOutcome::Applied {
                sender_balance,
                receiver_balance,
            } => {
                self.status = TransferStatus::Applied;
                self.sender_balance = Some(sender_balance);
                self.receiver_balance = Some(receiver_balance);
            }
            TransferOutcome::Rejected(reason) => {
                self.status = TransferStatus::Rejected;
                self.reason = Some(reason);
            }
        }
        self.lease_until = None;
        self.completed_at = Some(at);
    }
}

/// Fence token for writes made on behalf of a pending transfer.
///
/// Stores apply a write only while the record is still pending at this
/// epoch, in the same atomic step as the write itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub transfer_id: TransferId,
    pub epoch: i64,
}

/// Raw `transfers` row as read by sqlx.
#[derive(Debug, sqlx::FromRow)]
pub struct TransferRow {
    pub id: Uuid,
    pub idempotency_key: Option<String>,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub amount: i64,
    pub status: String,
    pub reason: Option<String>,
    pub sender_balance: Option<i64>,
    pub receiver_balance: Option<i64>,
    pub lease_until: Option<DateTime<Utc>>,
    pub epoch: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TransferRow> for TransferRecord {
    type Error = StoreError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("transfer {}: {what}", row.id));

        let status = TransferStatus::parse(&row.status)
            .ok_or_else(|| corrupt(&format!("unknown status {:?}", row.status)))?;
        let reason = row
            .reason
            .as_deref()
            .map(|r| {
                RejectReason::parse(r).ok_or_else(|| corrupt(&format!("unknown reason {r:?}")))
            })
            .transpose()?;
        let balance = |value: Option<i64>| {
            value
                .map(|v| Cents::new(v).ok_or_else(|| corrupt("negative balance")))
                .transpose()
        };

        Ok(Self {
            id: row.id,
            idempotency_key: row.idempotency_key,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            amount: row.amount,
            status,
            reason,
            sender_balance: balance(row.sender_balance)?,
            receiver_balance: balance(row.receiver_balance)?,
            lease_until: row.lease_until,
            epoch: row.epoch,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// Engine result for an applied transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub sender_id: AccountId,
    pub sender_name: String,
    pub receiver_id: AccountId,
    pub receiver_name: String,
    pub amount: i64,
    pub sender_balance: Cents,
    pub receiver_balance: Cents,

    /// True when this result was served from the ledger rather than produced
    /// by this call.
    pub replayed: bool,
}

/// Response body for a successful `POST /transfer`.
///
/// # JSON Example
///
/// ```json
/// {
///   "message": "Transferred 300 from Alice to Bob",
///   "senderBalance": 700,
///   "receiverBalance": 800,
///   "transferId": "770e8400-e29b-41d4-a716-446655440002",
///   "replayed": false
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub message: String,
    pub sender_balance: Cents,
    pub receiver_balance: Cents,
    pub transfer_id: Uuid,
    pub replayed: bool,
}

impl From<TransferReceipt> for TransferResponse {
    fn from(receipt: TransferReceipt) -> Self {
        Self {
            message: format!(
                "Transferred {} from {} to {}",
                receipt.amount, receipt.sender_name, receipt.receiver_name
            ),
            sender_balance: receipt.sender_balance,
            receiver_balance: receipt.receiver_balance,
            transfer_id: receipt.transfer_id,
            replayed: receipt.replayed,
        }
    }
}

/// Response body for `GET /transfers/{id}`.
///
/// The lease is an internal ownership detail and is left out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecordResponse {
    pub id: Uuid,
    pub idempotency_key: Option<String>,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: i64,
    pub status: TransferStatus,
    pub reason: Option<RejectReason>,
    pub sender_balance: Option<Cents>,
    pub receiver_balance: Option<Cents>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<TransferRecord> for TransferRecordResponse {
    fn from(record: TransferRecord) -> Self {
        Self {
            id: record.id,
            idempotency_key: record.idempotency_key,
            from_user_id: record.sender_id,
            to_user_id: record.receiver_id,
            amount: record.amount,
            status: record.status,
            reason: record.reason,
            sender_balance: record.sender_balance,
            receiver_balance: record.receiver_balance,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}
