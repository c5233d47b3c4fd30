//! Error types and HTTP error response handling.
//!
//! This module defines the errors of each layer and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//!
//! - `StoreError`: account store and transfer ledger failures
//! - `TransferError`: outcomes of the transfer engine other than success
//! - `AppError`: everything a handler can return

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::models::transfer::RejectReason;

/// Failure of the underlying storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row violates an invariant the application relies on.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Non-success outcomes of a transfer.
///
/// # Retry semantics
///
/// - `InvalidRequest`, `AccountNotFound`, `InsufficientFunds`: final, the
///   caller must change something before trying again
/// - `Contention`, `InProgress`: transient, the caller may retry the whole
///   request later (with the same idempotency key)
/// - `CompensationFailed`, `StoreUnavailable`: the outcome is settled by
///   reconciliation when the request is replayed with its idempotency key
///
/// Version conflicts never appear here; they are retried inside the engine
/// and only surface as `Contention` once the retry budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Insufficient balance")]
    InsufficientFunds,

    #[error("Transfer abandoned after {attempts} conflicting attempts")]
    Contention { attempts: u32 },

    #[error("Transfer {transfer_id} is already being processed")]
    InProgress { transfer_id: Uuid },

    #[error("Transfer {transfer_id} could not be reverted after a partial commit")]
    CompensationFailed { transfer_id: Uuid },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl TransferError {
    /// The ledger reason for definitive business rejections.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            TransferError::AccountNotFound => Some(RejectReason::AccountNotFound),
            TransferError::InsufficientFunds => Some(RejectReason::InsufficientFunds),
            _ => None,
        }
    }
}

impl From<RejectReason> for TransferError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::AccountNotFound => TransferError::AccountNotFound,
            RejectReason::InsufficientFunds => TransferError::InsufficientFunds,
        }
    }
}

/// Application-wide error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Request body or parameters are malformed.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Transfer not found")]
    TransferNotFound,

    /// Seeding the account set failed.
    #[error("Error creating users: {0}")]
    Provisioning(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// { "message": "Human-readable summary", "error": "detail" }
/// ```
///
/// `error` is omitted for "User not found" and "Insufficient balance".
///
/// # Status Code Mapping
///
/// - `InvalidRequest` → 400 Bad Request
/// - `InsufficientFunds` → 400 Bad Request
/// - `AccountNotFound`, `UserNotFound`, `TransferNotFound` → 404 Not Found
/// - `Contention`, `InProgress` → 409 Conflict
/// - everything else → 500 Internal Server Error (hides database details)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        const HIDDEN: &str = "An internal error occurred";

        let (status, message, error): (StatusCode, &str, Option<String>) = match self {
            AppError::InvalidRequest(msg)
            | AppError::Transfer(TransferError::InvalidRequest(msg)) => (
                StatusCode::BAD_REQUEST,
                "Invalid transfer request",
                Some(msg),
            ),
            AppError::Transfer(TransferError::AccountNotFound) | AppError::UserNotFound => {
                (StatusCode::NOT_FOUND, "User not found", None)
            }
            AppError::TransferNotFound => (StatusCode::NOT_FOUND, "Transfer not found", None),
            AppError::Transfer(TransferError::InsufficientFunds) => {
                (StatusCode::BAD_REQUEST, "Insufficient balance", None)
            }
            AppError::Transfer(err @ TransferError::Contention { .. }) => (
                StatusCode::CONFLICT,
                "Transfer contention, retry later",
                Some(err.to_string()),
            ),
            AppError::Transfer(err @ TransferError::InProgress { .. }) => (
                StatusCode::CONFLICT,
                "Transfer already in progress",
                Some(err.to_string()),
            ),
            AppError::Transfer(err @ TransferError::CompensationFailed { .. }) => {
                tracing::error!(error = %err, "Transfer left unsettled");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Transfer failed",
                    Some(err.to_string()),
                )
            }
            AppError::Transfer(TransferError::StoreUnavailable(err)) => {
                tracing::error!(error = %err, "Transfer failed on store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Transfer failed",
                    Some(HIDDEN.to_string()),
                )
            }
            AppError::Provisioning(err) => {
                tracing::error!(error = %err, "Seeding users failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error creating users",
                    Some(HIDDEN.to_string()),
                )
            }
            AppError::Store(err) => {
                tracing::error!(error = %err, "Store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Request failed",
                    Some(HIDDEN.to_string()),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Request failed",
                    Some(HIDDEN.to_string()),
                )
            }
        };

        let body = match error {
            Some(error) => json!({ "message": message, "error": error }),
            None => json!({ "message": message }),
        };

        (status, Json(body)).into_response()
    }
}
