//! Transfer HTTP handlers.
//!
//! This module implements the transfer endpoints:
//! - POST /transfer - Move money between two users
//! - GET /transfers/:id - Get the ledger record of a transfer

use crate::{
    error::AppError,
    models::transfer::{TransferPayload, TransferRecordResponse, TransferResponse},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::HeaderMap,
};
use uuid::Uuid;

/// Header carrying the idempotency key when it is not part of the body.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Transfer money between users.
///
/// # Request Body
///
/// ```json
/// {
///   "fromUserId": "550e8400-...",
///   "toUserId": "660e8400-...",
///   "amount": 300,
///   "idempotencyKey": "invoice-789"
/// }
/// ```
///
/// `idempotencyKey` is optional and may be sent as an `Idempotency-Key`
/// header instead. The body wins when both are present.
///
/// # Response (200)
///
/// ```json
/// {
///   "message": "Transferred 300 from Alice to Bob",
///   "senderBalance": 700,
///   "receiverBalance": 800,
///   "transferId": "770e8400-...",
///   "replayed": false
/// }
/// ```
///
/// # Errors
///
/// - **400**: Malformed body, self-transfer, non-positive amount, or
///   insufficient balance
/// - **404**: Sender or receiver doesn't exist
/// - **409**: Retry budget exhausted, or the key is held by another request
/// - **500**: Store failure
pub async fn create_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TransferPayload>, JsonRejection>,
) -> Result<Json<TransferResponse>, AppError> {
    let Json(payload) =
        payload.map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))?;

    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| value.to_str().map(str::to_string))
        .transpose()
        .map_err(|_| {
            AppError::InvalidRequest("Idempotency-Key header is not valid text".to_string())
        })?;

    let request = payload
        .into_request(header_key)
        .map_err(AppError::InvalidRequest)?;

    // Detached from the connection: a client hanging up must not stop a
    // commit between its two account updates.
    let engine = state.engine.clone();
    let receipt = tokio::spawn(async move { engine.execute(request).await })
        .await
        .map_err(|err| AppError::Internal(format!("transfer task failed: {err}")))??;

    Ok(Json(receipt.into()))
}

/// Get a transfer's ledger record by ID.
///
/// # Response (200)
///
/// ```json
/// {
///   "id": "770e8400-...",
///   "idempotencyKey": "invoice-789",
///   "fromUserId": "550e8400-...",
///   "toUserId": "660e8400-...",
///   "amount": 300,
///   "status": "applied",
///   "reason": null,
///   "senderBalance": 700,
///   "receiverBalance": 800,
///   "createdAt": "2025-12-21T16:00:00Z",
///   "completedAt": "2025-12-21T16:00:00Z"
/// }
/// ```
pub async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransferRecordResponse>, AppError> {
    let record = state
        .ledger
        .get(id)
        .await?
        .ok_or(AppError::TransferNotFound)?;

    Ok(Json(record.into()))
}
