//! User (account) HTTP handlers.
//!
//! - POST /create-users - Replace all users with the seed set
//! - GET /users - List users
//! - GET /users/:id - Get user by ID

use crate::{
    error::AppError,
    models::account::{AccountResponse, seed_accounts},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response body for `POST /create-users`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUsersResponse {
    pub message: String,
    pub users: Vec<AccountResponse>,
}

/// Reset the account set to the seed users.
///
/// Destructive: every existing account and its revision history is removed
/// first. Meant for provisioning test environments.
///
/// # Response (201 Created)
///
/// ```json
/// {
///   "message": "Users created",
///   "users": [
///     { "id": "550e8400-...", "name": "Alice", "balance": 1000, "version": 0, ... },
///     { "id": "660e8400-...", "name": "Bob", "balance": 500, "version": 0, ... }
///   ]
/// }
/// ```
pub async fn create_users(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateUsersResponse>), AppError> {
    let users = state
        .accounts
        .replace_all(seed_accounts())
        .await
        .map_err(AppError::Provisioning)?;

    tracing::info!(count = users.len(), "Users seeded");

    Ok((
        StatusCode::CREATED,
        Json(CreateUsersResponse {
            message: "Users created".to_string(),
            users: users.into_iter().map(AccountResponse::from).collect(),
        }),
    ))
}

/// List all users, oldest first.
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<AccountResponse>>, AppError> {
    let users = state.accounts.list().await?;
    Ok(Json(users.into_iter().map(AccountResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let user = state
        .accounts
        .get(id)
        .await?
        .ok_or(AppError::UserNotFound)?;

    Ok(Json(user.into()))
}
