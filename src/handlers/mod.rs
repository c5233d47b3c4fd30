//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, headers)
//! 2. Hands the work to the stores or the transfer engine
//! 3. Returns HTTP response (JSON, status code)

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod transfers;
pub mod users;

/// Build the HTTP router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/transfer", post(transfers::create_transfer))
        .route("/transfers/{id}", get(transfers::get_transfer))
        .route("/create-users", post(users::create_users))
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_user))
        .route("/health", get(health::health_check))
        // Request/response spans for every route
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
