//! Account Transfer Service - Main Application Entry Point
//!
//! This is a REST API server that moves money between user accounts. Each
//! transfer changes both balances or neither, and can be retried safely with
//! an idempotency key.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Storage**: PostgreSQL with sqlx, or process memory without `DATABASE_URL`
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations (if configured)
//! 3. Start the recovery sweep for transfers whose owner died mid-commit
//! 4. Build HTTP router with routes and middleware
//! 5. Serve until Ctrl-C or SIGTERM, then stop the sweep and close the pool

use std::sync::Arc;

use account_transfer_service::{
    config::Config,
    db,
    handlers,
    services::recovery::RecoveryWorker,
    state::AppState,
    store::{memory::MemoryStore, postgres::PgStore},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber.
    // Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let policy = config.retry_policy();

    let (state, pool) = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::create_pool(database_url, config.database_max_connections).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            (AppState::postgres(PgStore::new(pool.clone()), policy), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping accounts in memory");
            (AppState::in_memory(Arc::new(MemoryStore::new()), policy), None)
        }
    };

    let worker = RecoveryWorker::new(state.engine.clone(), config.recovery_config());
    let recovery = tokio::spawn(async move {
        worker.run().await;
    });

    let app = handlers::router(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    recovery.abort();

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database pool closed");
    }

    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
