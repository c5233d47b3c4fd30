//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables
//! into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

use crate::services::{recovery::RecoveryConfig, retry::RetryPolicy};

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string. Without it the
///   service keeps accounts in process memory.
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `TRANSFER_MAX_ATTEMPTS` (optional): commit attempts before giving up
///   with a contention error, defaults to 5
/// - `TRANSFER_BACKOFF_BASE_MS` / `TRANSFER_BACKOFF_MAX_MS` (optional):
///   exponential backoff bounds between attempts, default 10 / 250
/// - `TRANSFER_COMPENSATION_ATTEMPTS` (optional): attempts to revert a
///   half-applied transfer, defaults to 20
/// - `TRANSFER_LEASE_SECS` (optional): how long a request owns a pending
///   transfer before a replay may take it over, defaults to 30
/// - `TRANSFER_RECOVERY_INTERVAL_SECS` (optional): pause between sweeps for
///   transfers whose lease lapsed, defaults to 10
/// - `TRANSFER_RECOVERY_BATCH` (optional): transfers settled per sweep,
///   defaults to 100
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_max_attempts")]
    pub transfer_max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub transfer_backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub transfer_backoff_max_ms: u64,

    #[serde(default = "default_compensation_attempts")]
    pub transfer_compensation_attempts: u32,

    #[serde(default = "default_lease_secs")]
    pub transfer_lease_secs: u64,

    #[serde(default = "default_recovery_interval_secs")]
    pub transfer_recovery_interval_secs: u64,

    #[serde(default = "default_recovery_batch")]
    pub transfer_recovery_batch: usize,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    10
}

fn default_backoff_max_ms() -> u64 {
    250
}

fn default_compensation_attempts() -> u32 {
    20
}

fn default_lease_secs() -> u64 {
    30
}

fn default_recovery_interval_secs() -> u64 {
    10
}

fn default_recovery_batch() -> usize {
    100
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variable values cannot be parsed into
    /// expected types.
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Retry and lease settings for the transfer engine.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.transfer_max_attempts.max(1),
            base_delay: Duration::from_millis(self.transfer_backoff_base_ms),
            max_delay: Duration::from_millis(self.transfer_backoff_max_ms),
            compensation_attempts: self.transfer_compensation_attempts.max(1),
            lease: Duration::from_secs(self.transfer_lease_secs),
        }
    }

    /// Settings for the background recovery sweep.
    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            scan_interval: Duration::from_secs(self.transfer_recovery_interval_secs.max(1)),
            batch_size: self.transfer_recovery_batch.max(1),
        }
    }
}
