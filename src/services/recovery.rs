//! Recovery sweep.
//!
//! Background loop that settles pending transfers whose owner let the lease
//! lapse, so a request that died mid-commit never leaves money in flight.

use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info};

use crate::{error::TransferError, services::transfer_service::TransferEngine};

/// Configuration for the recovery sweep.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to scan for stale transfers
    pub scan_interval: Duration,
    /// Maximum transfers settled per scan
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

pub struct RecoveryWorker {
    engine: Arc<TransferEngine>,
    config: RecoveryConfig,
}

impl RecoveryWorker {
    pub fn new(engine: Arc<TransferEngine>, config: RecoveryConfig) -> Self {
        Self { engine, config }
    }

    /// Scan forever, sleeping `scan_interval` between scans.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting recovery worker"
        );

        loop {
            if let Err(err) = self.scan_once().await {
                error!(error = %err, "Recovery scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan; returns how many transfers were settled.
    pub async fn scan_once(&self) -> Result<usize, TransferError> {
        let settled = self.engine.recover_stale(self.config.batch_size).await?;

        if settled > 0 {
            info!(count = settled, "Recovered stale transfers");
        } else {
            debug!("No stale transfers found");
        }

        Ok(settled)
    }
}
