//! Background workers: the billing tick and the stale-lock crank.
//!
//! Both run on a fixed interval and stop on a watch-channel shutdown
//! signal. The billing worker drives the processor's discovery/dispatch
//! loop; the crank is the watchdog that returns abandoned `processing`
//! locks so a crashed worker cannot strand a subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::processor::RedemptionProcessor;

/// Billing worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Stale-lock crank configuration
#[derive(Debug, Clone)]
pub struct CrankConfig {
    pub poll_interval: Duration,
}

impl Default for CrankConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Spawn the periodic billing worker. Returns the task handle and a
/// shutdown sender; send `true` to stop the worker.
pub fn spawn_billing_worker(
    processor: Arc<RedemptionProcessor>,
    config: WorkerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = config.poll_interval.as_secs(), "Billing worker started");
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match processor.run_billing_cycle().await {
                        Ok(report) if report.discovered > 0 => {
                            info!(
                                discovered = report.discovered,
                                succeeded = report.succeeded,
                                "Billing tick complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Billing tick failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Billing worker shutting down");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}

/// Spawn the stale-lock crank.
pub fn spawn_reclaim_crank(
    processor: Arc<RedemptionProcessor>,
    config: CrankConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = config.poll_interval.as_secs(), "Stale-lock crank started");
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = processor.reclaim_stale_locks().await {
                        error!(error = %e, "Stale-lock reclaim failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Stale-lock crank shutting down");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}
