//! Periodic liveness sweep.
//!
//! Runs on a fixed period independent of message arrival and stops within
//! one tick of the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use super::DeviceRegistry;
use crate::config::format_duration;

/// Sweep the registry every `period` until `shutdown` flips to `true`.
pub async fn run_liveness_sweeper(
    registry: Arc<DeviceRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick fires immediately; nothing can be stale yet.
    ticker.tick().await;

    log::info!(
        "Liveness sweeper started (interval: {}, timeout: {})",
        format_duration(period),
        format_duration(registry.liveness_timeout())
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                let demoted = registry.sweep_liveness(Utc::now());
                if !demoted.is_empty() {
                    log::debug!("Liveness sweep demoted {} device(s)", demoted.len());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    log::info!("Liveness sweeper stopped");
}
