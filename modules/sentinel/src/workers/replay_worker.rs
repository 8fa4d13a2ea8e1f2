//! Scheduled background maintenance
//!
//! Long-lived loops: the replay worker drains due DLQ items on an interval,
//! the cleanup tick removes old terminal rows daily, and the health monitor
//! keeps dependency status warm and logs anything degraded.

use std::time::Duration;

use tracing::{info, warn};

use crate::repos::dlq_repo;
use crate::services::replay::{self, DEFAULT_REPLAY_RATE_PER_SECOND};
use crate::state::AppState;

const REPLAY_BATCH_LIMIT: i64 = 50;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const HEALTH_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically drain due DLQ items through the orchestrator.
pub fn spawn_replay_worker(state: AppState) {
    let interval = Duration::from_secs(state.config.replay_interval_seconds);
    tokio::spawn(async move {
        info!(interval_seconds = interval.as_secs(), "dlq replay worker started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match replay::replay_batch(
                &state,
                REPLAY_BATCH_LIMIT,
                None,
                DEFAULT_REPLAY_RATE_PER_SECOND,
            )
            .await
            {
                Ok(result) if result.fetched > 0 => {
                    info!(
                        fetched = result.fetched,
                        succeeded = result.succeeded,
                        failed = result.failed,
                        "scheduled dlq replay finished"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scheduled dlq replay failed"),
            }
        }
    });
}

/// Daily removal of old PROCESSED/FAILED DLQ rows.
pub fn spawn_dlq_cleanup(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match dlq_repo::cleanup(&state.pool, state.config.dlq_cleanup_days, None).await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "dlq cleanup removed old terminal items");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "dlq cleanup failed"),
            }
        }
    });
}

/// Keep dependency health warm; log degraded services and open breakers.
pub fn spawn_health_monitor(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let system = state.health.system_health(true).await;
            if !system.overall_healthy {
                let degraded: Vec<&str> = system
                    .services
                    .values()
                    .filter(|h| !h.is_healthy())
                    .map(|h| h.service.as_str())
                    .collect();
                warn!(
                    degraded = ?degraded,
                    open_breakers = ?system.open_circuit_breakers,
                    "system health degraded"
                );
            }
        }
    });
}
