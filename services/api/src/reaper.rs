//! services/api/src/reaper.rs
//!
//! This module contains the asynchronous "worker" loop that drives the
//! stale-session reaper on a fixed interval, independent of client activity.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use study_tracker_core::reaper::StaleSessionReaper;

/// The background sweep loop.
///
/// This is a long-running task that periodically asks the reaper to sweep.
/// It is designed to be gracefully cancelled via a `CancellationToken`.
/// Individual sweep failures are logged inside the reaper and never end the
/// loop: a dead reaper would leave abandoned sessions active forever.
pub async fn reaper_loop(
    reaper: StaleSessionReaper,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "reaper loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("reaper loop cancelled");
                return;
            }
            _ = ticker.tick() => {
                let swept = reaper.sweep().await;
                if !swept.is_empty() {
                    info!(count = swept.len(), "force-closed stale sessions");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use std::sync::Arc;
    use study_tracker_core::{
        MemoryStore, ProgressAggregator, SessionLifecycleManager, StaleSessionReaper,
    };

    #[tokio::test]
    async fn loop_terminates_when_the_token_is_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let tz = FixedOffset::east_opt(0).unwrap();
        let aggregator = ProgressAggregator::new(store.clone(), store.clone(), tz, 1800);
        let engine = Arc::new(SessionLifecycleManager::new(store.clone(), aggregator));
        let reaper = StaleSessionReaper::new(store, engine, chrono::Duration::seconds(900));

        let token = CancellationToken::new();
        let handle = tokio::spawn(reaper_loop(
            reaper,
            Duration::from_secs(3600),
            token.clone(),
        ));

        token.cancel();
        // Joins rather than hanging on the hour-long tick.
        handle.await.unwrap();
    }
}
