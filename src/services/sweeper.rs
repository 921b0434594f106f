//! Session sweeper: background expiry for idle chat sessions.
//!
//! DESIGN
//! ======
//! Only spawned when an idle TTL is configured. Each tick removes sessions
//! idle for longer than the TTL; the store lock is held for one `retain`
//! pass, never across the sleep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::session::SessionStore;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep a quarter of the TTL, clamped to 1s..=60s.
#[must_use]
pub fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 4).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
}

/// Spawn the sweeper loop. Returns a handle for shutdown.
pub fn spawn_session_sweeper(sessions: SessionStore, interval: Duration) -> JoinHandle<()> {
    info!(interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX), "chat session sweeper started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let removed = sessions.prune_expired();
            if removed > 0 {
                debug!(removed, remaining = sessions.session_count(), "expired idle chat sessions");
            }
        }
    })
}

#[cfg(test)]
#[path = "sweeper_test.rs"]
mod tests;
