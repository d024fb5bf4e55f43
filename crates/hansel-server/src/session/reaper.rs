//! Idle session eviction
//!
//! Disabled unless `idle_timeout` is configured. A session whose last
//! inbound traffic is older than the timeout is closed; its own connection
//! task then finishes teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hansel_core::time::current_time_millis;

use crate::registry::ClientRegistry;

/// Run the idle reaper until `cancel` fires
pub async fn run_idle_reaper(
    registry: Arc<ClientRegistry>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) {
    let period = reap_interval(idle_timeout);
    let mut interval = tokio::time::interval(period);

    tracing::info!(
        "Starting idle reaper (timeout: {:?}, check interval: {:?})",
        idle_timeout,
        period
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                reap_idle(&registry, idle_timeout);
            }
            _ = cancel.cancelled() => {
                tracing::info!("Idle reaper shutting down");
                break;
            }
        }
    }
}

/// Close every session idle for longer than `idle_timeout`; returns how
/// many were closed
pub fn reap_idle(registry: &ClientRegistry, idle_timeout: Duration) -> usize {
    let now = current_time_millis();
    let cutoff = now.saturating_sub(idle_timeout.as_millis() as u64);
    let mut closed = 0;

    for session in registry.sessions() {
        let last_seen = session.last_seen();
        // close() only succeeds once, even if the connection is failing concurrently
        if last_seen < cutoff && session.close() {
            tracing::info!(
                "Closing idle {} ({}, silent for {}ms)",
                session.id(),
                session.client_name(),
                now.saturating_sub(last_seen)
            );
            closed += 1;
        }
    }

    if closed > 0 {
        tracing::info!("Closed {} idle sessions", closed);
    }
    closed
}

fn reap_interval(idle_timeout: Duration) -> Duration {
    (idle_timeout / 2).clamp(Duration::from_secs(1), Duration::from_secs(10))
}
