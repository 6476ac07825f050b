// ── Poll fallback ──
//
// Periodic full-snapshot re-fetch, active only while the push channel
// is unhealthy. The cadence itself is the throttle: a failed fetch just
// waits for the next tick, no backoff. This is an acceptable-loss
// background refresh, not a critical path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::ReconciliationEngine;
use crate::monitor::ConnectionMonitor;
use crate::source::FeedTransport;

/// Re-fetch the full snapshot once per interval while the push channel
/// is down, reconciling the result into the engine.
pub(crate) async fn poll_fallback_task(
    engine: Arc<ReconciliationEngine>,
    monitor: Arc<ConnectionMonitor>,
    transport: Arc<dyn FeedTransport>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if monitor.is_healthy() {
                    // Push channel is authoritative while healthy.
                    continue;
                }

                match transport.fetch_all().await {
                    Ok(snapshot) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let count = snapshot.len();
                        engine.reconcile_with_snapshot(snapshot);
                        monitor.touch();
                        debug!(records = count, "poll fallback reconciled snapshot");
                    }
                    Err(e) => {
                        warn!(error = %e, "poll fallback fetch failed, retrying next interval");
                    }
                }
            }
        }
    }

    debug!("poll fallback task exiting");
}
