// ── Connection health monitor ──
//
// Tracks whether the push channel is currently established and when the
// feed last absorbed a change. No I/O of its own: the transport owns
// reconnection, this component only reports state.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{ChannelStatus, ConnectionState};

/// Health signal for one push subscription.
pub struct ConnectionMonitor {
    healthy: watch::Sender<bool>,
    last_update: watch::Sender<DateTime<Utc>>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    /// Starts unhealthy; flips on the first `Established` status.
    pub fn new() -> Self {
        let (healthy, _) = watch::channel(false);
        let (last_update, _) = watch::channel(Utc::now());
        Self {
            healthy,
            last_update,
        }
    }

    /// Apply a subscription-lifecycle status reported by the transport.
    /// Flips the health flag synchronously.
    ///
    /// `send_modify` rather than `send`: the flag must update even when
    /// nobody holds a receiver, and `watch::Sender::send` leaves the
    /// value unchanged without one.
    pub fn apply_status(&self, status: &ChannelStatus) {
        match status {
            ChannelStatus::Established => {
                debug!("push channel established");
                self.healthy.send_modify(|h| *h = true);
            }
            ChannelStatus::Lost => {
                debug!("push channel lost");
                self.healthy.send_modify(|h| *h = false);
            }
            ChannelStatus::Errored { message } => {
                warn!(error = %message, "push channel errored");
                self.healthy.send_modify(|h| *h = false);
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        *self.healthy.borrow()
    }

    /// Subscribe to health flips.
    pub fn subscribe_health(&self) -> watch::Receiver<bool> {
        self.healthy.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.is_healthy() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Record that the feed just absorbed a change (push event applied,
    /// poll reconciliation, or forced refresh).
    pub fn touch(&self) {
        self.last_update.send_modify(|t| *t = Utc::now());
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        *self.last_update.borrow()
    }

    pub fn subscribe_last_update(&self) -> watch::Receiver<DateTime<Utc>> {
        self.last_update.subscribe()
    }
}
