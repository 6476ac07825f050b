// ── Feed configuration ──

use std::time::Duration;

use serde::Deserialize;

/// Tunables for a live feed instance.
///
/// Host applications embed this in their own configuration files; every
/// field has a sensible default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Poll fallback cadence in seconds. The poll only runs while the
    /// push channel is unhealthy; the cadence itself is the throttle.
    pub poll_interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
        }
    }
}

impl FeedConfig {
    /// Poll cadence as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
