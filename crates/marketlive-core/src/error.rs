// ── Error taxonomy ──
//
// Everything recoverable on a background path is absorbed into state
// (connection flag, skipped poll cycle) and logged; `FeedError` only
// surfaces from the operations a caller invokes directly.

use thiserror::Error;

/// Errors surfaced by the feed layer.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The transport collaborator failed (snapshot fetch or subscribe).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A live subscription already exists for this resource key. At most
    /// one subscription per key may be open at a time.
    #[error("a live subscription already exists for `{resource}`")]
    SubscriptionActive { resource: String },

    /// The controller or bridge has been disposed; create a fresh one.
    #[error("feed has been disposed")]
    Disposed,
}

impl FeedError {
    /// Convenience constructor for transport-side failures.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}
