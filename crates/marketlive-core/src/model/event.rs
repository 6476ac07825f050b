// ── Change-stream events ──
//
// Events as delivered by the push channel. The feed layer applies them
// in arrival order and never reorders or coalesces: coalescing could
// lose a delete that follows an insert for the same id.

use serde::{Deserialize, Serialize};

use super::listing::{Listing, ListingId, ListingStatus};
use super::proposal::{Proposal, ProposalId};

/// A change event on the listings resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListingEvent {
    /// A new record appeared at the source.
    Insert { record: Listing },
    /// An existing record changed. `old_status` is the status the source
    /// held before the change; the engine needs it to distinguish a
    /// newly-surfaced record from an ordinary field edit.
    Update {
        old_status: ListingStatus,
        record: Listing,
    },
    /// The record was removed at the source.
    Delete { id: ListingId },
}

/// A change event on a listing's proposal sub-resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalEvent {
    Insert { proposal: Proposal },
    Delete { id: ProposalId },
}

/// Lifecycle status of a push subscription, reported by the transport.
///
/// This layer only observes the status; reconnection is the transport's
/// responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The push channel is live and delivering events.
    Established,
    /// The channel dropped; the transport is (re)connecting.
    Lost,
    /// The transport reported an error on the channel.
    Errored { message: String },
}

impl ChannelStatus {
    /// Whether the push channel can currently be trusted as the
    /// authoritative event source.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Established)
    }
}

/// Public connection read model exposed by the feed controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn channel_status_health() {
        assert!(ChannelStatus::Established.is_healthy());
        assert!(!ChannelStatus::Lost.is_healthy());
        assert!(
            !ChannelStatus::Errored {
                message: "boom".into()
            }
            .is_healthy()
        );
    }

    #[test]
    fn listing_event_tagged_serde() {
        let raw = serde_json::json!({
            "kind": "delete",
            "id": "lst-3"
        });
        let event: ListingEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(event, ListingEvent::Delete { ref id } if id.as_str() == "lst-3"));
    }
}
