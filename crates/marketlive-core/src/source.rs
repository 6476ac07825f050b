// ── Transport seam ──
//
// The feed layer does not own any I/O. Hosts inject the push channel,
// the snapshot fetch, and the profile lookup through these traits;
// tests inject channel-backed doubles.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_core::future::BoxFuture;
use tokio::sync::{broadcast, watch};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::model::{
    BidderProfile, ChannelStatus, Listing, ListingEvent, ListingId, ProposalEvent, UserId,
};

/// Resource key for the listings change stream.
pub const LISTINGS_KEY: &str = "listings";

/// Resource key for a single listing's proposal stream.
pub fn proposals_key(listing: &ListingId) -> String {
    format!("proposals:{listing}")
}

// ── Subscription handles ────────────────────────────────────────────

/// Handle to an open listings change stream.
///
/// Bundles the event receiver with a `watch` of the channel's lifecycle
/// status. The transport owns reconnection; this layer only observes.
pub struct ListingSubscription {
    pub events: broadcast::Receiver<Arc<ListingEvent>>,
    pub status: watch::Receiver<ChannelStatus>,
}

impl ListingSubscription {
    pub fn new(
        events: broadcast::Receiver<Arc<ListingEvent>>,
        status: watch::Receiver<ChannelStatus>,
    ) -> Self {
        Self { events, status }
    }
}

/// Handle to an open proposal stream, scoped to one listing.
pub struct ProposalSubscription {
    pub events: broadcast::Receiver<Arc<ProposalEvent>>,
    pub status: watch::Receiver<ChannelStatus>,
}

impl ProposalSubscription {
    pub fn new(
        events: broadcast::Receiver<Arc<ProposalEvent>>,
        status: watch::Receiver<ChannelStatus>,
    ) -> Self {
        Self { events, status }
    }
}

// ── Collaborator traits ─────────────────────────────────────────────

/// The push + snapshot primitive consumed by the feed layer.
pub trait FeedTransport: Send + Sync {
    /// Full snapshot fetch. Used at seed time, on force refresh, and by
    /// the poll fallback.
    fn fetch_all(&self) -> BoxFuture<'static, Result<Vec<Listing>, FeedError>>;

    /// Open the listings change stream.
    fn subscribe_listings(&self) -> Result<ListingSubscription, FeedError>;

    /// Open the proposal stream for a single listing.
    fn subscribe_proposals(
        &self,
        listing: &ListingId,
    ) -> Result<ProposalSubscription, FeedError>;
}

/// Best-effort profile lookup used to enrich incoming proposals.
///
/// `Ok(None)` and `Err` both degrade to a placeholder on the consumer
/// side; the lookup never blocks an event from being surfaced.
pub trait ProfileLookup: Send + Sync {
    fn lookup(
        &self,
        user: &UserId,
    ) -> BoxFuture<'static, Result<Option<BidderProfile>, FeedError>>;
}

// ── Subscription guard registry ─────────────────────────────────────

/// Registry enforcing at most one live subscription per resource key.
///
/// A permit is acquired at subscribe time and released when dropped
/// (i.e. on disposal). Re-creating a controller before disposing the
/// previous one is a caller bug surfaced as
/// [`FeedError::SubscriptionActive`] rather than a second live stream.
#[derive(Clone, Default)]
pub struct SubscriptionGuards {
    active: Arc<DashMap<String, ()>>,
}

impl SubscriptionGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the key. Fails if a permit for it is outstanding.
    pub fn acquire(&self, key: &str) -> Result<SubscriptionPermit, FeedError> {
        match self.active.entry(key.to_owned()) {
            Entry::Occupied(_) => Err(FeedError::SubscriptionActive {
                resource: key.to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(SubscriptionPermit {
                    key: key.to_owned(),
                    registry: Arc::clone(&self.active),
                })
            }
        }
    }

    /// Whether a permit for `key` is currently held.
    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }
}

/// RAII claim on a resource key. Dropping it frees the key.
pub struct SubscriptionPermit {
    key: String,
    registry: Arc<DashMap<String, ()>>,
}

impl Drop for SubscriptionPermit {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

// ── Composition bundle ──────────────────────────────────────────────

/// Everything a controller or bridge needs to come up: the injected
/// collaborators, the shared guard registry, and the config.
#[derive(Clone)]
pub struct FeedContext {
    pub transport: Arc<dyn FeedTransport>,
    pub profiles: Arc<dyn ProfileLookup>,
    pub config: FeedConfig,
    guards: SubscriptionGuards,
}

impl FeedContext {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        profiles: Arc<dyn ProfileLookup>,
        config: FeedConfig,
    ) -> Self {
        Self {
            transport,
            profiles,
            config,
            guards: SubscriptionGuards::new(),
        }
    }

    pub(crate) fn guards(&self) -> &SubscriptionGuards {
        &self.guards
    }
}
