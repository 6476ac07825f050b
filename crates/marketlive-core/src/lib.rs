//! Live feed synchronization layer for marketplace listings.
//!
//! Keeps a locally held listing feed consistent with a remote source
//! that pushes change events over a long-lived subscription, while
//! tolerating channel outages through a polling fallback — and while
//! deliberately *not* splicing new arrivals into a list the user is
//! scrolling:
//!
//! - **[`LiveFeedController`]** — composition root per resource feed.
//!   [`open()`](LiveFeedController::open) seeds the canonical list,
//!   opens exactly one push subscription, and starts the poll fallback;
//!   [`dispose()`](LiveFeedController::dispose) tears it all down
//!   idempotently.
//!
//! - **[`ReconciliationEngine`]** — applies insert/update/delete events
//!   and poll snapshots to the canonical list and the pending staging
//!   buffer under a fixed policy. New arrivals stage until the user
//!   commits them; the visible list never changes shape without
//!   explicit intent.
//!
//! - **[`ConnectionMonitor`]** — reports push-channel health from the
//!   transport's lifecycle callbacks; the poll fallback runs only while
//!   unhealthy.
//!
//! - **[`ProposalBridge`]** — per-listing live view of the proposal
//!   sub-resource, enriched with bidder profiles and raising a
//!   cross-cutting [`ActivityNotice`] for the viewer's own listings.
//!
//! The layer owns no I/O: hosts inject [`FeedTransport`] and
//! [`ProfileLookup`] implementations through a [`FeedContext`].

pub mod bridge;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod model;
pub mod monitor;
mod poll;
pub mod source;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::ProposalBridge;
pub use config::FeedConfig;
pub use controller::{FeedPhase, LiveFeedController};
pub use engine::ReconciliationEngine;
pub use error::FeedError;
pub use monitor::ConnectionMonitor;
pub use source::{
    FeedContext, FeedTransport, LISTINGS_KEY, ListingSubscription, ProfileLookup,
    ProposalSubscription, SubscriptionGuards, SubscriptionPermit, proposals_key,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ActivityNotice, BidderProfile, ChannelStatus, ConnectionState, Listing, ListingEvent,
    ListingId, ListingStatus, Proposal, ProposalEntry, ProposalEvent, ProposalId, UserId,
};
