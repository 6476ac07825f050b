//! Domain model for the live feed layer.
//!
//! Records are opaque backend entities with a stable `id`, a small
//! closed status set, and a creation timestamp. The feed layer only
//! interprets identity, status visibility, and event ordering.

pub mod event;
pub mod listing;
pub mod proposal;

pub use event::{ChannelStatus, ConnectionState, ListingEvent, ProposalEvent};
pub use listing::{Listing, ListingId, ListingStatus, UserId};
pub use proposal::{ActivityNotice, BidderProfile, Proposal, ProposalEntry, ProposalId};
