// ── Proposal domain types ──
//
// Proposals are the per-listing sub-resource streamed by the
// ProposalBridge. Each incoming proposal is enriched with the bidder's
// profile; the lookup is best-effort and its absence is legal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::listing::{ListingId, UserId};

/// Identifier of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(String);

impl ProposalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProposalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ProposalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An offer a bidder attached to a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub listing_id: ListingId,
    pub bidder_id: UserId,
    /// Offered amount in minor currency units.
    pub amount_cents: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Enrichment payload fetched per proposal from the profile collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidderProfile {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub rating: Option<f32>,
}

/// A proposal as surfaced to the UI: the raw record plus its (optional)
/// enrichment. The profile lookup failing never drops the proposal.
#[derive(Debug, Clone)]
pub struct ProposalEntry {
    pub proposal: Arc<Proposal>,
    pub bidder: Option<BidderProfile>,
}

impl ProposalEntry {
    /// Display name for the bidder, degrading to a placeholder when the
    /// enrichment lookup failed or returned nothing.
    pub fn bidder_name(&self) -> &str {
        self.bidder
            .as_ref()
            .map_or("unknown", |p| p.display_name.as_str())
    }
}

/// Cross-cutting "new activity" notification raised when a proposal
/// arrives on the viewer's own listing. Carried on a `watch` channel so
/// a summary view elsewhere can react without holding a subscription.
#[derive(Debug, Clone)]
pub struct ActivityNotice {
    pub proposal: Arc<Proposal>,
    pub listing_title: String,
}
