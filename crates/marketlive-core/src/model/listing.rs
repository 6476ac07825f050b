// ── Listing domain type ──
//
// ListingId and UserId are opaque backend identifiers; the feed layer
// never interprets them beyond equality and hashing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Identifiers ─────────────────────────────────────────────────────

/// Stable unique identifier of a listing, as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ListingId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ListingId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a marketplace account (seller or bidder).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── ListingStatus ───────────────────────────────────────────────────

/// Lifecycle state of a listing.
///
/// Only [`Open`](ListingStatus::Open) listings participate in the
/// canonical feed; everything else is excluded as if deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ListingStatus {
    /// Awaiting moderation; not publicly visible.
    Pending,
    /// Live on the marketplace.
    Open,
    /// Sold, expired, or withdrawn.
    Closed,
}

impl ListingStatus {
    /// Whether a listing in this state belongs in the public feed.
    pub fn is_visible(self) -> bool {
        matches!(self, Self::Open)
    }
}

// ── Listing ─────────────────────────────────────────────────────────

/// A marketplace listing as delivered by the backend.
///
/// `#[serde(flatten)] extra` captures every field this layer does not
/// interpret, so nothing from the backend is silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    /// Asking price in minor currency units, when set.
    #[serde(default)]
    pub price_cents: Option<i64>,
    pub seller_id: UserId,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    /// All remaining backend fields, passed through untouched.
    #[serde(flatten, default)]
    pub extra: serde_json::Value,
}

impl Listing {
    /// Shorthand for `self.status.is_visible()`.
    pub fn is_visible(&self) -> bool {
        self.status.is_visible()
    }
}
