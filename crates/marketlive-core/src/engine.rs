// ── Reconciliation engine ──
//
// Owns the canonical visible list and the pending staging buffer, and
// applies push events and poll snapshots to them under a fixed policy.
//
// New arrivals are staged rather than spliced into the canonical list:
// the visible list never changes shape without explicit user intent
// (commit or forced refresh), while the pending count lets the UI offer
// a "N new — tap to load" affordance. Invariants:
//
//   - canonical list is unique by id and holds only visible listings
//   - a given id is never in both the canonical list and the pending
//     buffer at the same time
//
// Every mutation rebuilds the watch snapshots, in the same shape the
// reactive collections publish theirs (`Arc<Vec<Arc<T>>>`).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::trace;

use crate::model::{Listing, ListingId, ListingStatus};

#[derive(Default)]
struct EngineState {
    canonical: Vec<Arc<Listing>>,
    pending: Vec<Arc<Listing>>,
}

impl EngineState {
    fn in_canonical(&self, id: &ListingId) -> bool {
        self.canonical.iter().any(|l| l.id == *id)
    }

    fn in_pending(&self, id: &ListingId) -> bool {
        self.pending.iter().any(|l| l.id == *id)
    }
}

/// Applies change events and poll snapshots to the canonical/pending
/// pair. All operations are infallible data transforms; errors belong
/// to the transport, not here.
pub struct ReconciliationEngine {
    state: Mutex<EngineState>,
    snapshot: watch::Sender<Arc<Vec<Arc<Listing>>>>,
    pending_count: watch::Sender<usize>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (pending_count, _) = watch::channel(0);
        Self {
            state: Mutex::new(EngineState::default()),
            snapshot,
            pending_count,
        }
    }

    // ── Event application ────────────────────────────────────────

    /// Stage a newly-arrived record. Non-visible records are ignored;
    /// duplicates (id already canonical or already staged) are silently
    /// absorbed. Never touches the canonical list.
    pub fn apply_insert(&self, record: Listing) {
        if !record.is_visible() {
            trace!(id = %record.id, status = %record.status, "insert ignored: not visible");
            return;
        }
        let mut state = self.lock();
        if state.in_canonical(&record.id) || state.in_pending(&record.id) {
            trace!(id = %record.id, "duplicate insert absorbed");
            return;
        }
        state.pending.push(Arc::new(record));
        self.publish(&state);
    }

    /// Apply an update event. Three cases, checked in order:
    ///
    /// 1. hidden → visible: the record newly surfaced; stage it like an
    ///    insert.
    /// 2. → hidden: remove the id from both lists unconditionally.
    /// 3. visible → visible: replace in place in the canonical list if
    ///    present. In-place updates never count as "new", so the
    ///    pending buffer and counter stay untouched.
    pub fn apply_update(&self, old_status: ListingStatus, record: Listing) {
        if !old_status.is_visible() && record.is_visible() {
            self.apply_insert(record);
            return;
        }

        if !record.is_visible() {
            self.remove(&record.id);
            return;
        }

        let mut state = self.lock();
        if let Some(slot) = state.canonical.iter_mut().find(|l| l.id == record.id) {
            *slot = Arc::new(record);
            self.publish(&state);
        }
    }

    /// Remove the id from both the canonical list and the pending
    /// buffer.
    pub fn apply_delete(&self, id: &ListingId) {
        self.remove(id);
    }

    // ── Commit ───────────────────────────────────────────────────

    /// Fold staged records into the front of the canonical list,
    /// preserving their staging order, then clear the buffer. This is
    /// the only path by which new items become visible without a full
    /// refresh. No-op when nothing is staged.
    pub fn commit_pending(&self) {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return;
        }

        let existing: HashSet<ListingId> =
            state.canonical.iter().map(|l| l.id.clone()).collect();
        let mut merged: Vec<Arc<Listing>> = state
            .pending
            .drain(..)
            .filter(|p| !existing.contains(&p.id))
            .collect();
        let committed = merged.len();
        merged.append(&mut state.canonical);
        state.canonical = merged;

        trace!(committed, "pending records committed");
        self.publish(&state);
    }

    // ── Snapshot reconciliation ──────────────────────────────────

    /// Poll-fallback path. The snapshot is authoritative for the
    /// canonical list (visible records only, snapshot order) and for
    /// fields, but it never commits: a record staged via push stays in
    /// the pending buffer even when the snapshot carries it. Its staged
    /// copy is refreshed from the snapshot's version instead, and it is
    /// kept out of the rebuilt canonical list so the two lists stay
    /// disjoint.
    pub fn reconcile_with_snapshot(&self, snapshot: Vec<Listing>) {
        let mut state = self.lock();
        let staged: HashSet<ListingId> =
            state.pending.iter().map(|l| l.id.clone()).collect();

        let mut canonical = Vec::with_capacity(snapshot.len());
        for record in snapshot.into_iter().filter(Listing::is_visible) {
            if staged.contains(&record.id) {
                if let Some(slot) = state.pending.iter_mut().find(|p| p.id == record.id) {
                    *slot = Arc::new(record);
                }
            } else {
                canonical.push(Arc::new(record));
            }
        }
        state.canonical = canonical;

        self.publish(&state);
    }

    /// Forced-refresh path: the user explicitly asked for the freshest
    /// truth, so the pending buffer is superseded and cleared.
    pub fn force_reset(&self, snapshot: Vec<Listing>) {
        let mut state = self.lock();
        state.canonical = visible_only(snapshot);
        state.pending.clear();
        self.publish(&state);
    }

    /// Seed the canonical list once at controller creation.
    pub fn seed(&self, initial: Vec<Listing>) {
        self.force_reset(initial);
    }

    // ── Read access ──────────────────────────────────────────────

    /// Current canonical list (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<Listing>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to canonical list changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Listing>>>> {
        self.snapshot.subscribe()
    }

    /// Staged records awaiting commit, in arrival order.
    pub fn pending_snapshot(&self) -> Vec<Arc<Listing>> {
        self.lock().pending.clone()
    }

    pub fn pending_count(&self) -> usize {
        *self.pending_count.borrow()
    }

    /// Subscribe to pending-count changes.
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending_count.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────

    fn remove(&self, id: &ListingId) {
        let mut state = self.lock();
        let before = state.canonical.len() + state.pending.len();
        state.canonical.retain(|l| l.id != *id);
        state.pending.retain(|l| l.id != *id);
        if state.canonical.len() + state.pending.len() != before {
            self.publish(&state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuild both watch values from the locked state.
    fn publish(&self, state: &EngineState) {
        let snap = Arc::new(state.canonical.clone());
        self.snapshot.send_modify(|s| *s = snap);
        let count = state.pending.len();
        self.pending_count.send_modify(|c| *c = count);
    }
}

fn visible_only(records: Vec<Listing>) -> Vec<Arc<Listing>> {
    records
        .into_iter()
        .filter(Listing::is_visible)
        .map(Arc::new)
        .collect()
}
