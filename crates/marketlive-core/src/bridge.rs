// ── Proposal live bridge ──
//
// Per-listing live view of the proposal sub-resource. Unlike the main
// feed there is no staging: proposal lists are small and volatile, so
// inserts and deletes mutate the scoped list directly. Each insert is
// enriched with the bidder's profile; a failed lookup surfaces the
// proposal with a placeholder instead of dropping it.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::controller::FeedPhase;
use crate::error::FeedError;
use crate::model::{
    ActivityNotice, Listing, ListingId, ProposalEntry, ProposalEvent, UserId,
};
use crate::source::{FeedContext, ProfileLookup, ProposalSubscription, SubscriptionPermit, proposals_key};

/// Live proposal stream for one listing the UI is actively viewing.
#[derive(Clone)]
pub struct ProposalBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    listing_id: ListingId,
    shared: Arc<BridgeShared>,
    phase: watch::Sender<FeedPhase>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    permit: Mutex<Option<SubscriptionPermit>>,
}

/// State the pump task mutates: the scoped entry list and the
/// cross-cutting notification channel.
struct BridgeShared {
    listing_title: String,
    /// Whether the viewed listing belongs to the viewer; only then do
    /// incoming proposals raise an [`ActivityNotice`].
    own_listing: bool,
    entries: watch::Sender<Arc<Vec<ProposalEntry>>>,
    notice: watch::Sender<Option<ActivityNotice>>,
}

impl ProposalBridge {
    /// Open the proposal stream scoped to `listing`. `viewer` decides
    /// whether incoming proposals raise the cross-cutting notice;
    /// `seed` pre-populates the scoped list with already-fetched
    /// proposals.
    pub fn open(
        ctx: &FeedContext,
        listing: &Listing,
        viewer: &UserId,
        seed: Vec<ProposalEntry>,
    ) -> Result<Self, FeedError> {
        let key = proposals_key(&listing.id);
        let permit = ctx.guards().acquire(&key)?;

        let subscription = ctx.transport.subscribe_proposals(&listing.id)?;

        let (entries, _) = watch::channel(Arc::new(seed));
        let (notice, _) = watch::channel(None);
        let (phase, _) = watch::channel(FeedPhase::Active);
        let cancel = CancellationToken::new();

        let shared = Arc::new(BridgeShared {
            listing_title: listing.title.clone(),
            own_listing: listing.seller_id == *viewer,
            entries,
            notice,
        });

        let handle = tokio::spawn(proposal_pump_task(
            Arc::clone(&shared),
            Arc::clone(&ctx.profiles),
            subscription,
            cancel.clone(),
        ));

        Ok(Self {
            inner: Arc::new(BridgeInner {
                listing_id: listing.id.clone(),
                shared,
                phase,
                cancel,
                tasks: Mutex::new(vec![handle]),
                permit: Mutex::new(Some(permit)),
            }),
        })
    }

    pub fn listing_id(&self) -> &ListingId {
        &self.inner.listing_id
    }

    /// Current scoped proposal list.
    pub fn entries(&self) -> Arc<Vec<ProposalEntry>> {
        self.inner.shared.entries.borrow().clone()
    }

    pub fn subscribe_entries(&self) -> watch::Receiver<Arc<Vec<ProposalEntry>>> {
        self.inner.shared.entries.subscribe()
    }

    /// Latest unconsumed activity notice, if any.
    pub fn notice(&self) -> Option<ActivityNotice> {
        self.inner.shared.notice.borrow().clone()
    }

    pub fn subscribe_notice(&self) -> watch::Receiver<Option<ActivityNotice>> {
        self.inner.shared.notice.subscribe()
    }

    /// Consume the current notice.
    pub fn clear_notice(&self) {
        self.inner.shared.notice.send_modify(|n| *n = None);
    }

    pub fn phase(&self) -> FeedPhase {
        *self.inner.phase.borrow()
    }

    /// Tear down the subscription and release the resource-key permit.
    /// Idempotent; a lookup still in flight at disposal time has its
    /// result discarded.
    pub async fn dispose(&self) {
        if self.phase() == FeedPhase::Disposed {
            return;
        }

        self.inner.cancel.cancel();

        let mut tasks = self.inner.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }

        *self.inner.permit.lock().await = None;
        self.inner.phase.send_modify(|p| *p = FeedPhase::Disposed);
        debug!(listing = %self.inner.listing_id, "proposal bridge disposed");
    }
}

// ── Pump task ────────────────────────────────────────────────────────

/// Apply proposal events to the scoped list until cancelled.
///
/// Events are processed sequentially; while an enrichment lookup is
/// awaited, later events buffer in the channel, so per-id order is
/// preserved.
async fn proposal_pump_task(
    shared: Arc<BridgeShared>,
    profiles: Arc<dyn ProfileLookup>,
    mut subscription: ProposalSubscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = subscription.status.changed() => {
                match changed {
                    Ok(()) => {
                        // The transport owns reconnection; a drop is only
                        // logged and the pump keeps draining events.
                        let status = subscription.status.borrow_and_update().clone();
                        if status.is_healthy() {
                            debug!("proposal channel established");
                        } else {
                            warn!(status = ?status, "proposal channel unhealthy");
                        }
                    }
                    Err(_) => break,
                }
            }
            result = subscription.events.recv() => {
                match result {
                    Ok(event) => {
                        match event.as_ref() {
                            ProposalEvent::Insert { proposal } => {
                                let proposal = Arc::new(proposal.clone());

                                // Enrichment is best-effort and must not
                                // outlive the bridge: a result arriving
                                // after disposal is discarded.
                                let bidder = tokio::select! {
                                    biased;
                                    () = cancel.cancelled() => break,
                                    looked_up = profiles.lookup(&proposal.bidder_id) => {
                                        match looked_up {
                                            Ok(profile) => profile,
                                            Err(e) => {
                                                warn!(
                                                    bidder = %proposal.bidder_id,
                                                    error = %e,
                                                    "profile lookup failed, surfacing proposal without profile"
                                                );
                                                None
                                            }
                                        }
                                    }
                                };

                                let entry = ProposalEntry {
                                    proposal: Arc::clone(&proposal),
                                    bidder,
                                };
                                shared.entries.send_modify(|list| {
                                    let mut next = (**list).clone();
                                    next.push(entry);
                                    *list = Arc::new(next);
                                });

                                if shared.own_listing {
                                    // send_modify: the notice must latch
                                    // even before anyone subscribes.
                                    let notice = ActivityNotice {
                                        proposal,
                                        listing_title: shared.listing_title.clone(),
                                    };
                                    shared.notice.send_modify(|n| *n = Some(notice));
                                }
                            }
                            ProposalEvent::Delete { id } => {
                                shared.entries.send_modify(|list| {
                                    let next: Vec<ProposalEntry> = list
                                        .iter()
                                        .filter(|e| e.proposal.id != *id)
                                        .cloned()
                                        .collect();
                                    *list = Arc::new(next);
                                });
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "proposal pump lagged behind the push channel");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    debug!("proposal pump exiting");
}
