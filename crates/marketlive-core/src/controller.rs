// ── Live feed controller ──
//
// Composition root for one synchronized resource feed. Owns the
// reconciliation engine, the connection monitor, one push subscription,
// and the poll fallback task. Plain owned object with open()/dispose():
// lifecycle is explicit, independent of any UI framework's mount and
// unmount churn.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::ReconciliationEngine;
use crate::error::FeedError;
use crate::model::{ChannelStatus, ConnectionState, Listing, ListingEvent};
use crate::monitor::ConnectionMonitor;
use crate::poll::poll_fallback_task;
use crate::source::{FeedContext, FeedTransport, LISTINGS_KEY, ListingSubscription, SubscriptionPermit};

// ── FeedPhase ────────────────────────────────────────────────────────

/// Lifecycle phase of a controller instance.
///
/// There is no transition out of [`Disposed`](FeedPhase::Disposed);
/// create a fresh controller instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Subscribing,
    Active,
    Disposed,
}

// ── LiveFeedController ───────────────────────────────────────────────

/// One synchronized listing feed.
///
/// Cheaply cloneable via `Arc`; all clones share the same feed and the
/// same lifecycle. The canonical list only changes shape on push-driven
/// removals, [`commit_pending`](Self::commit_pending), or
/// [`force_refresh`](Self::force_refresh) — new arrivals stage in the
/// pending buffer and surface through the pending count.
#[derive(Clone)]
pub struct LiveFeedController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    engine: Arc<ReconciliationEngine>,
    monitor: Arc<ConnectionMonitor>,
    transport: Arc<dyn FeedTransport>,
    phase: watch::Sender<FeedPhase>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Claim on the listings resource key; released on disposal.
    permit: Mutex<Option<SubscriptionPermit>>,
}

impl LiveFeedController {
    /// Seed the canonical list, open the single push subscription for
    /// the listings change stream, and start the poll fallback.
    ///
    /// Fails with [`FeedError::SubscriptionActive`] if another live
    /// controller holds the listings subscription, or with the
    /// transport's error if the subscribe itself fails.
    pub fn open(ctx: &FeedContext, initial: Vec<Listing>) -> Result<Self, FeedError> {
        // Guard first: an undisposed previous instance must never lead
        // to a second live subscription. The permit is released again
        // automatically if the subscribe below fails.
        let permit = ctx.guards().acquire(LISTINGS_KEY)?;

        let (phase, _) = watch::channel(FeedPhase::Subscribing);
        let engine = Arc::new(ReconciliationEngine::new());
        let monitor = Arc::new(ConnectionMonitor::new());
        let cancel = CancellationToken::new();

        engine.seed(initial);

        let subscription = ctx.transport.subscribe_listings()?;

        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(event_pump_task(
            Arc::clone(&engine),
            Arc::clone(&monitor),
            subscription,
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(poll_fallback_task(
            Arc::clone(&engine),
            Arc::clone(&monitor),
            Arc::clone(&ctx.transport),
            ctx.config.poll_interval(),
            cancel.clone(),
        )));

        // send_modify: the phase must advance even with no subscriber.
        phase.send_modify(|p| *p = FeedPhase::Active);

        Ok(Self {
            inner: Arc::new(ControllerInner {
                engine,
                monitor,
                transport: Arc::clone(&ctx.transport),
                phase,
                cancel,
                tasks: Mutex::new(tasks),
                permit: Mutex::new(Some(permit)),
            }),
        })
    }

    // ── List access ──────────────────────────────────────────────

    /// Current canonical list (cheap `Arc` clone).
    pub fn list(&self) -> Arc<Vec<Arc<Listing>>> {
        self.inner.engine.snapshot()
    }

    /// Subscribe to canonical list changes.
    pub fn subscribe_list(&self) -> watch::Receiver<Arc<Vec<Arc<Listing>>>> {
        self.inner.engine.subscribe()
    }

    /// Number of staged records awaiting [`commit_pending`](Self::commit_pending).
    pub fn pending_count(&self) -> usize {
        self.inner.engine.pending_count()
    }

    /// Subscribe to pending-count changes (drives "N new — tap to load").
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.inner.engine.subscribe_pending()
    }

    /// Staged records in arrival order, for previews.
    pub fn pending_snapshot(&self) -> Vec<Arc<Listing>> {
        self.inner.engine.pending_snapshot()
    }

    // ── User actions ─────────────────────────────────────────────

    /// Fold staged records into the canonical list. No-op when nothing
    /// is staged.
    pub fn commit_pending(&self) {
        self.inner.engine.commit_pending();
    }

    /// Fetch the freshest snapshot and replace the canonical list with
    /// it, clearing the pending buffer unconditionally.
    ///
    /// A response that arrives after disposal is discarded, not applied.
    pub async fn force_refresh(&self) -> Result<(), FeedError> {
        if self.phase() == FeedPhase::Disposed {
            return Err(FeedError::Disposed);
        }

        let snapshot = self.inner.transport.fetch_all().await?;

        if self.inner.cancel.is_cancelled() {
            debug!("force refresh response discarded: controller disposed");
            return Err(FeedError::Disposed);
        }

        self.inner.engine.force_reset(snapshot);
        self.inner.monitor.touch();
        Ok(())
    }

    // ── Connection observation ───────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.inner.monitor.is_healthy()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.monitor.connection_state()
    }

    /// Subscribe to connection health flips.
    pub fn subscribe_connection(&self) -> watch::Receiver<bool> {
        self.inner.monitor.subscribe_health()
    }

    /// When the feed last absorbed a change from any source.
    pub fn last_update(&self) -> DateTime<Utc> {
        self.inner.monitor.last_update()
    }

    pub fn subscribe_last_update(&self) -> watch::Receiver<DateTime<Utc>> {
        self.inner.monitor.subscribe_last_update()
    }

    pub fn phase(&self) -> FeedPhase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<FeedPhase> {
        self.inner.phase.subscribe()
    }

    // ── Disposal ─────────────────────────────────────────────────

    /// Tear down the subscription and the poll task, and release the
    /// resource-key permit. Idempotent: calling it twice is safe and
    /// the second call is a no-op.
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
        debug!("feed controller disposed");
    }
}

// ── Event pump ───────────────────────────────────────────────────────

/// Apply push events to the engine and channel-status changes to the
/// monitor until cancelled. Events for one id apply in arrival order;
/// nothing is coalesced.
async fn event_pump_task(
    engine: Arc<ReconciliationEngine>,
    monitor: Arc<ConnectionMonitor>,
    mut subscription: ListingSubscription,
    cancel: CancellationToken,
) {
    // The transport may have reported a status before the pump started.
    let initial = subscription.status.borrow_and_update().clone();
    monitor.apply_status(&initial);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = subscription.status.changed() => {
                match changed {
                    Ok(()) => {
                        let status = subscription.status.borrow_and_update().clone();
                        monitor.apply_status(&status);
                    }
                    Err(_) => {
                        // Transport dropped the status channel entirely.
                        monitor.apply_status(&ChannelStatus::Lost);
                        break;
                    }
                }
            }
            result = subscription.events.recv() => {
                match result {
                    Ok(event) => {
                        apply_event(&engine, event.as_ref());
                        monitor.touch();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event pump lagged behind the push channel");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        monitor.apply_status(&ChannelStatus::Lost);
                        break;
                    }
                }
            }
        }
    }

    debug!("event pump exiting");
}

fn apply_event(engine: &ReconciliationEngine, event: &ListingEvent) {
    match event {
        ListingEvent::Insert { record } => engine.apply_insert(record.clone()),
        ListingEvent::Update { old_status, record } => {
            engine.apply_update(*old_status, record.clone());
        }
        ListingEvent::Delete { id } => engine.apply_delete(id),
    }
}
