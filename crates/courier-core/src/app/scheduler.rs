//! RetryScheduler - drives many delivery trackers concurrently.
//!
//! Design:
//! - Each tracker sits behind its own lock. The id -> tracker map and the
//!   eligibility heap are only locked for short lookups, never across a send.
//! - A cycle pops every due entry, flips the tracker to `InFlight` under its
//!   lock and hands the payload to the Sender on a separate task.
//! - Outcomes come back through the same per-record lock, guarded by the
//!   attempt ticket, so a late reply cannot overwrite a newer attempt.
//! - Terminal records stay in memory until acknowledged.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SchedulerConfig;
use crate::domain::{AttemptTicket, CourierError, Deliverable, DeliverableId, Payload, SendOutcome};
use crate::observability::QueueCounts;
use crate::ports::{Clock, DeliverableStore, IdGenerator, Sender, UlidGenerator};
use crate::queue::{
    CancelDisposition, DeliveryAttemptTracker, DeliveryState, ReadyEntry, ReadyQueue, Transition,
};

#[derive(Clone)]
struct Slot {
    /// Enqueue order, fixed for the record's lifetime.
    seq: u64,
    tracker: Arc<Mutex<DeliveryAttemptTracker>>,
}

struct Inner {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    sender: Arc<dyn Sender>,
    store: Arc<dyn DeliverableStore>,
    ids: Box<dyn IdGenerator>,
    slots: RwLock<HashMap<DeliverableId, Slot>>,
    ready: Mutex<ReadyQueue>,
    next_seq: AtomicU64,
    notify: Notify,
}

/// Cheap to clone; all clones share one active set.
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<Inner>,
}

/// Result of one scheduling cycle.
#[derive(Debug, Default)]
pub struct DispatchBatch {
    /// Dispatched this cycle, in dispatch order.
    pub dispatched: Vec<DeliverableId>,
    /// Forced to a transient failure by the in-flight timeout.
    pub expired: Vec<DeliverableId>,
    handles: Vec<JoinHandle<()>>,
}

impl DispatchBatch {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty() && self.expired.is_empty()
    }

    /// Wait until every send started by this cycle had its outcome applied.
    pub async fn settle(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(%err, "dispatch task ended abnormally");
            }
        }
    }
}

impl RetryScheduler {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        sender: Arc<dyn Sender>,
        store: Arc<dyn DeliverableStore>,
    ) -> Result<Self, CourierError> {
        config.validate()?;
        let ids = Box::new(UlidGenerator::new(Arc::clone(&clock)));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                sender,
                store,
                ids,
                slots: RwLock::new(HashMap::new()),
                ready: Mutex::new(ReadyQueue::new()),
                next_seq: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Create a pending deliverable for `payload` and start tracking it.
    pub async fn enqueue(&self, payload: Payload) -> Result<DeliverableId, CourierError> {
        let id = self.inner.ids.generate_deliverable_id();
        let deliverable = Deliverable::new(id, payload, self.inner.clock.now());
        self.submit(deliverable).await
    }

    /// Start tracking a deliverable created by an external producer.
    ///
    /// Only `Pending` records are accepted. The record is persisted before it
    /// becomes eligible.
    pub async fn submit(&self, deliverable: Deliverable) -> Result<DeliverableId, CourierError> {
        let id = deliverable.id;
        if deliverable.state != DeliveryState::Pending {
            return Err(CourierError::InvalidArgument(format!(
                "new deliverable {id} must be pending, got {}",
                deliverable.state
            )));
        }
        if self.inner.slot(id).await.is_some() {
            return Err(CourierError::DuplicateDeliverable(id));
        }

        self.inner.store.save(&deliverable).await?;
        self.inner.admit(deliverable).await?;
        info!(deliverable_id = %id, "deliverable enqueued");
        Ok(id)
    }

    /// Re-admit every non-terminal record from the store.
    ///
    /// Records come back in original enqueue order. In-flight records keep
    /// their dispatch instant and are reclaimed by the in-flight timeout.
    pub async fn rehydrate(&self) -> Result<usize, CourierError> {
        let mut records = self.inner.store.load_non_terminal().await?;
        records.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));

        let mut admitted = 0;
        for record in records {
            let id = record.id;
            match self.inner.admit(record).await {
                Ok(()) => admitted += 1,
                Err(CourierError::DuplicateDeliverable(_)) => {
                    debug!(deliverable_id = %id, "already tracked, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        info!(admitted, "rehydrated active set from store");
        Ok(admitted)
    }

    pub async fn get(&self, id: DeliverableId) -> Option<Deliverable> {
        let slot = self.inner.slot(id).await?;
        let tracker = slot.tracker.lock().await;
        Some(tracker.snapshot())
    }

    pub async fn cancel(&self, id: DeliverableId) -> Result<CancelDisposition, CourierError> {
        let slot = self.inner.slot(id).await.ok_or(CourierError::NotFound(id))?;
        let mut tracker = slot.tracker.lock().await;
        let disposition = tracker.cancel(self.inner.clock.now())?;
        match disposition {
            CancelDisposition::Cancelled => {
                self.inner.persist(tracker.deliverable()).await;
                info!(deliverable_id = %id, "deliverable cancelled");
            }
            CancelDisposition::Deferred => {
                info!(deliverable_id = %id, "cancel requested while in flight");
            }
        }
        Ok(disposition)
    }

    /// Drop a terminal record from the active set and return its final state.
    ///
    /// The tracker lock is released before the map is locked for removal;
    /// a terminal record cannot change in between.
    pub async fn acknowledge(&self, id: DeliverableId) -> Result<Deliverable, CourierError> {
        let slot = self.inner.slot(id).await.ok_or(CourierError::NotFound(id))?;
        let snapshot = {
            let tracker = slot.tracker.lock().await;
            if !tracker.state().is_terminal() {
                return Err(CourierError::InvalidTransition {
                    id,
                    from: tracker.state(),
                    action: "acknowledge",
                });
            }
            tracker.snapshot()
        };

        if self.inner.slots.write().await.remove(&id).is_none() {
            return Err(CourierError::NotFound(id));
        }
        debug!(deliverable_id = %id, state = %snapshot.state, "acknowledged");
        Ok(snapshot)
    }

    pub async fn counts_by_state(&self) -> QueueCounts {
        let slots: Vec<Slot> = self.inner.slots.read().await.values().cloned().collect();
        let mut counts = QueueCounts::default();
        for slot in slots {
            counts.record(slot.tracker.lock().await.state());
        }
        counts
    }

    pub async fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.inner.ready.lock().await.next_deadline()
    }

    /// One scheduling pass: reclaim overdue dispatches, then dispatch every
    /// record whose eligible instant has passed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn run_cycle(&self) -> DispatchBatch {
        let now = self.inner.clock.now();
        let mut batch = DispatchBatch {
            expired: self.inner.expire_overdue(now).await,
            ..DispatchBatch::default()
        };

        let due = self.inner.ready.lock().await.pop_due(now);
        for entry in due {
            let Some(slot) = self.inner.slot(entry.id).await else {
                continue;
            };
            let mut tracker = slot.tracker.lock().await;
            if !tracker.state().is_dispatchable() {
                // in flight or finished since the entry was queued
                continue;
            }
            let ticket = match tracker.begin_dispatch(now) {
                Ok(ticket) => ticket,
                Err(_) => {
                    // not due yet
                    if let Some(eligible_at) = tracker.eligible_at() {
                        self.inner.push_ready(eligible_at, slot.seq, entry.id).await;
                    }
                    continue;
                }
            };
            let payload = tracker.deliverable().payload.clone();
            self.inner.persist(tracker.deliverable()).await;
            drop(tracker);

            debug!(deliverable_id = %entry.id, attempt = ticket.attempt_number, "dispatching");
            batch.dispatched.push(entry.id);
            batch.handles.push(self.inner.spawn_dispatch(ticket, payload));
        }

        batch
    }

    /// Run cycles on a background task until shutdown.
    pub fn spawn(&self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = self.clone();

        let join = tokio::spawn(async move {
            info!("retry scheduler started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let batch = scheduler.run_cycle().await;
                if !batch.is_empty() {
                    debug!(
                        dispatched = batch.dispatched.len(),
                        expired = batch.expired.len(),
                        "cycle finished"
                    );
                }

                let wait = scheduler.idle_wait().await;
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = scheduler.inner.notify.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            info!("retry scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, join }
    }

    async fn idle_wait(&self) -> Duration {
        let poll = self.inner.config.poll_interval();
        match self.next_deadline().await {
            Some(at) => {
                let until = (at - self.inner.clock.now()).to_std().unwrap_or(Duration::ZERO);
                until.min(poll)
            }
            None => poll,
        }
    }
}

impl Inner {
    async fn slot(&self, id: DeliverableId) -> Option<Slot> {
        self.slots.read().await.get(&id).cloned()
    }

    async fn admit(&self, deliverable: Deliverable) -> Result<(), CourierError> {
        let id = deliverable.id;
        let tracker = DeliveryAttemptTracker::new(deliverable, self.config.max_attempts);
        let eligible_at = tracker.eligible_at();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        {
            let mut slots = self.slots.write().await;
            if slots.contains_key(&id) {
                return Err(CourierError::DuplicateDeliverable(id));
            }
            slots.insert(
                id,
                Slot {
                    seq,
                    tracker: Arc::new(Mutex::new(tracker)),
                },
            );
        }

        if let Some(at) = eligible_at {
            self.push_ready(at, seq, id).await;
        }
        Ok(())
    }

    async fn push_ready(&self, eligible_at: DateTime<Utc>, seq: u64, id: DeliverableId) {
        self.ready.lock().await.push(ReadyEntry {
            eligible_at,
            seq,
            id,
        });
        self.notify.notify_one();
    }

    /// Store failures are logged and never block the record's progress.
    async fn persist(&self, deliverable: &Deliverable) {
        if let Err(err) = self.store.save(deliverable).await {
            warn!(deliverable_id = %deliverable.id, state = %deliverable.state, %err, "failed to persist deliverable");
        }
    }

    fn spawn_dispatch(self: &Arc<Self>, ticket: AttemptTicket, payload: Payload) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let timeout = inner.config.in_flight_timeout();
            let outcome = match tokio::time::timeout(timeout, inner.sender.send(&payload)).await {
                Ok(outcome) => outcome,
                Err(_) => SendOutcome::transient(
                    CourierError::SchedulerInternalTimeout {
                        id: ticket.deliverable_id,
                        elapsed: timeout,
                        timeout,
                    }
                    .to_string(),
                ),
            };
            inner.complete(ticket, outcome).await;
        })
    }

    async fn complete(&self, ticket: AttemptTicket, outcome: SendOutcome) {
        let id = ticket.deliverable_id;
        let Some(slot) = self.slot(id).await else {
            warn!(deliverable_id = %id, "outcome for untracked deliverable");
            return;
        };

        if let Err(err) = outcome.clone().into_result() {
            debug!(deliverable_id = %id, kind = ?err.kind(), %err, "send failed");
        }

        let mut tracker = slot.tracker.lock().await;
        let now = self.clock.now();
        match tracker.apply_outcome(&ticket, outcome, now, &self.config.backoff) {
            Ok(transition) => self.after_transition(&tracker, slot.seq, transition).await,
            Err(err) => debug!(deliverable_id = %id, %err, "dropping outcome"),
        }
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<DeliverableId> {
        let timeout = self.config.in_flight_timeout();
        let slots: Vec<(DeliverableId, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, slot) in slots {
            let mut tracker = slot.tracker.lock().await;
            match tracker.expire_if_overdue(now, timeout, &self.config.backoff) {
                Ok(Some(transition)) => {
                    warn!(deliverable_id = %id, ?timeout, "in-flight timeout, counting as transient failure");
                    self.after_transition(&tracker, slot.seq, transition).await;
                    expired.push(id);
                }
                Ok(None) => {}
                Err(err) => warn!(deliverable_id = %id, %err, "could not expire in-flight dispatch"),
            }
        }
        expired
    }

    async fn after_transition(
        &self,
        tracker: &DeliveryAttemptTracker,
        seq: u64,
        transition: Transition,
    ) {
        let d = tracker.deliverable();
        match transition {
            Transition::Succeeded => {
                info!(deliverable_id = %d.id, failed_attempts = d.attempt_count, "delivered");
            }
            Transition::Retrying { next_eligible_at } => {
                info!(
                    deliverable_id = %d.id,
                    attempt = d.attempt_count,
                    %next_eligible_at,
                    error = d.last_error.as_deref().unwrap_or_default(),
                    "transient failure, retry scheduled"
                );
            }
            Transition::Exhausted => {
                warn!(
                    deliverable_id = %d.id,
                    attempts = d.attempt_count,
                    error = d.last_error.as_deref().unwrap_or_default(),
                    "delivery failed, giving up"
                );
            }
            Transition::Cancelled => {
                info!(deliverable_id = %d.id, "cancelled after in-flight outcome");
            }
        }

        self.persist(d).await;
        if let Transition::Retrying { next_eligible_at } = transition {
            self.push_ready(next_eligible_at, seq, tracker.id()).await;
        }
    }
}

/// Handle to a running scheduler loop.
/// - `request_shutdown()` stops the loop after the current cycle
/// - sends already dispatched keep running and still apply their outcome
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            warn!(%err, "scheduler loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryDeliverableStore, ScriptedSender};
    use crate::ports::{FixedClock, SystemClock};
    use crate::queue::BackoffPolicy;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::Semaphore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    fn payload(key: &str) -> Payload {
        serde_json::json!({ "key": key, "template": "quote_published" })
    }

    struct Harness<S> {
        clock: Arc<FixedClock>,
        sender: Arc<S>,
        store: Arc<InMemoryDeliverableStore>,
        scheduler: RetryScheduler,
    }

    impl<S: Sender + 'static> Harness<S> {
        fn with_sender(config: SchedulerConfig, sender: S) -> Self {
            let clock = Arc::new(FixedClock::new(t0()));
            let sender = Arc::new(sender);
            let store = Arc::new(InMemoryDeliverableStore::new());
            let scheduler = RetryScheduler::new(
                config,
                clock.clone(),
                sender.clone(),
                store.clone(),
            )
            .unwrap();
            Self {
                clock,
                sender,
                store,
                scheduler,
            }
        }

        /// Run a cycle and wait for its sends to finish.
        async fn cycle(&self) -> Vec<DeliverableId> {
            let batch = self.scheduler.run_cycle().await;
            let dispatched = batch.dispatched.clone();
            batch.settle().await;
            dispatched
        }

        async fn state(&self, id: DeliverableId) -> DeliveryState {
            self.scheduler.get(id).await.unwrap().state
        }
    }

    fn scripted() -> Harness<ScriptedSender> {
        Harness::with_sender(SchedulerConfig::default(), ScriptedSender::new())
    }

    /// Holds every send until a permit is released.
    struct GatedSender {
        gate: Semaphore,
        outcome: SendOutcome,
    }

    impl GatedSender {
        fn new(outcome: SendOutcome) -> Self {
            Self {
                gate: Semaphore::new(0),
                outcome,
            }
        }
    }

    #[async_trait]
    impl Sender for GatedSender {
        async fn send(&self, _payload: &Payload) -> SendOutcome {
            let _permit = self.gate.acquire().await;
            self.outcome.clone()
        }
    }

    /// Blocks saves of terminal records until a permit is released.
    struct SlowTerminalStore {
        inner: InMemoryDeliverableStore,
        entered: Notify,
        release: Semaphore,
    }

    impl SlowTerminalStore {
        fn new() -> Self {
            Self {
                inner: InMemoryDeliverableStore::new(),
                entered: Notify::new(),
                release: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliverableStore for SlowTerminalStore {
        async fn save(&self, deliverable: &Deliverable) -> Result<(), CourierError> {
            if deliverable.is_terminal() {
                self.entered.notify_one();
                let _permit = self.release.acquire().await;
            }
            self.inner.save(deliverable).await
        }

        async fn get(&self, id: DeliverableId) -> Result<Option<Deliverable>, CourierError> {
            self.inner.get(id).await
        }

        async fn load_non_terminal(&self) -> Result<Vec<Deliverable>, CourierError> {
            self.inner.load_non_terminal().await
        }
    }

    #[tokio::test]
    async fn retry_then_success_end_to_end() {
        let h = scripted();
        h.sender.script("a", [SendOutcome::transient("rate limited")]).await;
        let id = h.scheduler.enqueue(payload("a")).await.unwrap();

        assert_eq!(h.cycle().await, vec![id]);
        let d = h.scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::FailedRetrying);
        assert_eq!(d.next_eligible_at, Some(t0() + minutes(5)));

        h.clock.set(t0() + minutes(4));
        assert!(h.cycle().await.is_empty());

        h.clock.set(t0() + minutes(5));
        assert_eq!(h.cycle().await, vec![id]);

        let d = h.scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::Succeeded);
        assert_eq!(d.attempt_count, 1);
        assert_eq!(d.history.len(), 2);

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.state, DeliveryState::Succeeded);
    }

    #[tokio::test]
    async fn permanent_failure_skips_backoff() {
        let h = scripted();
        h.sender.script("p", [SendOutcome::permanent("invalid number")]).await;
        let id = h.scheduler.enqueue(payload("p")).await.unwrap();

        h.cycle().await;
        let d = h.scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::FailedExhausted);
        assert_eq!(d.attempt_count, 1);
        assert!(d.next_eligible_at.is_none());

        h.clock.advance(Duration::from_secs(86_400));
        assert!(h.cycle().await.is_empty());
        assert_eq!(h.sender.call_count("p").await, 1);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_after_max_attempts() {
        let config = SchedulerConfig {
            max_attempts: 3,
            ..SchedulerConfig::default()
        };
        let h = Harness::with_sender(config, ScriptedSender::new());
        h.sender
            .script("t", (0..5).map(|n| SendOutcome::transient(format!("busy {n}"))))
            .await;
        let id = h.scheduler.enqueue(payload("t")).await.unwrap();

        for _ in 0..3 {
            assert_eq!(h.cycle().await, vec![id]);
            if let Some(next) = h.scheduler.get(id).await.unwrap().next_eligible_at {
                h.clock.set(next);
            }
        }

        let d = h.scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::FailedExhausted);
        assert_eq!(d.attempt_count, 3);
        assert_eq!(d.history.len(), 3);
        assert!(d.failure_summary().unwrap().contains("after 3 attempts"));

        h.clock.advance(Duration::from_secs(30 * 86_400));
        assert!(h.cycle().await.is_empty());
        assert_eq!(h.sender.call_count("t").await, 3);
    }

    #[tokio::test]
    async fn equal_instants_dispatch_in_enqueue_order() {
        let h = scripted();
        let mut ids = Vec::new();
        for key in ["a", "b", "c", "d"] {
            h.sender.script(key, [SendOutcome::transient("busy")]).await;
            ids.push(h.scheduler.enqueue(payload(key)).await.unwrap());
        }

        assert_eq!(h.cycle().await, ids);

        // all four retry at the same instant; original order still wins
        h.clock.set(t0() + minutes(5));
        assert_eq!(h.cycle().await, ids);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cycles_never_double_dispatch() {
        let h = Harness::with_sender(
            SchedulerConfig::default(),
            ScriptedSender::with_delay(Duration::from_millis(50)),
        );
        let id = h.scheduler.enqueue(payload("solo")).await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..8 {
            let scheduler = h.scheduler.clone();
            joins.push(tokio::spawn(async move { scheduler.run_cycle().await }));
        }

        let mut dispatched = Vec::new();
        for join in joins {
            let batch = join.await.unwrap();
            dispatched.extend(batch.dispatched.iter().copied());
            batch.settle().await;
        }

        assert_eq!(dispatched, vec![id]);
        assert_eq!(h.sender.call_count("solo").await, 1);
        assert_eq!(h.sender.max_in_flight("solo").await, 1);
        assert_eq!(h.state(id).await, DeliveryState::Succeeded);
    }

    #[tokio::test]
    async fn in_flight_record_is_excluded_from_later_cycles() {
        let h = Harness::with_sender(
            SchedulerConfig::default(),
            GatedSender::new(SendOutcome::Success),
        );
        let id = h.scheduler.enqueue(payload("g")).await.unwrap();

        let first = h.scheduler.run_cycle().await;
        assert_eq!(first.dispatched, vec![id]);
        assert_eq!(h.state(id).await, DeliveryState::InFlight);

        h.clock.advance(Duration::from_secs(60));
        assert!(h.scheduler.run_cycle().await.dispatched.is_empty());

        h.sender.gate.add_permits(1);
        first.settle().await;
        assert_eq!(h.state(id).await, DeliveryState::Succeeded);
    }

    #[tokio::test]
    async fn in_flight_timeout_forces_transient_failure() {
        let h = Harness::with_sender(
            SchedulerConfig::default(),
            GatedSender::new(SendOutcome::Success),
        );
        let id = h.scheduler.enqueue(payload("slow")).await.unwrap();
        let first = h.scheduler.run_cycle().await;

        h.clock.set(t0() + chrono::Duration::seconds(119));
        assert!(h.scheduler.run_cycle().await.expired.is_empty());

        h.clock.set(t0() + minutes(2));
        let batch = h.scheduler.run_cycle().await;
        assert_eq!(batch.expired, vec![id]);

        let d = h.scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::FailedRetrying);
        assert_eq!(d.attempt_count, 1);
        assert_eq!(d.next_eligible_at, Some(t0() + minutes(7)));

        // the late reply belongs to a reclaimed attempt and is ignored
        h.sender.gate.add_permits(1);
        first.settle().await;
        let d = h.scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::FailedRetrying);
        assert_eq!(d.history.len(), 1);
    }

    #[tokio::test]
    async fn hung_sender_times_out_under_real_time() {
        let config = SchedulerConfig {
            in_flight_timeout_ms: 50,
            ..SchedulerConfig::default()
        };
        let sender = Arc::new(GatedSender::new(SendOutcome::Success));
        let scheduler = RetryScheduler::new(
            config,
            Arc::new(SystemClock),
            sender.clone(),
            Arc::new(InMemoryDeliverableStore::new()),
        )
        .unwrap();
        let id = scheduler.enqueue(payload("hung")).await.unwrap();

        let batch = scheduler.run_cycle().await;
        assert_eq!(batch.dispatched, vec![id]);
        batch.settle().await;

        let d = scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::FailedRetrying);
        assert_eq!(d.attempt_count, 1);
        assert_eq!(d.history.len(), 1);
        assert!(d.last_error.as_deref().unwrap().contains("in flight"));

        // the clock sweep finds nothing left to reclaim
        let batch = scheduler.run_cycle().await;
        assert!(batch.is_empty());
        assert_eq!(scheduler.get(id).await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn acknowledge_does_not_block_unrelated_records() {
        let store = Arc::new(SlowTerminalStore::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let scheduler = RetryScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            Arc::new(ScriptedSender::new()),
            store.clone(),
        )
        .unwrap();

        let a = scheduler.enqueue(payload("a")).await.unwrap();
        let batch = scheduler.run_cycle().await;
        // a's tracker is now held while its Succeeded snapshot is saved
        store.entered.notified().await;

        let ack = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.acknowledge(a).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let c = tokio::time::timeout(Duration::from_secs(1), scheduler.enqueue(payload("c")))
            .await
            .expect("enqueue blocked behind acknowledge")
            .unwrap();
        let pending = tokio::time::timeout(Duration::from_secs(1), scheduler.get(c))
            .await
            .expect("get blocked behind acknowledge");
        assert_eq!(pending.unwrap().state, DeliveryState::Pending);

        store.release.add_permits(1);
        batch.settle().await;
        let acked = ack.await.unwrap().unwrap();
        assert_eq!(acked.state, DeliveryState::Succeeded);
        assert!(scheduler.get(a).await.is_none());
    }

    #[tokio::test]
    async fn cancel_pending_prevents_dispatch() {
        let h = scripted();
        let id = h.scheduler.enqueue(payload("c")).await.unwrap();

        assert_eq!(
            h.scheduler.cancel(id).await.unwrap(),
            CancelDisposition::Cancelled
        );
        assert!(h.cycle().await.is_empty());
        assert_eq!(h.state(id).await, DeliveryState::Cancelled);
        assert_eq!(
            h.store.get(id).await.unwrap().unwrap().state,
            DeliveryState::Cancelled
        );
        assert_eq!(h.sender.call_count("c").await, 0);
    }

    #[tokio::test]
    async fn cancel_in_flight_applies_outcome_then_stops() {
        let h = Harness::with_sender(
            SchedulerConfig::default(),
            GatedSender::new(SendOutcome::transient("busy")),
        );
        let id = h.scheduler.enqueue(payload("c")).await.unwrap();
        let batch = h.scheduler.run_cycle().await;

        assert_eq!(
            h.scheduler.cancel(id).await.unwrap(),
            CancelDisposition::Deferred
        );

        h.sender.gate.add_permits(1);
        batch.settle().await;

        let d = h.scheduler.get(id).await.unwrap();
        assert_eq!(d.state, DeliveryState::Cancelled);
        assert_eq!(d.attempt_count, 1);

        h.clock.advance(Duration::from_secs(86_400));
        assert!(h.scheduler.run_cycle().await.dispatched.is_empty());
    }

    #[tokio::test]
    async fn cancel_rejects_unknown_and_terminal() {
        let h = scripted();
        let err = h
            .scheduler
            .cancel(DeliverableId::from_u128(99))
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::NotFound(_)));

        let id = h.scheduler.enqueue(payload("ok")).await.unwrap();
        h.cycle().await;
        let err = h.scheduler.cancel(id).await.unwrap_err();
        assert!(matches!(err, CourierError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn acknowledge_releases_only_terminal_records() {
        let h = scripted();
        let done = h.scheduler.enqueue(payload("done")).await.unwrap();
        h.cycle().await;
        let waiting = h.scheduler.enqueue(payload("waiting")).await.unwrap();

        let err = h.scheduler.acknowledge(waiting).await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::InvalidTransition { action: "acknowledge", .. }
        ));

        let final_state = h.scheduler.acknowledge(done).await.unwrap();
        assert_eq!(final_state.state, DeliveryState::Succeeded);
        assert!(h.scheduler.get(done).await.is_none());
        // the store still has it
        assert!(h.store.get(done).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failures_are_isolated_per_record() {
        let h = scripted();
        h.sender.script("perm", [SendOutcome::permanent("blocked")]).await;
        h.sender.script("flaky", [SendOutcome::transient("timeout")]).await;
        let perm = h.scheduler.enqueue(payload("perm")).await.unwrap();
        let flaky = h.scheduler.enqueue(payload("flaky")).await.unwrap();
        let fine = h.scheduler.enqueue(payload("fine")).await.unwrap();

        h.cycle().await;

        assert_eq!(h.state(perm).await, DeliveryState::FailedExhausted);
        assert_eq!(h.state(flaky).await, DeliveryState::FailedRetrying);
        assert_eq!(h.state(fine).await, DeliveryState::Succeeded);

        let counts = h.scheduler.counts_by_state().await;
        assert_eq!(counts.failed_exhausted, 1);
        assert_eq!(counts.failed_retrying, 1);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.outstanding(), 1);
    }

    #[tokio::test]
    async fn store_outage_does_not_stall_delivery() {
        let h = scripted();
        let id = h.scheduler.enqueue(payload("s")).await.unwrap();
        h.store.set_unavailable(true);

        h.cycle().await;
        assert_eq!(h.state(id).await, DeliveryState::Succeeded);

        // new submissions do surface the outage
        let err = h.scheduler.enqueue(payload("t")).await.unwrap_err();
        assert!(matches!(err, CourierError::Store(_)));
    }

    #[tokio::test]
    async fn submit_rejects_duplicates_and_non_pending() {
        let h = scripted();
        let d = Deliverable::new(DeliverableId::from_u128(1), payload("x"), t0());
        h.scheduler.submit(d.clone()).await.unwrap();

        let err = h.scheduler.submit(d.clone()).await.unwrap_err();
        assert!(matches!(err, CourierError::DuplicateDeliverable(_)));

        let mut done = Deliverable::new(DeliverableId::from_u128(2), payload("y"), t0());
        done.state = DeliveryState::Succeeded;
        let err = h.scheduler.submit(done).await.unwrap_err();
        assert!(matches!(err, CourierError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn rehydrate_readmits_non_terminal_records() {
        let store = Arc::new(InMemoryDeliverableStore::new());

        let pending = Deliverable::new(DeliverableId::from_u128(1), payload("pending"), t0() - minutes(10));

        let mut retrying = Deliverable::new(DeliverableId::from_u128(2), payload("retrying"), t0() - minutes(9));
        retrying.state = DeliveryState::FailedRetrying;
        retrying.attempt_count = 1;
        retrying.next_eligible_at = Some(t0() + minutes(5));

        let mut stuck = Deliverable::new(DeliverableId::from_u128(3), payload("stuck"), t0() - minutes(8));
        stuck.state = DeliveryState::InFlight;
        stuck.in_flight_since = Some(t0() - minutes(3));

        let mut done = Deliverable::new(DeliverableId::from_u128(4), payload("done"), t0() - minutes(7));
        done.state = DeliveryState::Succeeded;

        for d in [&pending, &retrying, &stuck, &done] {
            store.save(d).await.unwrap();
        }

        let clock = Arc::new(FixedClock::new(t0()));
        let sender = Arc::new(ScriptedSender::new());
        let scheduler = RetryScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            sender.clone(),
            store.clone(),
        )
        .unwrap();

        assert_eq!(scheduler.rehydrate().await.unwrap(), 3);
        assert!(scheduler.get(done.id).await.is_none());

        let batch = scheduler.run_cycle().await;
        assert_eq!(batch.expired, vec![stuck.id]);
        assert_eq!(batch.dispatched, vec![pending.id]);
        batch.settle().await;

        let s = scheduler.get(stuck.id).await.unwrap();
        assert_eq!(s.state, DeliveryState::FailedRetrying);
        assert_eq!(s.attempt_count, 1);

        // both retries come due together; enqueue order decides
        clock.set(t0() + minutes(5));
        let batch = scheduler.run_cycle().await;
        assert_eq!(batch.dispatched, vec![retrying.id, stuck.id]);
        batch.settle().await;

        let counts = scheduler.counts_by_state().await;
        assert_eq!(counts.succeeded, 3);
        assert_eq!(counts.outstanding(), 0);

        // second rehydrate finds nothing new
        assert_eq!(scheduler.rehydrate().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn background_loop_drives_retries_to_completion() {
        let config = SchedulerConfig {
            poll_interval_ms: 10,
            backoff: BackoffPolicy::exponential(Duration::ZERO, 1, Duration::ZERO),
            ..SchedulerConfig::default()
        };
        let sender = Arc::new(ScriptedSender::new());
        sender
            .script("loop", [SendOutcome::transient("1"), SendOutcome::transient("2")])
            .await;
        let scheduler = RetryScheduler::new(
            config,
            Arc::new(SystemClock),
            sender.clone(),
            Arc::new(InMemoryDeliverableStore::new()),
        )
        .unwrap();

        let handle = scheduler.spawn();
        let id = scheduler.enqueue(payload("loop")).await.unwrap();

        let done = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let d = scheduler.get(id).await.unwrap();
                if d.is_terminal() {
                    return d;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(done.state, DeliveryState::Succeeded);
        assert_eq!(done.attempt_count, 2);
        assert_eq!(sender.call_count("loop").await, 3);

        handle.shutdown_and_join().await;
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = SchedulerConfig {
            max_attempts: 0,
            ..SchedulerConfig::default()
        };
        let result = RetryScheduler::new(
            config,
            Arc::new(SystemClock),
            Arc::new(ScriptedSender::new()),
            Arc::new(InMemoryDeliverableStore::new()),
        );
        assert!(matches!(result, Err(CourierError::InvalidArgument(_))));
    }
}
