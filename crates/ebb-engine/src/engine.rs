use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use ebb_store::EventStore;
use ebb_types::{EventId, EventStatus, MutationEvent, SubjectId, SyncStatus};

use crate::backoff::BackoffPolicy;
use crate::config::EngineConfig;
use crate::observer::DeliveryObserver;
use crate::submit::{SubmitError, Submitter};

/// External drain triggers.
enum Trigger {
    /// An event was appended; drain if online.
    Nudge,
    /// Explicit user-initiated sync request.
    SyncNow,
    /// A collaborator observed a storage failure; stick the degraded flag.
    Degraded,
}

/// Shared state between the run loop and per-subject drain tasks.
struct Shared {
    store: Arc<dyn EventStore>,
    submitter: Arc<dyn Submitter>,
    observer: Arc<dyn DeliveryObserver>,
    config: EngineConfig,
    policy: BackoffPolicy,
    /// Backoff deadlines for events awaiting their next try.
    blocked: Mutex<HashMap<EventId, Instant>>,
}

impl Shared {
    fn earliest_deadline(&self) -> Option<Instant> {
        self.blocked
            .lock()
            .expect("backoff lock poisoned")
            .values()
            .min()
            .copied()
    }

    fn blocked_until(&self, id: &EventId) -> Option<Instant> {
        self.blocked
            .lock()
            .expect("backoff lock poisoned")
            .get(id)
            .copied()
    }

    fn unblock(&self, id: &EventId) {
        self.blocked
            .lock()
            .expect("backoff lock poisoned")
            .remove(id);
    }

    fn block_until(&self, id: EventId, deadline: Instant) {
        self.blocked
            .lock()
            .expect("backoff lock poisoned")
            .insert(id, deadline);
    }
}

/// The sync engine: drains the local event queue to the remote authority.
///
/// Spawned as a single tokio task, so at most one drain pass runs at a
/// time; triggers arriving mid-pass coalesce into one follow-up pass.
/// A pass claims all pending events, then submits per subject — strictly
/// one at a time within a subject, subjects concurrently. Outcomes are
/// translated into store transitions; nothing propagates to callers.
pub struct SyncEngine {
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    status_rx: watch::Receiver<SyncStatus>,
    shared: Arc<Shared>,
}

impl SyncEngine {
    /// Spawn the engine on the current runtime.
    ///
    /// `online_rx` is the network monitor's debounced state. The engine
    /// stops when the monitor and all trigger handles are gone.
    pub fn spawn(
        store: Arc<dyn EventStore>,
        submitter: Arc<dyn Submitter>,
        observer: Arc<dyn DeliveryObserver>,
        online_rx: watch::Receiver<bool>,
        config: EngineConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            submitter,
            observer,
            config,
            policy: BackoffPolicy::new(config.backoff),
            blocked: Mutex::new(HashMap::new()),
        });
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());

        let task = EngineTask {
            shared: Arc::clone(&shared),
            trigger_rx,
            online_rx,
            status_tx,
            degraded: false,
        };
        tokio::spawn(task.run());

        Self {
            trigger_tx,
            status_rx,
            shared,
        }
    }

    /// Notify the engine that a new event was appended.
    pub fn nudge(&self) {
        let _ = self.trigger_tx.send(Trigger::Nudge);
    }

    /// Request an immediate drain pass.
    pub fn sync_now(&self) {
        let _ = self.trigger_tx.send(Trigger::SyncNow);
    }

    /// Mark the status surface degraded after a storage failure observed
    /// outside the engine.
    pub fn report_degraded(&self) {
        let _ = self.trigger_tx.send(Trigger::Degraded);
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Remaining backoff per blocked event, for inspection and tests.
    pub fn backoff_remaining(&self) -> HashMap<EventId, Duration> {
        let now = Instant::now();
        self.shared
            .blocked
            .lock()
            .expect("backoff lock poisoned")
            .iter()
            .map(|(id, deadline)| (*id, deadline.saturating_duration_since(now)))
            .collect()
    }
}

/// Run-loop state owned by the engine task.
struct EngineTask {
    shared: Arc<Shared>,
    trigger_rx: mpsc::UnboundedReceiver<Trigger>,
    online_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<SyncStatus>,
    degraded: bool,
}

impl EngineTask {
    async fn run(mut self) {
        info!("sync engine started");
        self.publish(false);

        loop {
            // Arm the retry timer at the earliest backoff deadline, but
            // only while online: offline, a past-due deadline would spin
            // the loop without ever becoming actionable.
            let deadline = self.shared.earliest_deadline();
            let timer_armed = deadline.is_some() && *self.online_rx.borrow();
            let retry_at =
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                changed = self.online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *self.online_rx.borrow();
                    debug!(online, "connectivity changed");
                    if online {
                        self.drain().await;
                    } else {
                        self.publish(false);
                    }
                }
                trigger = self.trigger_rx.recv() => {
                    match trigger {
                        None => break,
                        Some(Trigger::Degraded) => {
                            self.degraded = true;
                            self.publish(false);
                        }
                        Some(_) => {
                            if *self.online_rx.borrow() {
                                self.drain().await;
                            } else {
                                // Offline: just refresh the counts.
                                self.publish(false);
                            }
                        }
                    }
                }
                _ = sleep_until(retry_at), if timer_armed => {
                    self.drain().await;
                }
            }
        }
        info!("sync engine stopped");
    }

    /// One drain pass. Never runs concurrently with itself: the run loop
    /// is the only caller and awaits completion.
    async fn drain(&mut self) {
        // Coalesce triggers that accumulated before this pass.
        while let Ok(trigger) = self.trigger_rx.try_recv() {
            if matches!(trigger, Trigger::Degraded) {
                self.degraded = true;
            }
        }

        self.publish(true);

        if let Err(e) = self.shared.store.claim_next_batch(None) {
            error!(error = %e, "claim failed; store degraded");
            self.degraded = true;
            self.publish(false);
            return;
        }

        // The work set is every in-flight event: freshly claimed ones plus
        // leftovers from passes that stopped on backoff or connectivity
        // loss.
        let work = match self.shared.store.list(None) {
            Ok(events) => events
                .into_iter()
                .filter(|e| e.status == EventStatus::InFlight)
                .collect::<Vec<_>>(),
            Err(e) => {
                error!(error = %e, "list failed; store degraded");
                self.degraded = true;
                self.publish(false);
                return;
            }
        };

        // Drop backoff entries for events no longer in the queue (synced,
        // failed externally, or removed), so the retry timer cannot spin
        // on them.
        {
            let mut blocked = self.shared.blocked.lock().expect("backoff lock poisoned");
            blocked.retain(|id, _| work.iter().any(|e| &e.id == id));
        }

        // Group per subject; `list` is ascending by id, and the grouping
        // preserves that order within each subject.
        let mut by_subject: BTreeMap<SubjectId, Vec<MutationEvent>> = BTreeMap::new();
        for event in work {
            by_subject
                .entry(event.subject.clone())
                .or_default()
                .push(event);
        }

        debug!(subjects = by_subject.len(), "drain pass started");

        let mut tasks = JoinSet::new();
        for (subject, events) in by_subject {
            let shared = Arc::clone(&self.shared);
            let online_rx = self.online_rx.clone();
            tasks.spawn(drain_subject(shared, online_rx, subject, events));
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(degraded) => self.degraded |= degraded,
                Err(e) => error!(error = %e, "drain task panicked"),
            }
        }

        self.publish(false);
        debug!("drain pass finished");
    }

    fn publish(&mut self, is_syncing: bool) {
        let counts = match self.shared.store.counts() {
            Ok(counts) => counts,
            Err(e) => {
                error!(error = %e, "counts failed; store degraded");
                self.degraded = true;
                Default::default()
            }
        };
        let status = SyncStatus {
            is_online: *self.online_rx.borrow(),
            pending_count: counts.pending + counts.in_flight,
            failed_count: counts.failed,
            is_syncing,
            degraded: self.degraded,
        };
        let _ = self.status_tx.send(status);
    }
}

/// Submit one subject's events strictly in id order.
///
/// Stops at the first event that is blocked on backoff or fails
/// transiently (the causal gate: a successor is never attempted before
/// its predecessor reaches `Synced` or `Failed`), and when connectivity
/// drops. Returns whether a storage failure degraded the pass.
async fn drain_subject(
    shared: Arc<Shared>,
    online_rx: watch::Receiver<bool>,
    subject: SubjectId,
    events: Vec<MutationEvent>,
) -> bool {
    for event in events {
        if !*online_rx.borrow() {
            debug!(%subject, "connectivity lost; stopping subject");
            return false;
        }

        // Backoff gate: a blocked head event holds back the whole subject.
        if let Some(deadline) = shared.blocked_until(&event.id) {
            if Instant::now() < deadline {
                debug!(id = %event.id, %subject, "event blocked on backoff; stopping subject");
                return false;
            }
        }

        let outcome = match timeout(
            shared.config.submit_timeout,
            shared.submitter.submit(&event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Transient("submission timed out".into())),
        };

        match outcome {
            Ok(ack) => {
                shared.unblock(&event.id);
                if let Err(e) = shared.store.mark_synced(&event.id) {
                    error!(id = %event.id, error = %e, "mark_synced failed");
                    return true;
                }
                debug!(id = %event.id, %subject, "event synced");
                shared.observer.on_synced(&event, &ack);
            }
            Err(SubmitError::Permanent(reason)) => {
                shared.unblock(&event.id);
                if let Err(e) = shared.store.mark_failed(&event.id, &reason) {
                    error!(id = %event.id, error = %e, "mark_failed failed");
                    return true;
                }
                warn!(id = %event.id, %subject, %reason, "event permanently rejected");
                shared.observer.on_rejected(&event, &reason);
                // A failed predecessor resolves the causal gate; continue
                // with the subject's next event.
            }
            Err(SubmitError::Transient(reason)) => {
                let failures = event.attempts + 1;
                if failures >= shared.config.max_attempts {
                    shared.unblock(&event.id);
                    let full = format!("retries exhausted: {reason}");
                    if let Err(e) = shared.store.mark_failed(&event.id, &full) {
                        error!(id = %event.id, error = %e, "mark_failed failed");
                        return true;
                    }
                    warn!(id = %event.id, %subject, attempts = event.attempts, "retries exhausted");
                    shared.observer.on_retries_exhausted(&event, &full);
                } else {
                    if let Err(e) = shared.store.mark_retry(&event.id) {
                        error!(id = %event.id, error = %e, "mark_retry failed");
                        return true;
                    }
                    let delay = shared.policy.delay(failures);
                    shared.block_until(event.id, Instant::now() + delay);
                    debug!(
                        id = %event.id,
                        %subject,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "transient failure; backing off"
                    );
                    // Do not advance past an unresolved event.
                    return false;
                }
            }
        }
    }
    false
}
