use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use ebb_cache::{Invalidation, OptimisticBridge, ReconciliationChannel, SnapshotFetcher};
use ebb_engine::{DeliveryObserver, SyncEngine, Submitter};
use ebb_net::{ConnectivityReporter, MonitorConfig, NetworkMonitor};
use ebb_store::{EventStore, JournalEventStore, StoreError};
use ebb_types::{
    EventId, EventStatus, MutationEvent, MutationPayload, SubjectId, SyncStatus,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// The embedding API: one client per process wiring the store, monitor,
/// engine, cache, and reconciliation lifecycle together.
///
/// Must be created inside a tokio runtime (background tasks are spawned
/// on it). The journal is fully replayed before the engine starts
/// draining, so restart recovery completes before any delivery.
pub struct EbbClient {
    store: Arc<dyn EventStore>,
    bridge: Arc<OptimisticBridge>,
    engine: Arc<SyncEngine>,
    monitor: NetworkMonitor,
    fetcher: Arc<dyn SnapshotFetcher>,
    push: Arc<Mutex<Option<ReconciliationChannel>>>,
}

impl EbbClient {
    /// Open the durable store at the configured location and spawn the
    /// background machinery.
    pub fn open(
        config: ClientConfig,
        submitter: Arc<dyn Submitter>,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> ClientResult<Self> {
        let store: Arc<dyn EventStore> =
            Arc::new(JournalEventStore::open(&config.journal_path(), config.store)?);
        Self::with_store(config, store, submitter, fetcher)
    }

    /// Like [`open`](Self::open) but over a caller-supplied store.
    /// Lets tests and embeddings run on an in-memory store.
    pub fn with_store(
        config: ClientConfig,
        store: Arc<dyn EventStore>,
        submitter: Arc<dyn Submitter>,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> ClientResult<Self> {
        let monitor = NetworkMonitor::spawn(MonitorConfig {
            debounce: config.debounce,
            initial_online: false,
        });
        let bridge = Arc::new(OptimisticBridge::new());
        let observer: Arc<dyn DeliveryObserver> = bridge.clone();
        let engine = Arc::new(SyncEngine::spawn(
            Arc::clone(&store),
            submitter,
            observer,
            monitor.subscribe(),
            config.engine,
        ));

        let push = Arc::new(Mutex::new(None::<ReconciliationChannel>));
        tokio::spawn(detach_on_offline(monitor.subscribe(), Arc::clone(&push)));

        info!("ebb client ready");
        Ok(Self {
            store,
            bridge,
            engine,
            monitor,
            fetcher,
            push,
        })
    }

    // ---- Mutation entry points ----

    /// Capture a user-intended change: identify it, apply it
    /// optimistically, persist it, and offer it to the sync engine.
    ///
    /// On a storage failure the optimistic effect is rolled back, the
    /// status surface turns degraded, and the error is returned — the
    /// mutation is never silently dropped.
    pub fn enqueue(
        &self,
        subject: SubjectId,
        payload: MutationPayload,
    ) -> ClientResult<EventId> {
        let event = MutationEvent::new(subject, payload);
        self.bridge.apply(&event);

        if let Err(e) = self.store.append(&event) {
            self.bridge.revert(&event);
            if matches!(e, StoreError::Io(_) | StoreError::Serialization(_)) {
                self.engine.report_degraded();
            }
            return Err(e.into());
        }

        self.engine.nudge();
        Ok(event.id)
    }

    /// Remove a queued mutation that has not yet left `Pending`, undoing
    /// its optimistic effect. Returns `false` if the event is unknown.
    /// Events past `Pending` can only be compensated by a new mutation.
    pub fn cancel_pending(&self, id: &EventId) -> ClientResult<bool> {
        let Some(event) = self.store.get(id)? else {
            return Ok(false);
        };
        if self.store.remove_pending(id)? {
            self.bridge.revert(&event);
            self.engine.nudge();
            return Ok(true);
        }
        Ok(false)
    }

    // ---- Domain helpers ----

    pub fn start_contraction(
        &self,
        subject: SubjectId,
        contraction_id: impl Into<String>,
        started_at: chrono::DateTime<chrono::Utc>,
        intensity: Option<u8>,
    ) -> ClientResult<EventId> {
        self.enqueue(
            subject,
            MutationPayload::StartContraction {
                contraction_id: contraction_id.into(),
                started_at,
                intensity,
            },
        )
    }

    pub fn end_contraction(
        &self,
        subject: SubjectId,
        contraction_id: impl Into<String>,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> ClientResult<EventId> {
        self.enqueue(
            subject,
            MutationPayload::EndContraction {
                contraction_id: contraction_id.into(),
                ended_at,
            },
        )
    }

    pub fn post_update(
        &self,
        subject: SubjectId,
        body: impl Into<String>,
    ) -> ClientResult<EventId> {
        self.enqueue(subject, MutationPayload::PostUpdate { body: body.into() })
    }

    // ---- Status surface ----

    /// Current sync snapshot.
    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Observable stream of status changes.
    pub fn status_stream(&self) -> watch::Receiver<SyncStatus> {
        self.engine.watch_status()
    }

    /// Request an immediate drain pass.
    pub fn sync_now(&self) {
        self.engine.sync_now();
    }

    /// Raw connectivity input for the platform integration.
    pub fn connectivity_reporter(&self) -> ConnectivityReporter {
        self.monitor.reporter()
    }

    /// Current debounced connectivity.
    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    // ---- Read access ----

    /// The UI-facing projection of a session.
    pub fn projection(&self, subject: &SubjectId) -> Option<ebb_cache::SessionSnapshot> {
        self.bridge.projection(subject)
    }

    /// Queued events, ascending by id.
    pub fn pending_events(&self, subject: Option<&SubjectId>) -> ClientResult<Vec<MutationEvent>> {
        let events = self.store.list(subject)?;
        Ok(events
            .into_iter()
            .filter(|e| !e.status.is_terminal())
            .collect())
    }

    /// Permanently failed events awaiting user resolution.
    pub fn failed_events(&self) -> ClientResult<Vec<MutationEvent>> {
        let events = self.store.list(None)?;
        Ok(events
            .into_iter()
            .filter(|e| e.status == EventStatus::Failed)
            .collect())
    }

    // ---- Push reconciliation lifecycle ----

    /// Attach a freshly established push connection.
    ///
    /// Performs a full authoritative refresh of every tracked subject
    /// first (the channel cannot be trusted to cover changes missed while
    /// offline), then consumes invalidations until the transport closes
    /// or connectivity drops.
    pub async fn attach_push(&self, rx: mpsc::UnboundedReceiver<Invalidation>) {
        let subjects = self.tracked_subjects();
        ReconciliationChannel::refresh(&subjects, &self.fetcher, &self.bridge, &self.store).await;

        let engine = Arc::clone(&self.engine);
        let channel = ReconciliationChannel::spawn(
            rx,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.bridge),
            Arc::clone(&self.store),
            move || engine.nudge(),
        );

        let mut slot = self.push.lock().expect("push lock poisoned");
        if let Some(old) = slot.replace(channel) {
            old.disconnect();
        }
        drop(slot);

        // The refresh may have superseded pending events; update counts.
        self.engine.nudge();
    }

    /// Returns `true` while a push channel is attached and alive.
    pub fn push_connected(&self) -> bool {
        self.push
            .lock()
            .expect("push lock poisoned")
            .as_ref()
            .map_or(false, ReconciliationChannel::is_connected)
    }

    fn tracked_subjects(&self) -> Vec<SubjectId> {
        let mut subjects: BTreeSet<SubjectId> = self.bridge.subjects().into_iter().collect();
        match self.store.list(None) {
            Ok(events) => {
                for event in events {
                    subjects.insert(event.subject);
                }
            }
            Err(e) => warn!(error = %e, "could not enumerate store subjects for refresh"),
        }
        subjects.into_iter().collect()
    }
}

/// Tears the push channel down whenever connectivity drops; the
/// application re-attaches after its transport reconnects.
async fn detach_on_offline(
    mut online_rx: watch::Receiver<bool>,
    push: Arc<Mutex<Option<ReconciliationChannel>>>,
) {
    while online_rx.changed().await.is_ok() {
        if !*online_rx.borrow() {
            if let Some(channel) = push.lock().expect("push lock poisoned").take() {
                channel.disconnect();
                info!("push channel detached on offline transition");
            }
        }
    }
}
