use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ebb_store::EventStore;
use ebb_types::{EventStatus, SubjectId};

use crate::bridge::OptimisticBridge;
use crate::error::FetchError;
use crate::snapshot::SessionSnapshot;

/// Kinds of server entities a push invalidation can reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Session,
    Contraction,
    Update,
}

/// Inbound push message: "this entity changed on the server, refetch it."
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub entity: EntityKind,
    pub id: String,
}

/// Authoritative read interface, supplied by the API client.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch the server's current state of a session. `Ok(None)` means
    /// the session no longer exists server-side.
    async fn fetch_session(&self, subject: &SubjectId)
        -> Result<Option<SessionSnapshot>, FetchError>;

    /// Resolve which session a non-session entity belongs to. `Ok(None)`
    /// when the server no longer knows the entity.
    async fn resolve_subject(
        &self,
        entity: EntityKind,
        id: &str,
    ) -> Result<Option<SubjectId>, FetchError>;
}

/// Consumes push invalidations while a live connection exists and
/// refreshes affected subjects, superseding stale optimistic state.
///
/// One channel instance corresponds to one live push connection: the
/// client tears it down on an offline transition and spawns a fresh one
/// (after a full [`refresh`](Self::refresh)) once reconnected. Server
/// state always wins: a subject the server reports gone has its pending
/// events failed and their overlays reverted.
pub struct ReconciliationChannel {
    task: JoinHandle<()>,
}

impl ReconciliationChannel {
    /// Spawn a consumer over an established push connection's message
    /// stream. `notify` is invoked after store-affecting reconciliations
    /// (the client uses it to refresh the status surface).
    pub fn spawn(
        rx: mpsc::UnboundedReceiver<Invalidation>,
        fetcher: Arc<dyn SnapshotFetcher>,
        bridge: Arc<OptimisticBridge>,
        store: Arc<dyn EventStore>,
        notify: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let task = tokio::spawn(consume(rx, fetcher, bridge, store, notify));
        Self { task }
    }

    /// Tear the channel down (offline transition). Any queued
    /// invalidations are dropped; the reconnect refresh supersedes them.
    pub fn disconnect(self) {
        self.task.abort();
        info!("reconciliation channel disconnected");
    }

    /// Returns `true` while the consumer task is alive.
    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    /// Re-fetch every given subject, applying the server-wins policy.
    ///
    /// Called after reconnect, before the push channel is trusted again.
    pub async fn refresh(
        subjects: &[SubjectId],
        fetcher: &Arc<dyn SnapshotFetcher>,
        bridge: &Arc<OptimisticBridge>,
        store: &Arc<dyn EventStore>,
    ) {
        for subject in subjects {
            if let Err(e) = reconcile_subject(subject, fetcher, bridge, store).await {
                warn!(%subject, error = %e, "refresh fetch failed; keeping cached state");
            }
        }
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<Invalidation>,
    fetcher: Arc<dyn SnapshotFetcher>,
    bridge: Arc<OptimisticBridge>,
    store: Arc<dyn EventStore>,
    notify: impl Fn() + Send + Sync + 'static,
) {
    info!("reconciliation channel established");
    while let Some(invalidation) = rx.recv().await {
        let subject = match resolve(&invalidation, &fetcher).await {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                debug!(?invalidation, "entity unknown server-side; nothing to refresh");
                continue;
            }
            Err(e) => {
                warn!(?invalidation, error = %e, "failed to resolve invalidation; dropping");
                continue;
            }
        };

        match reconcile_subject(&subject, &fetcher, &bridge, &store).await {
            Ok(()) => notify(),
            Err(e) => {
                warn!(%subject, error = %e, "reconcile fetch failed; dropping invalidation");
            }
        }
    }
    info!("reconciliation channel closed by transport");
}

async fn resolve(
    invalidation: &Invalidation,
    fetcher: &Arc<dyn SnapshotFetcher>,
) -> Result<Option<SubjectId>, FetchError> {
    match invalidation.entity {
        EntityKind::Session => Ok(Some(SubjectId::new(invalidation.id.clone()))),
        EntityKind::Contraction | EntityKind::Update => {
            fetcher
                .resolve_subject(invalidation.entity, &invalidation.id)
                .await
        }
    }
}

/// Fetch one subject's authoritative state and reconcile the cache.
///
/// When the server no longer has the subject, its still-pending events
/// transition to `Failed` and their overlays are reverted (server wins).
async fn reconcile_subject(
    subject: &SubjectId,
    fetcher: &Arc<dyn SnapshotFetcher>,
    bridge: &Arc<OptimisticBridge>,
    store: &Arc<dyn EventStore>,
) -> Result<(), FetchError> {
    let snapshot = fetcher.fetch_session(subject).await?;
    let removed = snapshot.is_none();
    bridge.reconcile(subject, snapshot);

    if removed {
        let events = match store.list(Some(subject)) {
            Ok(events) => events,
            Err(e) => {
                warn!(%subject, error = %e, "store list failed during removal reconcile");
                return Ok(());
            }
        };
        for event in events {
            if event.status != EventStatus::Pending {
                continue;
            }
            match store.mark_failed(&event.id, "subject deleted on server") {
                Ok(()) => {
                    bridge.revert(&event);
                    debug!(id = %event.id, %subject, "pending event failed: subject deleted");
                }
                Err(e) => warn!(id = %event.id, error = %e, "failed to supersede pending event"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use ebb_store::InMemoryEventStore;
    use ebb_types::{EventId, MutationEvent, MutationPayload};

    /// Fetcher backed by a mutable map of server-side sessions.
    #[derive(Default)]
    struct MapFetcher {
        sessions: Mutex<HashMap<SubjectId, SessionSnapshot>>,
        owners: Mutex<HashMap<String, SubjectId>>,
    }

    #[async_trait]
    impl SnapshotFetcher for MapFetcher {
        async fn fetch_session(
            &self,
            subject: &SubjectId,
        ) -> Result<Option<SessionSnapshot>, FetchError> {
            Ok(self.sessions.lock().unwrap().get(subject).cloned())
        }

        async fn resolve_subject(
            &self,
            _entity: EntityKind,
            id: &str,
        ) -> Result<Option<SubjectId>, FetchError> {
            Ok(self.owners.lock().unwrap().get(id).cloned())
        }
    }

    fn subject() -> SubjectId {
        SubjectId::new("session-1")
    }

    fn make_event(seq: u8) -> MutationEvent {
        MutationEvent::with_id(
            EventId::from_u128((7_000 + seq as u128) << 80 | seq as u128),
            subject(),
            MutationPayload::PostUpdate {
                body: format!("update {seq}"),
            },
        )
    }

    fn server_snapshot(title: &str) -> SessionSnapshot {
        let mut snap = SessionSnapshot::empty(subject());
        snap.title = Some(title.into());
        snap
    }

    struct Fixture {
        fetcher: Arc<MapFetcher>,
        bridge: Arc<OptimisticBridge>,
        store: Arc<InMemoryEventStore>,
        tx: mpsc::UnboundedSender<Invalidation>,
        channel: ReconciliationChannel,
        notified: Arc<Mutex<usize>>,
    }

    fn fixture() -> Fixture {
        let fetcher = Arc::new(MapFetcher::default());
        let bridge = Arc::new(OptimisticBridge::new());
        let store = Arc::new(InMemoryEventStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let notified = Arc::new(Mutex::new(0));
        let notified_in = Arc::clone(&notified);
        let channel = ReconciliationChannel::spawn(
            rx,
            fetcher.clone() as Arc<dyn SnapshotFetcher>,
            Arc::clone(&bridge),
            store.clone() as Arc<dyn EventStore>,
            move || *notified_in.lock().unwrap() += 1,
        );
        Fixture {
            fetcher,
            bridge,
            store,
            tx,
            channel,
            notified,
        }
    }

    async fn settle() {
        // Let the consumer task drain its queue.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn session_invalidation_refreshes_base() {
        let f = fixture();
        f.fetcher
            .sessions
            .lock()
            .unwrap()
            .insert(subject(), server_snapshot("fresh"));

        f.tx.send(Invalidation {
                entity: EntityKind::Session,
                id: "session-1".into(),
            })
            .unwrap();
        settle().await;

        let projection = f.bridge.projection(&subject()).unwrap();
        assert_eq!(projection.title.as_deref(), Some("fresh"));
        assert_eq!(*f.notified.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn contraction_invalidation_resolves_owner() {
        let f = fixture();
        f.fetcher
            .sessions
            .lock()
            .unwrap()
            .insert(subject(), server_snapshot("via contraction"));
        f.fetcher
            .owners
            .lock()
            .unwrap()
            .insert("c-9".into(), subject());

        f.tx.send(Invalidation {
                entity: EntityKind::Contraction,
                id: "c-9".into(),
            })
            .unwrap();
        settle().await;

        let projection = f.bridge.projection(&subject()).unwrap();
        assert_eq!(projection.title.as_deref(), Some("via contraction"));
    }

    #[tokio::test]
    async fn deleted_subject_fails_pending_events() {
        let f = fixture();
        let event = make_event(1);
        f.store.append(&event).unwrap();
        f.bridge.apply(&event);
        // No server-side session: fetch_session returns None.

        f.tx.send(Invalidation {
                entity: EntityKind::Session,
                id: "session-1".into(),
            })
            .unwrap();
        settle().await;

        let failed = f.store.get(&event.id).unwrap().unwrap();
        assert_eq!(failed.status, EventStatus::Failed);
        assert_eq!(failed.failure.as_deref(), Some("subject deleted on server"));
        assert!(f.bridge.projection(&subject()).is_none());
    }

    #[tokio::test]
    async fn fetch_errors_drop_the_invalidation() {
        struct FailingFetcher;

        #[async_trait]
        impl SnapshotFetcher for FailingFetcher {
            async fn fetch_session(
                &self,
                _subject: &SubjectId,
            ) -> Result<Option<SessionSnapshot>, FetchError> {
                Err(FetchError::Remote("boom".into()))
            }
            async fn resolve_subject(
                &self,
                _entity: EntityKind,
                _id: &str,
            ) -> Result<Option<SubjectId>, FetchError> {
                Ok(Some(SubjectId::new("session-1")))
            }
        }

        let bridge = Arc::new(OptimisticBridge::new());
        let store = Arc::new(InMemoryEventStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let _channel = ReconciliationChannel::spawn(
            rx,
            Arc::new(FailingFetcher) as Arc<dyn SnapshotFetcher>,
            Arc::clone(&bridge),
            store as Arc<dyn EventStore>,
            || {},
        );

        tx.send(Invalidation {
            entity: EntityKind::Session,
            id: "session-1".into(),
        })
        .unwrap();
        settle().await;

        // Cache untouched; the channel keeps consuming.
        assert!(bridge.projection(&SubjectId::new("session-1")).is_none());
    }

    #[tokio::test]
    async fn disconnect_stops_consumption() {
        let f = fixture();
        assert!(f.channel.is_connected());
        f.channel.disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Sends after disconnect go nowhere.
        let result = f.tx.send(Invalidation {
            entity: EntityKind::Session,
            id: "session-1".into(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn refresh_applies_server_wins_across_subjects() {
        let fetcher = Arc::new(MapFetcher::default());
        let bridge = Arc::new(OptimisticBridge::new());
        let store = Arc::new(InMemoryEventStore::new());

        // Subject 1 exists server-side; subject 2 was deleted.
        let s1 = SubjectId::new("session-1");
        let s2 = SubjectId::new("session-2");
        fetcher
            .sessions
            .lock()
            .unwrap()
            .insert(s1.clone(), server_snapshot("kept"));

        let doomed = MutationEvent::with_id(
            EventId::from_u128(7_500 << 80),
            s2.clone(),
            MutationPayload::CompleteSession {
                completed_at: Utc::now(),
            },
        );
        store.append(&doomed).unwrap();
        bridge.apply(&doomed);

        let fetcher_dyn = fetcher.clone() as Arc<dyn SnapshotFetcher>;
        let store_dyn = store.clone() as Arc<dyn EventStore>;
        ReconciliationChannel::refresh(&[s1.clone(), s2.clone()], &fetcher_dyn, &bridge, &store_dyn)
            .await;

        assert_eq!(
            bridge.projection(&s1).unwrap().title.as_deref(),
            Some("kept")
        );
        assert!(bridge.projection(&s2).is_none());
        assert_eq!(
            store.get(&doomed.id).unwrap().unwrap().status,
            EventStatus::Failed
        );
    }
}
