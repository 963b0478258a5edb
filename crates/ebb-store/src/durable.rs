use std::path::Path;
use std::sync::Mutex;

use tracing::{error, info, warn};

use ebb_types::{EventId, EventStatus, MutationEvent, StoreCounts, SubjectId};

use crate::error::StoreResult;
use crate::journal::{Journal, JournalRecord, SyncMode};
use crate::state::QueueState;
use crate::traits::EventStore;

/// Configuration for the journal-backed store.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Journal flush strategy.
    pub sync_mode: SyncMode,
    /// Skip compaction below this many replayed records.
    pub compact_min_records: usize,
    /// Compact when replayed records exceed `ratio × live events`.
    pub compact_ratio: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::EveryWrite,
            compact_min_records: 1024,
            compact_ratio: 4,
        }
    }
}

struct Inner {
    journal: Journal,
    state: QueueState,
}

/// Durable, journal-backed event store.
///
/// Every transition is journaled before it is applied, so the store's
/// contents are reconstructible after a crash at any point. Events left
/// `InFlight` by a crash (claimed, outcome never recorded) are demoted to
/// `Pending` on open. The journal is compacted on open when it has grown
/// well past the live event count.
pub struct JournalEventStore {
    inner: Mutex<Inner>,
    config: StoreConfig,
}

impl JournalEventStore {
    /// Open the store, replaying the journal at `path`.
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let journal = Journal::open(path, config.sync_mode)?;
        let records = journal.recover()?;
        let replayed = records.len();

        let mut state = QueueState::new();
        for record in &records {
            state.apply(record);
        }

        let demoted = state.demote_in_flight();
        if demoted > 0 {
            warn!(demoted, "re-derived pending state for events claimed before a crash");
        }

        let mut inner = Inner { journal, state };
        if replayed >= config.compact_min_records
            && replayed > inner.state.len().saturating_mul(config.compact_ratio)
        {
            Self::compact_inner(&mut inner)?;
        } else if demoted > 0 {
            // Persist the demotions so a second crash does not repeat the
            // recovery warning path.
            Self::compact_inner(&mut inner)?;
        }

        info!(
            path = %path.display(),
            replayed,
            live = inner.state.len(),
            "event store opened"
        );

        Ok(Self {
            inner: Mutex::new(inner),
            config,
        })
    }

    /// Rewrite the journal down to the live events.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        Self::compact_inner(&mut inner)
    }

    fn compact_inner(inner: &mut Inner) -> StoreResult<()> {
        let snapshot = inner.state.snapshot_records();
        inner.journal.rewrite(&snapshot)?;
        info!(live = snapshot.len(), "journal compacted");
        Ok(())
    }

    /// Journal a validated record, then apply it to the in-memory state.
    fn commit(inner: &mut Inner, record: JournalRecord) -> StoreResult<()> {
        inner.journal.append(&record)?;
        inner.state.apply(&record);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }

    /// The configured compaction/sync policy.
    pub fn config(&self) -> StoreConfig {
        self.config
    }
}

impl EventStore for JournalEventStore {
    fn append(&self, event: &MutationEvent) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Err(e) = inner.state.check_append(event) {
            error!(id = %event.id, error = %e, "append rejected");
            return Err(e);
        }
        Self::commit(&mut inner, JournalRecord::Appended(event.clone()))
    }

    fn claim_next_batch(&self, subject: Option<&SubjectId>) -> StoreResult<Vec<MutationEvent>> {
        let mut inner = self.lock();
        let ids = inner.state.pending_ids(subject);
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            Self::commit(&mut inner, JournalRecord::Claimed(id))?;
            claimed.push(inner.state.get(&id).expect("claimed event present"));
        }
        Ok(claimed)
    }

    fn mark_synced(&self, id: &EventId) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.state.check_transition(id, &[EventStatus::InFlight])?;
        Self::commit(&mut inner, JournalRecord::Synced(*id))
    }

    fn mark_failed(&self, id: &EventId, reason: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner
            .state
            .check_transition(id, &[EventStatus::Pending, EventStatus::InFlight])?;
        Self::commit(
            &mut inner,
            JournalRecord::Failed {
                id: *id,
                reason: reason.to_string(),
            },
        )
    }

    fn mark_retry(&self, id: &EventId) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.state.check_transition(id, &[EventStatus::InFlight])?;
        Self::commit(&mut inner, JournalRecord::Retried(*id))
    }

    fn remove_pending(&self, id: &EventId) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.state.status_of(id).is_none() {
            return Ok(false);
        }
        inner.state.check_transition(id, &[EventStatus::Pending])?;
        Self::commit(&mut inner, JournalRecord::Removed(*id))?;
        Ok(true)
    }

    fn get(&self, id: &EventId) -> StoreResult<Option<MutationEvent>> {
        Ok(self.lock().state.get(id))
    }

    fn list(&self, subject: Option<&SubjectId>) -> StoreResult<Vec<MutationEvent>> {
        Ok(self.lock().state.list(subject))
    }

    fn counts(&self) -> StoreResult<StoreCounts> {
        Ok(self.lock().state.counts())
    }
}

impl std::fmt::Debug for JournalEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("JournalEventStore")
            .field("path", &inner.journal.path())
            .field("live_events", &inner.state.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use ebb_types::MutationPayload;

    fn make_event(seq: u8, subject: &str) -> MutationEvent {
        MutationEvent::with_id(
            EventId::from_u128((1_000 + seq as u128) << 80 | seq as u128),
            SubjectId::new(subject),
            MutationPayload::PostUpdate {
                body: format!("update {seq}"),
            },
        )
    }

    fn open_store(dir: &tempfile::TempDir) -> JournalEventStore {
        JournalEventStore::open(&dir.path().join("events.journal"), StoreConfig::default())
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Append / claim ordering
    // -----------------------------------------------------------------------

    #[test]
    fn append_then_claim_returns_all_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        // Append out of id order.
        for seq in [3u8, 1, 2] {
            store.append(&make_event(seq, "s1")).unwrap();
        }

        let claimed = store.claim_next_batch(None).unwrap();
        assert_eq!(claimed.len(), 3);
        for w in claimed.windows(2) {
            assert!(w[0].id < w[1].id);
        }
        assert!(claimed.iter().all(|e| e.status == EventStatus::InFlight));

        // Nothing left to claim.
        assert!(store.claim_next_batch(None).unwrap().is_empty());
    }

    #[test]
    fn claim_scoped_to_subject() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.append(&make_event(1, "s1")).unwrap();
        store.append(&make_event(2, "s2")).unwrap();

        let claimed = store.claim_next_batch(Some(&SubjectId::new("s1"))).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].subject.as_str(), "s1");

        // The other subject's event is still pending.
        assert_eq!(store.counts().unwrap().pending, 1);
    }

    #[test]
    fn duplicate_append_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        assert!(matches!(
            store.append(&event),
            Err(StoreError::DuplicateId(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    #[test]
    fn synced_event_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        store.claim_next_batch(None).unwrap();
        store.mark_synced(&event.id).unwrap();

        assert!(store.get(&event.id).unwrap().is_none());
        assert_eq!(store.counts().unwrap(), StoreCounts::default());
    }

    #[test]
    fn mark_synced_requires_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        assert!(matches!(
            store.mark_synced(&event.id),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn retry_returns_to_pending_and_counts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let event = make_event(1, "s1");
        store.append(&event).unwrap();

        for expected_attempts in 1..=3u32 {
            store.claim_next_batch(None).unwrap();
            store.mark_retry(&event.id).unwrap();
            let current = store.get(&event.id).unwrap().unwrap();
            assert_eq!(current.status, EventStatus::Pending);
            assert_eq!(current.attempts, expected_attempts);
        }
    }

    #[test]
    fn failed_event_is_retained_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        store.claim_next_batch(None).unwrap();
        store.mark_failed(&event.id, "intensity out of range").unwrap();

        let failed = store.get(&event.id).unwrap().unwrap();
        assert_eq!(failed.status, EventStatus::Failed);
        assert_eq!(failed.failure.as_deref(), Some("intensity out of range"));
        assert_eq!(store.counts().unwrap().failed, 1);

        // Failed events are not claimable.
        assert!(store.claim_next_batch(None).unwrap().is_empty());
    }

    #[test]
    fn mark_failed_allowed_from_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        store.mark_failed(&event.id, "subject deleted on server").unwrap();
        assert_eq!(
            store.get(&event.id).unwrap().unwrap().status,
            EventStatus::Failed
        );
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let id = EventId::from_u128(42);
        assert!(matches!(store.mark_synced(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.mark_retry(&id), Err(StoreError::NotFound(_))));
        assert!(store.get(&id).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Direct removal
    // -----------------------------------------------------------------------

    #[test]
    fn remove_pending_only_while_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        assert!(store.remove_pending(&event.id).unwrap());
        assert!(!store.remove_pending(&event.id).unwrap()); // already gone

        let event = make_event(2, "s1");
        store.append(&event).unwrap();
        store.claim_next_batch(None).unwrap();
        assert!(matches!(
            store.remove_pending(&event.id),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Restart / crash recovery
    // -----------------------------------------------------------------------

    #[test]
    fn events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");

        {
            let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
            store.append(&make_event(1, "s1")).unwrap();
            store.append(&make_event(2, "s2")).unwrap();
        }

        let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
        let events = store.list(None).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.status == EventStatus::Pending));
    }

    #[test]
    fn crash_between_claim_and_outcome_re_derives_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");

        {
            let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
            store.append(&make_event(1, "s1")).unwrap();
            let claimed = store.claim_next_batch(None).unwrap();
            assert_eq!(claimed[0].status, EventStatus::InFlight);
            // Store dropped here with the event still in flight.
        }

        let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
        let event = store.list(None).unwrap().pop().unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        // A crash is not a delivery outcome; attempts unchanged.
        assert_eq!(event.attempts, 0);
    }

    #[test]
    fn failure_reason_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");
        let event = make_event(1, "s1");

        {
            let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
            store.append(&event).unwrap();
            store.claim_next_batch(None).unwrap();
            store.mark_failed(&event.id, "rejected by server").unwrap();
        }

        let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
        let failed = store.get(&event.id).unwrap().unwrap();
        assert_eq!(failed.status, EventStatus::Failed);
        assert_eq!(failed.failure.as_deref(), Some("rejected by server"));
    }

    #[test]
    fn attempts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");
        let event = make_event(1, "s1");

        {
            let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
            store.append(&event).unwrap();
            store.claim_next_batch(None).unwrap();
            store.mark_retry(&event.id).unwrap();
            store.claim_next_batch(None).unwrap();
            store.mark_retry(&event.id).unwrap();
        }

        let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.get(&event.id).unwrap().unwrap().attempts, 2);
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    #[test]
    fn compaction_preserves_live_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");
        let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();

        // Churn: one synced-away event, one failed, one pending.
        let gone = make_event(1, "s1");
        store.append(&gone).unwrap();
        store.claim_next_batch(None).unwrap();
        store.mark_synced(&gone.id).unwrap();

        let failed = make_event(2, "s1");
        store.append(&failed).unwrap();
        store.claim_next_batch(None).unwrap();
        store.mark_failed(&failed.id, "no").unwrap();

        let pending = make_event(3, "s2");
        store.append(&pending).unwrap();

        store.compact().unwrap();
        drop(store);

        let store = JournalEventStore::open(&path, StoreConfig::default()).unwrap();
        assert!(store.get(&gone.id).unwrap().is_none());
        assert_eq!(
            store.get(&failed.id).unwrap().unwrap().status,
            EventStatus::Failed
        );
        assert_eq!(
            store.get(&pending.id).unwrap().unwrap().status,
            EventStatus::Pending
        );
    }

    #[test]
    fn oversized_journal_compacts_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");
        let config = StoreConfig {
            compact_min_records: 8,
            compact_ratio: 2,
            ..StoreConfig::default()
        };

        {
            let store = JournalEventStore::open(&path, config).unwrap();
            // 10 events appended, claimed, synced: 30 records, 0 live.
            for seq in 0..10u8 {
                let event = make_event(seq, "s1");
                store.append(&event).unwrap();
                store.claim_next_batch(None).unwrap();
                store.mark_synced(&event.id).unwrap();
            }
            store.append(&make_event(99, "s1")).unwrap();
        }

        let store = JournalEventStore::open(&path, config).unwrap();
        assert_eq!(store.list(None).unwrap().len(), 1);

        // Re-open once more: the compacted journal replays to one record.
        drop(store);
        let store = JournalEventStore::open(&path, config).unwrap();
        assert_eq!(store.list(None).unwrap().len(), 1);
    }
}
