use std::sync::Mutex;

use tracing::error;

use ebb_types::{EventId, EventStatus, MutationEvent, StoreCounts, SubjectId};

use crate::error::StoreResult;
use crate::journal::JournalRecord;
use crate::state::QueueState;
use crate::traits::EventStore;

/// In-memory event store.
///
/// Same transition semantics as [`crate::JournalEventStore`] without
/// durability. Intended for tests and embedding.
pub struct InMemoryEventStore {
    state: Mutex<QueueState>,
}

impl InMemoryEventStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
        }
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("store lock poisoned")
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, event: &MutationEvent) -> StoreResult<()> {
        let mut state = self.lock();
        if let Err(e) = state.check_append(event) {
            error!(id = %event.id, error = %e, "append rejected");
            return Err(e);
        }
        state.apply(&JournalRecord::Appended(event.clone()));
        Ok(())
    }

    fn claim_next_batch(&self, subject: Option<&SubjectId>) -> StoreResult<Vec<MutationEvent>> {
        let mut state = self.lock();
        let ids = state.pending_ids(subject);
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            state.apply(&JournalRecord::Claimed(id));
            claimed.push(state.get(&id).expect("claimed event present"));
        }
        Ok(claimed)
    }

    fn mark_synced(&self, id: &EventId) -> StoreResult<()> {
        let mut state = self.lock();
        state.check_transition(id, &[EventStatus::InFlight])?;
        state.apply(&JournalRecord::Synced(*id));
        Ok(())
    }

    fn mark_failed(&self, id: &EventId, reason: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.check_transition(id, &[EventStatus::Pending, EventStatus::InFlight])?;
        state.apply(&JournalRecord::Failed {
            id: *id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn mark_retry(&self, id: &EventId) -> StoreResult<()> {
        let mut state = self.lock();
        state.check_transition(id, &[EventStatus::InFlight])?;
        state.apply(&JournalRecord::Retried(*id));
        Ok(())
    }

    fn remove_pending(&self, id: &EventId) -> StoreResult<bool> {
        let mut state = self.lock();
        if state.status_of(id).is_none() {
            return Ok(false);
        }
        state.check_transition(id, &[EventStatus::Pending])?;
        state.apply(&JournalRecord::Removed(*id));
        Ok(true)
    }

    fn get(&self, id: &EventId) -> StoreResult<Option<MutationEvent>> {
        Ok(self.lock().get(id))
    }

    fn list(&self, subject: Option<&SubjectId>) -> StoreResult<Vec<MutationEvent>> {
        Ok(self.lock().list(subject))
    }

    fn counts(&self) -> StoreResult<StoreCounts> {
        Ok(self.lock().counts())
    }
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("live_events", &self.len())
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
            EventId::from_u128((2_000 + seq as u128) << 80 | seq as u128),
            SubjectId::new(subject),
            MutationPayload::PostUpdate {
                body: format!("update {seq}"),
            },
        )
    }

    #[test]
    fn round_trip_append_claim() {
        let store = InMemoryEventStore::new();
        for seq in [5u8, 2, 9, 1] {
            store.append(&make_event(seq, "s1")).unwrap();
        }

        let claimed = store.claim_next_batch(None).unwrap();
        assert_eq!(claimed.len(), 4);
        for w in claimed.windows(2) {
            assert!(w[0].id < w[1].id);
        }
    }

    #[test]
    fn list_is_ascending_and_subject_scoped() {
        let store = InMemoryEventStore::new();
        store.append(&make_event(2, "s2")).unwrap();
        store.append(&make_event(1, "s1")).unwrap();
        store.append(&make_event(3, "s1")).unwrap();

        let all = store.list(None).unwrap();
        assert_eq!(all.len(), 3);
        for w in all.windows(2) {
            assert!(w[0].id < w[1].id);
        }

        let s1 = store.list(Some(&SubjectId::new("s1"))).unwrap();
        assert_eq!(s1.len(), 2);
        assert!(s1.iter().all(|e| e.subject.as_str() == "s1"));
    }

    #[test]
    fn duplicate_append_rejected() {
        let store = InMemoryEventStore::new();
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        assert!(matches!(
            store.append(&event),
            Err(StoreError::DuplicateId(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn full_lifecycle() {
        let store = InMemoryEventStore::new();
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        assert_eq!(store.counts().unwrap().pending, 1);

        store.claim_next_batch(None).unwrap();
        assert_eq!(store.counts().unwrap().in_flight, 1);

        store.mark_retry(&event.id).unwrap();
        assert_eq!(store.get(&event.id).unwrap().unwrap().attempts, 1);

        store.claim_next_batch(None).unwrap();
        store.mark_synced(&event.id).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn retry_requires_in_flight() {
        let store = InMemoryEventStore::new();
        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        assert!(matches!(
            store.mark_retry(&event.id),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn remove_pending_semantics() {
        let store = InMemoryEventStore::new();
        assert!(!store.remove_pending(&EventId::from_u128(7)).unwrap());

        let event = make_event(1, "s1");
        store.append(&event).unwrap();
        assert!(store.remove_pending(&event.id).unwrap());
        assert!(store.is_empty());
    }
}
