use std::collections::BTreeMap;

use tracing::warn;

use ebb_types::{EventId, EventStatus, MutationEvent, StoreCounts, SubjectId};

use crate::error::{StoreError, StoreResult};
use crate::journal::JournalRecord;

/// In-memory queue state, shared by the durable and in-memory stores.
///
/// Keyed by `EventId` in a `BTreeMap`, so every enumeration is ascending
/// by id for free. All transition rules live here; the durable store
/// journals a [`JournalRecord`] first and then applies it, replay applies
/// the same records in order.
#[derive(Default)]
pub(crate) struct QueueState {
    events: BTreeMap<EventId, MutationEvent>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of an event, if present.
    pub fn status_of(&self, id: &EventId) -> Option<EventStatus> {
        self.events.get(id).map(|e| e.status)
    }

    /// Validate that `event` may be appended as a new queue entry.
    pub fn check_append(&self, event: &MutationEvent) -> StoreResult<()> {
        if self.events.contains_key(&event.id) {
            return Err(StoreError::DuplicateId(event.id));
        }
        if event.status != EventStatus::Pending {
            return Err(StoreError::InvalidTransition {
                id: event.id,
                from: event.status,
            });
        }
        Ok(())
    }

    /// Validate a terminal/retry transition from the event's current
    /// status. `allowed` lists the statuses the transition is legal from.
    pub fn check_transition(&self, id: &EventId, allowed: &[EventStatus]) -> StoreResult<()> {
        match self.status_of(id) {
            None => Err(StoreError::NotFound(*id)),
            Some(from) if allowed.contains(&from) => Ok(()),
            Some(from) => Err(StoreError::InvalidTransition { id: *id, from }),
        }
    }

    /// Ids of all pending events, ascending, optionally scoped to one
    /// subject.
    pub fn pending_ids(&self, subject: Option<&SubjectId>) -> Vec<EventId> {
        self.events
            .values()
            .filter(|e| e.status == EventStatus::Pending)
            .filter(|e| subject.map_or(true, |s| &e.subject == s))
            .map(|e| e.id)
            .collect()
    }

    /// Apply a validated record to the state. Also the replay function:
    /// records referencing unknown ids are ignored with a warning (they
    /// can only arise from a journal whose prefix was lost).
    pub fn apply(&mut self, record: &JournalRecord) {
        match record {
            JournalRecord::Appended(event) => {
                self.events.insert(event.id, event.clone());
            }
            JournalRecord::Claimed(id) => {
                if let Some(e) = self.events.get_mut(id) {
                    e.status = EventStatus::InFlight;
                } else {
                    warn!(%id, "claim record for unknown event; ignoring");
                }
            }
            JournalRecord::Retried(id) => {
                if let Some(e) = self.events.get_mut(id) {
                    e.status = EventStatus::Pending;
                    e.attempts += 1;
                } else {
                    warn!(%id, "retry record for unknown event; ignoring");
                }
            }
            JournalRecord::Synced(id) | JournalRecord::Removed(id) => {
                self.events.remove(id);
            }
            JournalRecord::Failed { id, reason } => {
                if let Some(e) = self.events.get_mut(id) {
                    e.status = EventStatus::Failed;
                    e.failure = Some(reason.clone());
                } else {
                    warn!(%id, "failure record for unknown event; ignoring");
                }
            }
        }
    }

    /// Demote events a crash left `InFlight` back to `Pending`.
    ///
    /// Called once after replay: a claimed-but-unresolved event was never
    /// acknowledged, so it must become eligible again. Attempts are not
    /// incremented (no delivery outcome was observed).
    pub fn demote_in_flight(&mut self) -> usize {
        let mut demoted = 0;
        for event in self.events.values_mut() {
            if event.status == EventStatus::InFlight {
                event.status = EventStatus::Pending;
                demoted += 1;
            }
        }
        demoted
    }

    /// Snapshot of an event by id.
    pub fn get(&self, id: &EventId) -> Option<MutationEvent> {
        self.events.get(id).cloned()
    }

    /// All events ascending by id, optionally scoped to one subject.
    pub fn list(&self, subject: Option<&SubjectId>) -> Vec<MutationEvent> {
        self.events
            .values()
            .filter(|e| subject.map_or(true, |s| &e.subject == s))
            .cloned()
            .collect()
    }

    /// Event counts by live status.
    pub fn counts(&self) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for event in self.events.values() {
            match event.status {
                EventStatus::Pending => counts.pending += 1,
                EventStatus::InFlight => counts.in_flight += 1,
                EventStatus::Failed => counts.failed += 1,
                EventStatus::Synced => {}
            }
        }
        counts
    }

    /// Snapshot records reproducing the current state, for compaction.
    pub fn snapshot_records(&self) -> Vec<JournalRecord> {
        self.events
            .values()
            .map(|e| JournalRecord::Appended(e.clone()))
            .collect()
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.events.len()
    }
}
