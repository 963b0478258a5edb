use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::debug;

use ebb_engine::{DeliveryObserver, SubmitAck};
use ebb_types::{EventId, MutationEvent, SubjectId};

use crate::snapshot::SessionSnapshot;

/// Per-subject cache entry: authoritative base plus pending overlays.
#[derive(Default)]
struct CacheEntry {
    /// Last server-confirmed state, if any.
    base: Option<SessionSnapshot>,
    /// Pending mutations, ordered by event id (the fold order).
    overlays: BTreeMap<EventId, MutationEvent>,
}

/// Applies a mutation's effect to local cached state before server
/// confirmation, and undoes it if the mutation is permanently rejected.
///
/// The bridge never mutates a base snapshot in place for an optimistic
/// change: the projection is recomputed by folding the overlay map over
/// the base, so reverting is just dropping an overlay. Once an event is
/// `Synced` or `Failed` the bridge's copy is no longer authoritative for
/// it — reconciliation replaces the base wholesale.
pub struct OptimisticBridge {
    entries: RwLock<HashMap<SubjectId, CacheEntry>>,
}

impl OptimisticBridge {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Apply a mutation optimistically. Synchronous; called at enqueue
    /// time before the event reaches the network.
    pub fn apply(&self, event: &MutationEvent) {
        let mut entries = self.write();
        let entry = entries.entry(event.subject.clone()).or_default();
        entry.overlays.insert(event.id, event.clone());
        debug!(id = %event.id, subject = %event.subject, "optimistic overlay applied");
    }

    /// Undo a mutation's optimistic effect. Returns `false` if no overlay
    /// for the event remains (already reverted or confirmed).
    pub fn revert(&self, event: &MutationEvent) -> bool {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(&event.subject) else {
            return false;
        };
        let removed = entry.overlays.remove(&event.id).is_some();
        if removed {
            debug!(id = %event.id, subject = %event.subject, "optimistic overlay reverted");
        }
        removed
    }

    /// Fold a synced event's effect into the base, adopting the server's
    /// identifiers, and drop its overlay.
    ///
    /// Used when no authoritative refresh is imminent; a later
    /// [`reconcile`](Self::reconcile) supersedes the folded state anyway.
    pub fn confirm(&self, event: &MutationEvent, ack: &SubmitAck) {
        let mut entries = self.write();
        let entry = entries.entry(event.subject.clone()).or_default();
        let base = entry
            .base
            .get_or_insert_with(|| SessionSnapshot::empty(event.subject.clone()));
        base.apply_event(event);
        base.confirm_event(event, ack);
        entry.overlays.remove(&event.id);
        debug!(id = %event.id, subject = %event.subject, "overlay confirmed into base");
    }

    /// Replace a subject's base with authoritative server state.
    ///
    /// `None` means the server no longer has the subject. Overlays of
    /// still-pending events are kept and re-applied on projection; the
    /// caller is responsible for failing pending events of a removed
    /// subject.
    pub fn reconcile(&self, subject: &SubjectId, snapshot: Option<SessionSnapshot>) {
        let mut entries = self.write();
        let entry = entries.entry(subject.clone()).or_default();
        debug!(%subject, present = snapshot.is_some(), "base reconciled");
        entry.base = snapshot;
        if entry.base.is_none() && entry.overlays.is_empty() {
            entries.remove(subject);
        }
    }

    /// The derived UI-facing view of a subject: base plus overlays folded
    /// in id order. `None` when the subject is entirely unknown.
    pub fn projection(&self, subject: &SubjectId) -> Option<SessionSnapshot> {
        let entries = self.read();
        let entry = entries.get(subject)?;
        if entry.base.is_none() && entry.overlays.is_empty() {
            return None;
        }
        let mut snapshot = entry
            .base
            .clone()
            .unwrap_or_else(|| SessionSnapshot::empty(subject.clone()));
        for event in entry.overlays.values() {
            snapshot.apply_event(event);
        }
        Some(snapshot)
    }

    /// Subjects currently cached (with a base or pending overlays).
    pub fn subjects(&self) -> Vec<SubjectId> {
        let mut subjects: Vec<SubjectId> = self.read().keys().cloned().collect();
        subjects.sort();
        subjects
    }

    /// Number of pending overlays for a subject.
    pub fn overlay_count(&self, subject: &SubjectId) -> usize {
        self.read()
            .get(subject)
            .map_or(0, |entry| entry.overlays.len())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SubjectId, CacheEntry>> {
        self.entries.read().expect("cache lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SubjectId, CacheEntry>> {
        self.entries.write().expect("cache lock poisoned")
    }
}

impl Default for OptimisticBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// The bridge is the engine's delivery observer: synced events fold into
/// the base, permanently rejected events are reverted, retry-exhausted
/// events keep their overlay for the user to resolve.
impl DeliveryObserver for OptimisticBridge {
    fn on_synced(&self, event: &MutationEvent, ack: &SubmitAck) {
        self.confirm(event, ack);
    }

    fn on_rejected(&self, event: &MutationEvent, _reason: &str) {
        self.revert(event);
    }
}
