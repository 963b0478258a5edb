use ebb_types::{EventId, MutationEvent, StoreCounts, SubjectId};

use crate::error::StoreResult;

/// Durable queue of pending mutation events.
///
/// All implementations must satisfy these invariants:
/// - The store owns the canonical copy of every non-terminal event;
///   callers receive copies, never shared references.
/// - Every enumeration is ascending by event id, so events of the same
///   subject are never reordered relative to each other.
/// - Operations are synchronous and atomic with respect to each other: no
///   two callers observe or mutate the same event concurrently, and no
///   operation suspends mid-write (no torn persisted state).
/// - Durable implementations must re-derive `Pending` state for events a
///   crash left `InFlight` on next load; no event is silently lost.
pub trait EventStore: Send + Sync {
    /// Persist a new `Pending` event.
    ///
    /// Fails with `StoreError::DuplicateId` if the id already exists in
    /// any state.
    fn append(&self, event: &MutationEvent) -> StoreResult<()>;

    /// Atomically transition all `Pending` events (optionally scoped to
    /// one subject) to `InFlight` and return them ascending by id.
    fn claim_next_batch(&self, subject: Option<&SubjectId>) -> StoreResult<Vec<MutationEvent>>;

    /// Remove a delivered event permanently. Legal only from `InFlight`.
    fn mark_synced(&self, id: &EventId) -> StoreResult<()>;

    /// Transition to `Failed`, persisting the reason. The event is
    /// retained and never auto-retried. Legal from `Pending` (a
    /// reconciliation superseded it) or `InFlight`.
    fn mark_failed(&self, id: &EventId, reason: &str) -> StoreResult<()>;

    /// Transition `InFlight` back to `Pending`, incrementing `attempts`.
    fn mark_retry(&self, id: &EventId) -> StoreResult<()>;

    /// Remove an event that has not yet left `Pending`. Returns `false`
    /// if the id is unknown; fails if the event is past `Pending`.
    fn remove_pending(&self, id: &EventId) -> StoreResult<bool>;

    /// Read-only snapshot of one event.
    fn get(&self, id: &EventId) -> StoreResult<Option<MutationEvent>>;

    /// Read-only enumeration, ascending by id, optionally scoped to one
    /// subject.
    fn list(&self, subject: Option<&SubjectId>) -> StoreResult<Vec<MutationEvent>>;

    /// Event counts by live status, for the status surface.
    fn counts(&self) -> StoreResult<StoreCounts>;
}
