use ebb_types::MutationEvent;

use crate::submit::SubmitAck;

/// Hook for delivery outcomes, implemented by the optimistic cache layer.
///
/// Callbacks run on the engine's drain tasks and must not block.
pub trait DeliveryObserver: Send + Sync {
    /// The event was acknowledged by the server and left the queue.
    /// Gives the cache the server-assigned identifiers to adopt.
    fn on_synced(&self, event: &MutationEvent, ack: &SubmitAck);

    /// The server permanently rejected the event. The optimistic effect
    /// must be undone. Invoked exactly once per rejected event, never for
    /// transient retries.
    fn on_rejected(&self, event: &MutationEvent, reason: &str);

    /// The event exhausted its retry budget and was marked failed. The
    /// optimistic effect is kept (the user resolves it explicitly).
    fn on_retries_exhausted(&self, _event: &MutationEvent, _reason: &str) {}
}

/// Observer that ignores every outcome. Useful for tests and headless
/// embeddings.
pub struct NullObserver;

impl DeliveryObserver for NullObserver {
    fn on_synced(&self, _event: &MutationEvent, _ack: &SubmitAck) {}
    fn on_rejected(&self, _event: &MutationEvent, _reason: &str) {}
}
