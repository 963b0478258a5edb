//! Optimistic cache layer for ebb.
//!
//! Holds the UI-facing projection of tracked sessions: the last
//! authoritative server state per subject (the *base*) plus the pending
//! mutations applied optimistically on top (the *overlays*). The
//! projection is derived and disposable — the event store stays the
//! canonical owner of every queued mutation, and authoritative state
//! always wins on reconciliation.
//!
//! - [`OptimisticBridge`] — apply/revert/confirm of optimistic effects
//! - [`SessionSnapshot`] — the read model projected for the UI
//! - [`ReconciliationChannel`] — consumes server push invalidations and
//!   re-fetches affected subjects

pub mod bridge;
pub mod error;
pub mod reconcile;
pub mod snapshot;

pub use bridge::OptimisticBridge;
pub use error::FetchError;
pub use reconcile::{EntityKind, Invalidation, ReconciliationChannel, SnapshotFetcher};
pub use snapshot::{ContractionRecord, SessionSnapshot, UpdatePost};
