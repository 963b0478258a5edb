//! Durable local event queue for ebb.
//!
//! The store owns the canonical copy of every non-terminal mutation event.
//! Events are persisted through an append-only, CRC-framed journal of
//! state-transition records, so the queue survives process restarts and a
//! crash between claiming and resolving an event is recoverable.
//!
//! - [`EventStore`] — the store interface consumed by the sync engine
//! - [`JournalEventStore`] — durable, journal-backed implementation
//! - [`InMemoryEventStore`] — same semantics without durability
//! - [`Journal`] — the framed append-only log underneath

pub mod durable;
pub mod error;
pub mod journal;
pub mod memory;
mod state;
pub mod traits;

pub use durable::{JournalEventStore, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use journal::{Journal, JournalRecord, SyncMode};
pub use memory::InMemoryEventStore;
pub use traits::EventStore;
