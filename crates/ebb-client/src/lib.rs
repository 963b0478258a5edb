//! High-level client for ebb.
//!
//! Wires the durable event store, network monitor, sync engine, and
//! optimistic cache into the API an application embeds: enqueue a
//! mutation and it is identified, applied optimistically, persisted, and
//! eventually delivered exactly once in causal order; watch the status
//! surface for "N pending / N failed / syncing / offline" indicators.

pub mod client;
pub mod config;
pub mod error;

pub use client::EbbClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};

// Re-export the types applications interact with.
pub use ebb_cache::{EntityKind, Invalidation, SessionSnapshot, SnapshotFetcher};
pub use ebb_engine::{SubmitAck, SubmitError, Submitter};
pub use ebb_types::{EventId, EventStatus, MutationEvent, MutationPayload, SubjectId, SyncStatus};
