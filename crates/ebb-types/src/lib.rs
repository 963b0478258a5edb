//! Foundation types for ebb.
//!
//! This crate provides the identifier, event, and status types used
//! throughout the ebb sync engine. Every other ebb crate depends on
//! `ebb-types`.
//!
//! # Key Types
//!
//! - [`EventId`] — 128-bit time-ordered mutation identifier (48-bit
//!   millisecond timestamp + 80 bits of entropy, base-32 rendered)
//! - [`SubjectId`] — the tracked session aggregate a mutation applies to
//! - [`MutationEvent`] — one durable record of a user-intended change
//! - [`MutationKind`] / [`MutationPayload`] — the closed set of mutations
//! - [`EventStatus`] — queue lifecycle state of an event
//! - [`SyncStatus`] — process-wide snapshot for UI consumption

pub mod error;
pub mod event;
pub mod id;
pub mod status;

pub use error::IdError;
pub use event::{MutationEvent, MutationKind, MutationPayload, SubjectId};
pub use id::EventId;
pub use status::{EventStatus, StoreCounts, SyncStatus};
