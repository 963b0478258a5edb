//! Sync engine for ebb.
//!
//! Drives delivery of queued mutation events to the remote authority:
//! drains the local store in id order whenever online, one event at a time
//! within a subject (independent subjects in parallel), with exponential
//! backoff on transient failures and immediate escalation of permanent
//! rejections. Exposes a [`ebb_types::SyncStatus`] watch stream for UI
//! consumption.
//!
//! - [`Submitter`] — the remote submission interface (external collaborator)
//! - [`SyncEngine`] — the drain state machine, spawned as a tokio task
//! - [`DeliveryObserver`] — hook for optimistic-cache reconciliation
//! - [`BackoffPolicy`] — capped exponential backoff with jitter

pub mod backoff;
pub mod config;
pub mod engine;
pub mod observer;
pub mod submit;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use observer::{DeliveryObserver, NullObserver};
pub use submit::{SubmitAck, SubmitError, Submitter};
