use async_trait::async_trait;
use thiserror::Error;

use ebb_types::MutationEvent;

/// Successful submission acknowledgment from the remote authority.
///
/// Carries the identifiers the server assigned to records the mutation
/// created, so the optimistic cache can adopt them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmitAck {
    /// Server identifier of the record the mutation created or touched.
    pub remote_id: Option<String>,
}

impl SubmitAck {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(remote_id.into()),
        }
    }
}

/// Typed submission failure, split along the retry boundary.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// Network/timeout/server-unavailable. Retried with backoff.
    #[error("transient delivery error: {0}")]
    Transient(String),

    /// The server deems the mutation invalid. Never retried.
    #[error("permanent rejection: {0}")]
    Permanent(String),
}

/// Remote submission interface, supplied by the API client.
///
/// The event's id doubles as the idempotency key: the server deduplicates
/// on it, so a retry after an ambiguous network failure cannot
/// double-apply. Implementations must therefore present the same event id
/// on every retry — the engine guarantees it passes the identical event.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, event: &MutationEvent) -> Result<SubmitAck, SubmitError>;
}
