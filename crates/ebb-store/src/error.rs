use ebb_types::{EventId, EventStatus};

/// Errors from event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An event with this id already exists in any state. Treated as an
    /// entropy-exhaustion defect in the id generator.
    #[error("duplicate event id: {0}")]
    DuplicateId(EventId),

    /// The event does not exist in the store.
    #[error("event not found: {0}")]
    NotFound(EventId),

    /// The requested transition is not legal from the event's current
    /// status.
    #[error("invalid transition for {id}: event is {from}")]
    InvalidTransition { id: EventId, from: EventStatus },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the journal file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
