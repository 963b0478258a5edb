use thiserror::Error;

/// Errors surfaced to the embedding application.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The durable store rejected or failed an operation. I/O flavors of
    /// this also flip the degraded flag on the status surface.
    #[error("storage error: {0}")]
    Storage(#[from] ebb_store::StoreError),
}

pub type ClientResult<T> = Result<T, ClientError>;
