use thiserror::Error;

/// Errors from authoritative re-fetches.
///
/// The reconciliation channel logs these and drops the invalidation; the
/// next push or reconnect refresh supersedes it.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("remote fetch failed: {0}")]
    Remote(String),
}
