/// Errors from identifier parsing and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The string is not a well-formed event identifier.
    #[error("invalid event identifier: {0:?}")]
    InvalidIdentifier(String),
}
