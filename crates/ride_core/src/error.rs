//! Error taxonomy shared by the conversation engine and the ride workflows.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::store::StoreError;

/// Errors surfaced by core operations.
///
/// Only `Upstream` is meant to reach the transport layer; the engine turns the
/// other variants into a reply for the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RideError {
    /// User-correctable input problem. The caller re-prompts.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record does not exist (anymore).
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A guard was already claimed by another worker.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The state table or action wiring is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The store or the outbound channel failed; the whole turn may be retried.
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

impl RideError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        RideError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether retrying the whole turn can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RideError::Upstream(_))
    }
}

impl From<StoreError> for RideError {
    fn from(error: StoreError) -> Self {
        RideError::Upstream(format!("store: {error}"))
    }
}

impl From<ChannelError> for RideError {
    fn from(error: ChannelError) -> Self {
        RideError::Upstream(format!("channel: {error}"))
    }
}

pub type RideResult<T> = std::result::Result<T, RideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_retryable_upstream_errors() {
        let err: RideError = StoreError::Unavailable("connection reset".to_string()).into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn not_found_formats_kind_and_id() {
        let err = RideError::not_found("ride request", "abc");
        assert_eq!(err.to_string(), "ride request not found: abc");
        assert!(!err.is_retryable());
    }
}
