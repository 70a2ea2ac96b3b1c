//! Error types for refinery operations.

use thiserror::Error;

use crate::adapter::AdapterError;
use crate::request::MergeStatus;
use crate::ticket::{StoreError, TicketId};

/// Errors surfaced by manager and processor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No current merge request matches the given id or branch.
    #[error("merge request not found: {id}")]
    NotFound { id: String },

    /// Retry was requested for a merge request that is not in the failed state.
    #[error("merge request {id} is {status}, not failed - nothing to retry")]
    NotFailed { id: TicketId, status: MergeStatus },

    /// A source control operation failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The ticket store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Not-found error for an id or branch selector.
    pub fn not_found(selector: impl Into<String>) -> Self {
        Self::NotFound {
            id: selector.into(),
        }
    }

    /// Returns true when the error wraps a lost optimistic update.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict(_)))
    }
}

/// Result alias for refinery operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_failed_names_the_observed_status() {
        let err = Error::NotFailed {
            id: TicketId::from("mr-7"),
            status: MergeStatus::Ready,
        };
        assert_eq!(
            err.to_string(),
            "merge request mr-7 is ready, not failed - nothing to retry"
        );
    }

    #[test]
    fn store_conflict_reads_as_conflict() {
        let err = Error::from(StoreError::Conflict(TicketId::from("mr-1")));
        assert!(err.is_conflict());
        assert!(!Error::not_found("mr-1").is_conflict());
    }
}
