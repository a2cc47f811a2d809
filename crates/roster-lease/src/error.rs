//! Error types and result aliases for roster leases.
//!
//! The variants follow the lease failure taxonomy: what a caller can act on
//! (retry, show a holder, give up) is encoded in the variant, not the message.

use std::time::Duration;

/// The result type used throughout roster-lease.
pub type Result<T> = std::result::Result<T, LeaseError>;

/// Errors that can occur in lease operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    /// The backend rejected the operation because of its security policy.
    ///
    /// Acquire, release and query absorb this as fail-open; only
    /// administrative operations ever surface it.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Message reported by the backend.
        message: String,
    },

    /// A transient transport failure persisted past the retry budget.
    #[error("network failure after {attempts} attempt(s): {message}")]
    NetworkTransient {
        /// Message of the last failure.
        message: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The local deadline fired before the backend answered.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// Another editor holds a live lease on the entry.
    #[error("entry is being edited by {holder_name}")]
    Conflict {
        /// Display name of the current holder.
        holder_name: String,
    },

    /// A backend failure that is neither a permission nor a transport problem.
    #[error("unclassified failure: {message}")]
    Unclassified {
        /// Message reported by the backend.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LeaseError {
    /// Creates a timeout error for the named operation.
    #[must_use]
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Returns true when retrying the same call later may succeed.
    ///
    /// UIs use this to decide whether to offer "try again".
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkTransient { .. } | Self::Timeout { .. })
    }
}
