//! Failure classification for remote lease operations.
//!
//! Every remote failure is labelled before the coordinator decides what to do
//! with it:
//!
//! | Class | Meaning | Coordinator reaction |
//! |-------|---------|----------------------|
//! | [`FailureClass::Permission`] | backend security policy missing or wrong | fail open |
//! | [`FailureClass::Network`] | transport could not reach the backend | bounded retry |
//! | [`FailureClass::Other`] | anything else | surface without retry |
//!
//! Rules are evaluated in that order, so a message mentioning both
//! "permission" and "timeout" is a permission failure.

use crate::error::LeaseError;
use crate::remote::{RemoteError, RemoteErrorCode};

/// Message fragments that mark a permission failure.
const PERMISSION_KEYWORDS: [&str; 3] = ["permission", "insufficient", "unauthorized"];

/// Message fragments that mark a transport failure.
const NETWORK_KEYWORDS: [&str; 14] = [
    "offline",
    "network",
    "no connectivity",
    "timed out",
    "timeout",
    "deadline exceeded",
    "dns",
    "could not resolve",
    "unreachable",
    "unavailable",
    "connection refused",
    "connection reset",
    "cancelled",
    "canceled",
];

/// Label assigned to a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Security policy rejected the call.
    Permission,
    /// Transient transport failure.
    Network,
    /// Anything else.
    Other,
}

impl FailureClass {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::Network => "network",
            Self::Other => "other",
        }
    }

    /// Converts a classified failure into the caller-facing error.
    #[must_use]
    pub fn into_error(self, error: &RemoteError, attempts: u32) -> LeaseError {
        match self {
            Self::Permission => LeaseError::PermissionDenied {
                message: error.message.clone(),
            },
            Self::Network => LeaseError::NetworkTransient {
                message: error.message.clone(),
                attempts,
            },
            Self::Other => LeaseError::Unclassified {
                message: error.to_string(),
            },
        }
    }
}

/// Classifies a remote failure.
#[must_use]
pub fn classify(error: &RemoteError) -> FailureClass {
    let message = error.message.to_lowercase();

    if matches!(
        error.code,
        RemoteErrorCode::PermissionDenied | RemoteErrorCode::Unauthenticated
    ) || PERMISSION_KEYWORDS.iter().any(|k| message.contains(k))
    {
        return FailureClass::Permission;
    }

    if matches!(
        error.code,
        RemoteErrorCode::Unavailable
            | RemoteErrorCode::DeadlineExceeded
            | RemoteErrorCode::Cancelled
    ) || NETWORK_KEYWORDS.iter().any(|k| message.contains(k))
    {
        return FailureClass::Network;
    }

    FailureClass::Other
}
