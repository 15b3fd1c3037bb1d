//! Error types for heartlink-relay.

use std::path::PathBuf;

/// Top-level error for starting and running the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Notification dispatcher could not be built.
    #[error("notification error: {0}")]
    Notify(#[from] crate::notify::NotifyError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row could not be decoded into a domain record.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A request status change the request lifecycle does not allow.
    #[error("invalid request transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the change starts from.
        from: link_types::RequestStatus,
        /// Status it would move to.
        to: link_types::RequestStatus,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

impl StorageError {
    /// Whether this error is a UNIQUE or PRIMARY KEY constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Errors returned by the pairing service and event router.
///
/// The HTTP layer maps each variant to a status code; see `http::api`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),

    /// The pairing target is the requester.
    #[error("cannot pair with yourself")]
    SelfPair,

    /// Unknown user, request or pair.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate pending request, already paired, or no active pair.
    #[error("{0}")]
    Conflict(String),

    /// Caller is not a member of the pair or request it acts on.
    #[error("{0}")]
    Authorization(String),

    /// Caller exceeded a rate limit.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Which limit was hit.
        reason: String,
    },

    /// Store or transport failure. The message is never shown to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        if err.is_unique_violation() {
            ServiceError::Conflict("conflicting pairing state".to_string())
        } else {
            ServiceError::Internal(err.to_string())
        }
    }
}

impl From<crate::limits::RateLimitError> for ServiceError {
    fn from(err: crate::limits::RateLimitError) -> Self {
        ServiceError::RateLimited {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_become_internal() {
        let err: ServiceError = StorageError::Corrupt {
            table: "pairs",
            reason: "bad id".into(),
        }
        .into();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[test]
    fn row_not_found_is_not_a_unique_violation() {
        assert!(!StorageError::Database(sqlx::Error::RowNotFound).is_unique_violation());
    }

    #[test]
    fn service_error_display() {
        assert_eq!(ServiceError::SelfPair.to_string(), "cannot pair with yourself");
        assert_eq!(
            ServiceError::Conflict("no pair".into()).to_string(),
            "no pair"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ServiceError>();
        assert_send_sync::<StorageError>();
        assert_send_sync::<RelayError>();
    }
}
