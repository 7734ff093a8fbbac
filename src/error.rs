//! Error types for the clustered cache
//!
//! Three layers of errors live here:
//! - [`StoreError`]: signals raised by a store handle during a call
//! - [`InitError`]: signals raised by a store factory while bringing a store up
//! - [`CacheError`]: the crate's public error, also rendered as an HTTP response

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Store Signals ==
/// Signals a store handle may raise from any remote-capable operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The call did not complete within the store's own time budget
    #[error("store operation timed out")]
    Timeout,

    /// The clustered backing store is not (or no longer) initialized
    #[error("store not initialized: {0}")]
    Uninitialized(String),

    /// The local node is re-establishing cluster membership
    #[error("cluster rejoin in progress")]
    RejoinInProgress,

    /// Any other failure inside the store
    #[error("store failure: {0}")]
    Failed(String),
}

/// Convenience Result type for store handle calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Factory Signals ==
/// Signals a store factory may raise while creating a store handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// A rejoin started while the store was being created; retryable
    #[error("cluster rejoin during store creation")]
    Rejoin,

    /// The store cannot be created with the given configuration
    #[error("invalid store configuration: {0}")]
    InvalidConfiguration(String),

    /// Any other factory failure; terminal
    #[error("store creation failed: {0}")]
    Fatal(String),
}

// == Cache Error Enum ==
/// Unified error type for the clustered cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The backing store could not be brought up; terminal for the cache
    #[error("failed to initialize clustered store for cache '{cache}': {reason}")]
    InitializationFailure { cache: String, reason: String },

    /// A guarded operation exceeded its budget and the fallback raises
    #[error("operation '{operation}' timed out")]
    OperationTimedOut { operation: &'static str },

    /// A write was attempted while the cache serves local reads only
    #[error("write operation '{operation}' rejected while the cluster is unavailable")]
    WriteRejected { operation: &'static str },

    /// A compare-and-swap operation on a cache whose replication cannot express it
    #[error("compare-and-swap operation '{operation}' is not supported with replication")]
    UnsupportedCas { operation: &'static str },

    /// Delivering replication events to a peer failed
    #[error("replication to peer '{peer}' failed: {reason}")]
    ReplicationSend { peer: String, reason: String },

    /// Key or value cannot cross a process boundary
    #[error("not serializable: {0}")]
    NonSerializable(String),

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A store signal that no fallback applies to
    #[error(transparent)]
    Store(#[from] StoreError),

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a factory signal as a terminal initialization failure.
    pub fn initialization(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        CacheError::InitializationFailure {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status used when the error crosses the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_)
            | CacheError::NonSerializable(_)
            | CacheError::Serialization(_) => StatusCode::BAD_REQUEST,
            CacheError::UnsupportedCas { .. } | CacheError::WriteRejected { .. } => {
                StatusCode::CONFLICT
            }
            CacheError::OperationTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            CacheError::InitializationFailure { .. }
            | CacheError::ReplicationSend { .. }
            | CacheError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::InvalidConfiguration(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the clustered cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            CacheError::NotFound("k".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CacheError::UnsupportedCas {
                operation: "put_if_absent"
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CacheError::OperationTimedOut { operation: "get" }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            CacheError::initialization("c", "boom").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_error_converts() {
        let err: CacheError = StoreError::Failed("disk".into()).into();
        assert!(matches!(err, CacheError::Store(StoreError::Failed(_))));
        assert!(err.to_string().contains("disk"));
    }

    #[test]
    fn test_initialization_message_names_cache() {
        let err = CacheError::initialization("sessions", "no toolkit");
        let msg = err.to_string();
        assert!(msg.contains("sessions"));
        assert!(msg.contains("no toolkit"));
    }
}
