//! Store error types.
//!
//! Shared by the remote data store and the upstream transaction source; both
//! speak to a remote service and fail in the same ways.

use thiserror::Error;

/// Errors from the remote data store or the upstream source.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP connection could not be established or was dropped.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The query or statement was rejected.
    #[error("query failed on '{table}': {reason}")]
    QueryFailed { table: String, reason: String },

    /// A named procedure is not known to the store.
    #[error("unknown procedure: '{name}'")]
    UnknownProcedure { name: String },

    /// The response or payload could not be (de)serialized.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// Configuration problem (missing URL, bad backend).
    #[error("store config error: {reason}")]
    ConfigError { reason: String },
}

/// Errors from the async data access facade.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The underlying store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The turn deadline passed before the operation finished.
    #[error("'{op}' timed out")]
    Timeout { op: String },

    /// The turn was cancelled.
    #[error("'{op}' was cancelled")]
    Cancelled { op: String },

    /// The offloaded closure panicked.
    #[error("'{op}' panicked: {reason}")]
    Panicked { op: String, reason: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::QueryFailed {
            table: "sqlite".into(),
            reason: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => StoreError::HttpError {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => StoreError::ConnectionFailed {
                endpoint: e.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: e.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError {
            reason: e.to_string(),
        }
    }
}

impl StoreError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::ConnectionFailed { .. } => true,
            StoreError::HttpError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
