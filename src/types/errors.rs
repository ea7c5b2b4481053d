//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an outbound call never produced an HTTP response.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportFault {
    /// Per-call timeout expired.
    #[error("timeout")]
    Timeout,

    /// Connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The caller cancelled the invocation.
    #[error("cancelled")]
    Cancelled,

    /// Anything else below the HTTP layer (TLS, body read, redirect loop).
    #[error("{0}")]
    Other(String),
}

/// Main error enum for the gate dispatcher.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (rejected at startup).
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed tool arguments (map to INVALID_ARGUMENT).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown tool or route (map to NOT_FOUND).
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend reachable but answered with a non-2xx status, or a 2xx body
    /// that does not describe a usable result.
    #[error("backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    /// Backend unreachable, timed out, or call cancelled.
    #[error("transport error: {0}")]
    Transport(TransportFault),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code for the tool-call boundary.
    pub fn to_rpc_code(&self) -> &'static str {
        match self {
            Error::Config(_) => "FAILED_PRECONDITION",
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Backend { .. } => "BACKEND_ERROR",
            Error::Transport(TransportFault::Timeout) => "DEADLINE_EXCEEDED",
            Error::Transport(TransportFault::Cancelled) => "CANCELLED",
            Error::Transport(_) => "UNAVAILABLE",
            Error::Serialization(_) | Error::Io(_) => "INTERNAL",
        }
    }

    /// True for errors raised before any network call was attempted.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NotFound(_))
    }
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn backend(status: u16, msg: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: msg.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::Transport(TransportFault::Timeout)
    }

    pub fn cancelled() -> Self {
        Self::Transport(TransportFault::Cancelled)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Transport(TransportFault::Timeout)
        } else if err.is_connect() {
            Error::Transport(TransportFault::Connect(err.to_string()))
        } else if let Some(status) = err.status() {
            Error::backend(status.as_u16(), err.to_string())
        } else {
            Error::Transport(TransportFault::Other(err.to_string()))
        }
    }
}
