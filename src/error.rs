//! Error types for the Presto client.

use serde_json::Value;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PrestoError>;

/// Possible errors encountered while talking to a Presto cluster.
#[derive(Error, Debug)]
pub enum PrestoError {
    /// Malformed caller input, raised before any request is sent.
    #[error("Usage error: {0}")]
    Usage(String),

    /// Socket, TLS or connection failure.
    #[error("HTTP client error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A well-formed HTTP response that violates the protocol contract.
    #[error("Protocol error (HTTP {status}): {message}")]
    Protocol {
        status: u16,
        message: String,
        body: String,
    },

    /// The server reported a query execution error.
    #[error("Query error (HTTP {status}): {message}")]
    Query {
        status: u16,
        message: String,
        data: Value,
    },

    /// The JSON codec could not parse or serialize a payload.
    #[error("JSON codec error: {0}")]
    Codec(String),

    /// The statement was cancelled before producing a result.
    #[error("Query {0} was cancelled")]
    Cancelled(String),
}

impl PrestoError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        PrestoError::Usage(message.into())
    }

    pub(crate) fn protocol(status: u16, message: impl Into<String>, body: impl Into<String>) -> Self {
        PrestoError::Protocol {
            status,
            message: message.into(),
            body: body.into(),
        }
    }

    /// Builds a query error from the `error` field of a response body.
    ///
    /// The server's `message` is used when present, otherwise a generic one.
    pub(crate) fn query(status: u16, data: Value) -> Self {
        let message = data
            .get("error")
            .and_then(|err| err.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("query failed with HTTP {status}"));

        PrestoError::Query {
            status,
            message,
            data,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            PrestoError::Protocol { status, .. } | PrestoError::Query { status, .. } => {
                Some(*status)
            }
            PrestoError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Only a raw 503 is ever retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PrestoError::Protocol { status: 503, .. })
    }
}

impl From<serde_json::Error> for PrestoError {
    fn from(err: serde_json::Error) -> Self {
        PrestoError::Codec(err.to_string())
    }
}
