//! Client error types.

use std::time::Duration;

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by the REST and streaming clients.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection-level failure (DNS, TLS, reset, ...)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The server asked us to slow down (HTTP 429)
    #[error("Rate limited by server (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    /// HTTP 5xx
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// HTTP 401/403, the token is missing, revoked or lacks a scope
    #[error("Unauthorized ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// Any other 4xx
    #[error("Request rejected {status}: {body}")]
    Rejected { status: u16, body: String },

    /// WebSocket transport failure or unexpected close
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid client configuration (bad instance URL, ...)
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a websocket error.
    pub fn websocket(msg: impl Into<String>) -> Self {
        Self::WebSocket(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Map an HTTP status and body to an error.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::Throttled { retry_after },
            401 | 403 => Self::Unauthorized { status, body },
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::Timeout(_)
            | Self::Throttled { .. }
            | Self::Server { .. }
            | Self::WebSocket(_) => true,
            Self::Unauthorized { .. }
            | Self::Rejected { .. }
            | Self::Decode(_)
            | Self::Config(_) => false,
        }
    }

    /// Server-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string(), None)
        } else {
            Self::Connection(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response) => {
                let status = response.status().as_u16();
                Self::from_status(status, "websocket upgrade refused".to_string(), None)
            }
            other => Self::WebSocket(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
