//! Interfaces of the streaming collaborator.
//!
//! The supervisor only sees these traits; [`crate::mastodon`] implements them on
//! top of `fediverse-client`, and tests implement them with in-memory fakes.

use async_trait::async_trait;
use fediverse_client::ClientError;
use thiserror::Error;

use crate::event::{EventId, SourceKind, StreamEvent};

/// Failure of the streaming collaborator.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Network drop, timeout, throttling or server error. Worth reconnecting.
    #[error("connection failure: {0}")]
    Transient(String),
    /// Rejected credentials or another failure that reconnecting cannot fix.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl StreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ClientError> for StreamError {
    fn from(err: ClientError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

/// One open streaming session.
#[async_trait]
pub trait EventSession: Send {
    /// Wait for the next event. `Ok(None)` means the remote closed the stream.
    ///
    /// Must be cancel safe: dropping the future loses no already-received event.
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError>;

    /// Close the session. Errors are swallowed.
    async fn close(&mut self);
}

/// Opens sessions and pages recent history.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn EventSession>, StreamError>;

    /// Recent events of `source`, newest page first, at most `limit`.
    ///
    /// Used to catch up on events missed while disconnected. `since` is the
    /// current checkpoint; implementations may return older events too, the
    /// caller filters them.
    async fn fetch_since(
        &self,
        source: SourceKind,
        since: Option<&EventId>,
        limit: usize,
    ) -> Result<Vec<StreamEvent>, StreamError>;
}
