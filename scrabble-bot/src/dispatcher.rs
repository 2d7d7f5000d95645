//! Posting replies with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fediverse_client::{ClientError, Visibility};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classifier::Classification;
use crate::event::{EventId, StreamEvent};

/// A reply ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    pub in_reply_to: EventId,
    pub text: String,
    pub visibility: Visibility,
    pub language: Option<String>,
}

/// Failure reported by a [`StatusPoster`].
#[derive(Debug, Clone, Error)]
pub enum PostError {
    /// Worth retrying; `retry_after` is the remote's throttling hint.
    #[error("transient post failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("permanent post failure: {0}")]
    Permanent(String),
}

impl PostError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }
}

impl From<ClientError> for PostError {
    fn from(err: ClientError) -> Self {
        if err.is_transient() {
            Self::Transient {
                retry_after: err.retry_after(),
                message: err.to_string(),
            }
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

/// Posts statuses on the remote service.
#[async_trait]
pub trait StatusPoster: Send + Sync {
    /// Post `reply` and return the id of the created status.
    async fn post_reply(&self, reply: &OutgoingReply) -> Result<EventId, PostError>;
}

/// Why a reply was not posted.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("reply rejected: {0}")]
    Permanent(String),
    #[error("reply failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("ignored events are not answered")]
    NotAnswerable,
}

/// Retry policy of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Total attempts per reply, including the first.
    pub max_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Upper bound for a single post call.
    pub request_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Formats replies and posts them through a [`StatusPoster`].
///
/// A reply in progress is never interrupted by shutdown: it either succeeds or
/// runs out of its own attempts, each bounded by `request_timeout`.
pub struct ResponseDispatcher {
    poster: Arc<dyn StatusPoster>,
    config: DispatcherConfig,
}

impl ResponseDispatcher {
    pub fn new(poster: Arc<dyn StatusPoster>, config: DispatcherConfig) -> Self {
        Self { poster, config }
    }

    /// Reply to `event` with `text` written in `locale`.
    ///
    /// Returns the id of the posted reply.
    pub async fn reply(
        &self,
        event: &StreamEvent,
        classification: &Classification,
        text: &str,
        locale: &str,
    ) -> Result<EventId, DispatchError> {
        let visibility = match classification {
            Classification::Ignore(_) => return Err(DispatchError::NotAnswerable),
            Classification::DirectMentionPrivate if !event.visibility.is_restricted() => {
                Visibility::Direct
            }
            _ => event.visibility,
        };

        let reply = OutgoingReply {
            in_reply_to: event.id.clone(),
            text: format!("@{} {}", event.author.acct, text),
            visibility,
            language: Some(locale.to_string()),
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.post_once(&reply).await {
                Ok(reply_id) => {
                    info!(
                        event_id = %event.id,
                        reply_id = %reply_id,
                        visibility = %visibility,
                        "Reply posted"
                    );
                    return Ok(reply_id);
                }
                Err(PostError::Permanent(message)) => {
                    warn!(event_id = %event.id, error = %message, "Reply rejected, not retrying");
                    return Err(DispatchError::Permanent(message));
                }
                Err(PostError::Transient {
                    message,
                    retry_after,
                }) => (message, retry_after),
            };

            let (message, retry_after) = error;
            if attempt >= max_attempts {
                warn!(
                    event_id = %event.id,
                    attempts = attempt,
                    error = %message,
                    "Giving up on reply"
                );
                return Err(DispatchError::Exhausted {
                    attempts: attempt,
                    last_error: message,
                });
            }

            let delay = match retry_after {
                Some(hint) => hint.min(Duration::from_millis(self.config.max_retry_delay_ms)),
                None => self.calculate_retry_delay(attempt - 1),
            };
            debug!(
                event_id = %event.id,
                attempt,
                delay = ?delay,
                error = %message,
                "Reply failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn post_once(&self, reply: &OutgoingReply) -> Result<EventId, PostError> {
        match tokio::time::timeout(self.config.request_timeout, self.poster.post_reply(reply)).await
        {
            Ok(result) => result,
            Err(_) => Err(PostError::transient(format!(
                "post timed out after {:?}",
                self.config.request_timeout
            ))),
        }
    }

    /// Exponential backoff with ±25% jitter.
    fn calculate_retry_delay(&self, retries: u32) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;

        let delay_ms = base_delay.saturating_mul(2u64.saturating_pow(retries));
        let delay_ms = delay_ms.min(max_delay);

        let jitter_range = delay_ms / 4;
        let delay_ms = if jitter_range > 0 {
            delay_ms - jitter_range + rand::random::<u64>() % (jitter_range * 2)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}
