//! WebSocket client for the Mastodon streaming API (`stream=user`).
//!
//! A [`StreamingSession`] wraps one WebSocket connection. It never reconnects by
//! itself: a transport failure surfaces as a transient [`ClientError`] and the
//! caller decides whether and when to open a new session.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::error::{ClientError, Result};
use crate::model::{Notification, Status};
use crate::rest::InstanceConfig;

/// Interval between client pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default time without any inbound frame after which the session is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// A decoded streaming event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// `notification` event
    Notification(Box<Notification>),
    /// `update` event: a new status on the home timeline
    Update(Box<Status>),
    /// `delete` event carrying the removed status id
    Delete(String),
    /// Any other event name
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Option<String>,
}

/// Decode one text frame of the streaming API.
pub fn decode_frame(text: &str) -> Result<StreamMessage> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let payload = envelope.payload.unwrap_or_default();

    let message = match envelope.event.as_str() {
        "notification" => StreamMessage::Notification(Box::new(serde_json::from_str(&payload)?)),
        "update" => StreamMessage::Update(Box::new(serde_json::from_str(&payload)?)),
        "delete" => StreamMessage::Delete(payload),
        other => StreamMessage::Other(other.to_string()),
    };
    Ok(message)
}

/// Opens streaming sessions against one instance.
#[derive(Debug, Clone)]
pub struct StreamingClient {
    config: InstanceConfig,
    idle_timeout: Duration,
}

impl StreamingClient {
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            config,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// WebSocket URL of the user stream.
    pub fn stream_url(&self) -> Result<String> {
        let mut url = self.config.endpoint("/api/v1/streaming")?;
        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot use scheme {scheme}")))?;
        url.query_pairs_mut().append_pair("stream", "user");
        Ok(url.to_string())
    }

    /// Connect and return a live session.
    pub async fn connect(&self) -> Result<StreamingSession> {
        let url = self.stream_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Config(format!("invalid streaming request: {e}")))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.access_token))
            .map_err(|e| ClientError::Config(format!("invalid access token: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        info!("Connecting to streaming API: {}", url);
        let (stream, _) = connect_async(request).await?;
        info!("Connected to streaming API");

        Ok(StreamingSession::new(stream, self.idle_timeout))
    }
}

/// One open streaming connection.
///
/// The idle deadline and heartbeat live on the session, so dropping a pending
/// [`next_message`](Self::next_message) future does not reset them.
pub struct StreamingSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    idle_timeout: Duration,
    heartbeat: Interval,
    deadline: Instant,
}

impl StreamingSession {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, idle_timeout: Duration) -> Self {
        let now = Instant::now();
        let mut heartbeat = tokio::time::interval_at(now + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            stream,
            idle_timeout,
            heartbeat,
            deadline: now + idle_timeout,
        }
    }

    /// Wait for the next decodable event.
    ///
    /// Returns `Ok(None)` when the server closed the stream. The idle deadline
    /// only moves when a frame arrives.
    pub async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        loop {
            tokio::select! {
                _ = self.heartbeat.tick() => {
                    self.stream.send(Message::Ping(Vec::new())).await?;
                    trace!("Sent streaming heartbeat");
                }

                _ = tokio::time::sleep_until(self.deadline) => {
                    return Err(ClientError::Timeout(format!(
                        "no frame received for {:?}",
                        self.idle_timeout
                    )));
                }

                frame = self.stream.next() => {
                    self.deadline = Instant::now() + self.idle_timeout;
                    match frame {
                        Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                            Ok(message) => return Ok(Some(message)),
                            Err(e) => warn!("Failed to decode streaming frame: {}", e),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Streaming API closed the connection");
                            return Ok(None);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Close the connection, ignoring errors.
    pub async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error while closing streaming connection: {}", e);
        }
    }
}
