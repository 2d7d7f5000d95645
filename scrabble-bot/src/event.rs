//! Events delivered by the stream and the identifiers that order them.

use std::cmp::Ordering;
use std::fmt;

use fediverse_client::Visibility;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Source-assigned event identifier.
///
/// Mastodon ids are decimal snowflakes serialized as strings, so ids compare by
/// length first and then lexicographically. For ASCII digits without leading
/// zeros this is numeric order without parsing into a fixed-width integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for EventId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for EventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older checkpoint files stored ids as JSON numbers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) if text.is_empty() => {
                Err(serde::de::Error::custom("event id must not be empty"))
            }
            Raw::Text(text) => Ok(Self(text)),
            Raw::Number(number) => Ok(Self(number.to_string())),
        }
    }
}

/// Where an event came from. Each source has its own checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Notifications addressed to the bot.
    Mentions,
    /// Posts of the configured monitored account.
    MonitoredAccount,
}

impl SourceKind {
    /// Key of this source in the checkpoint file.
    pub fn checkpoint_key(&self) -> &'static str {
        match self {
            Self::Mentions => "mentions",
            Self::MonitoredAccount => "monitored_account",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.checkpoint_key())
    }
}

/// Delivery channel of the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    #[default]
    Primary,
    /// The event matched a user-defined filter and was delivered as filtered.
    Filtered,
}

/// Author of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    /// Handle used to address the author, without the leading `@`.
    pub acct: String,
}

/// One unit received from the stream. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub id: EventId,
    pub source: SourceKind,
    pub channel: Channel,
    pub author: Author,
    /// Raw payload (HTML for Mastodon statuses).
    pub content: String,
    pub visibility: Visibility,
    pub language: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    pub mentioned_account_ids: Vec<String>,
    pub quoted_account_id: Option<String>,
    pub reblog_of_account_id: Option<String>,
}

impl StreamEvent {
    /// A plain event with no reply, quote or reblog context.
    pub fn new(
        id: impl Into<EventId>,
        source: SourceKind,
        author: Author,
        content: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            channel: Channel::Primary,
            author,
            content: content.into(),
            visibility,
            language: None,
            in_reply_to_account_id: None,
            mentioned_account_ids: Vec::new(),
            quoted_account_id: None,
            reblog_of_account_id: None,
        }
    }
}
