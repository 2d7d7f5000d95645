//! Mastodon API entities.
//!
//! Only the fields the bot reads are modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// Visibility of a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }

    /// Private and direct statuses are only visible to their audience.
    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::Private | Self::Direct)
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account as embedded in statuses and notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// `user` for local accounts, `user@host` for remote ones.
    pub acct: String,
    #[serde(default)]
    pub username: String,
}

/// A mention inside a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub acct: String,
    #[serde(default)]
    pub username: String,
}

/// Result of a user-defined filter matching a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResult {
    #[serde(default)]
    pub keyword_matches: Option<Vec<String>>,
}

/// A quoted status (quote posts, Mastodon 4.4+ and forks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub quoted_status: Option<Box<Status>>,
    /// Some servers embed the quoted account directly.
    #[serde(default)]
    pub account: Option<Account>,
}

impl Quote {
    /// Account id of the quoted author.
    pub fn account_id(&self) -> Option<&str> {
        self.quoted_status
            .as_ref()
            .map(|s| s.account.id.as_str())
            .or_else(|| self.account.as_ref().map(|a| a.id.as_str()))
    }
}

/// A status (post).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    /// HTML content.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub visibility: Visibility,
    /// ISO 639 language code, when the author's client set one.
    #[serde(default)]
    pub language: Option<String>,
    pub account: Account,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub in_reply_to_account_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub quote: Option<Quote>,
    #[serde(default)]
    pub filtered: Vec<FilterResult>,
}

/// Notification kinds the bot cares about; everything else maps to `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Mention,
    Status,
    Reblog,
    Follow,
    Favourite,
    #[serde(other)]
    Other,
}

/// A notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub account: Account,
    #[serde(default)]
    pub status: Option<Status>,
}

/// Body of `POST /api/v1/statuses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<String>,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}
