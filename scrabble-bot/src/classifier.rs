//! Event classification.
//!
//! [`EventClassifier::classify`] is a pure function of the event and the bot's
//! identity. Everything that is not a scoring request maps to
//! [`Classification::Ignore`] with the reason attached.

use std::fmt;

use crate::event::{Channel, SourceKind, StreamEvent};
use crate::text;

/// Phrases that mark a post as talking *about* the bot rather than to it.
const META_PHRASES: &[&str] = &[
    "the bot",
    "this bot",
    "der bot",
    "dieser bot",
    "den bot",
    "bot can",
    "bot kann",
    "bot is",
    "bot ist",
];

/// Handles in one post from which on a mention counts as a group discussion.
const GROUP_HANDLE_THRESHOLD: usize = 4;

/// How an event is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Public or unlisted mention of the bot.
    DirectMentionPublic,
    /// Private or direct mention of the bot.
    DirectMentionPrivate,
    /// Mention delivered through the filtered channel; handled like a mention.
    FilteredMention,
    /// Single-word post of the monitored account.
    MonitoredAccountPost,
    Ignore(IgnoreReason),
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectMentionPublic => "direct_mention_public",
            Self::DirectMentionPrivate => "direct_mention_private",
            Self::FilteredMention => "filtered_mention",
            Self::MonitoredAccountPost => "monitored_account_post",
            Self::Ignore(_) => "ignore",
        }
    }
}

/// Why an event is not answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Posted by the bot itself.
    OwnPost,
    /// A mention event that does not address the bot.
    NotAddressed,
    /// A monitored-account event from someone else, or with no monitored account configured.
    NotMonitoredAuthor,
    /// Monitored-account post that is empty or longer than one word.
    NotSingleWord,
    QuotesBot,
    ReblogOfBot,
    /// Reply to another account that merely mentions the bot.
    Conversational,
    GroupDiscussion,
    MetaDiscussion,
    /// Nothing left once handles are removed.
    NoWord,
}

impl IgnoreReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::OwnPost => "own post",
            Self::NotAddressed => "not addressed to the bot",
            Self::NotMonitoredAuthor => "not from the monitored account",
            Self::NotSingleWord => "not a single word",
            Self::QuotesBot => "quoting the bot's post",
            Self::ReblogOfBot => "reblog of the bot's post",
            Self::Conversational => "conversational reply to another account",
            Self::GroupDiscussion => "group discussion",
            Self::MetaDiscussion => "meta-discussion about the bot",
            Self::NoWord => "no word after removing handles",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// The bot's own account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub account_id: String,
    pub acct: String,
}

/// Maps stream events to a [`Classification`].
#[derive(Debug, Clone)]
pub struct EventClassifier {
    bot: BotIdentity,
    monitored_account_id: Option<String>,
}

impl EventClassifier {
    pub fn new(bot: BotIdentity, monitored_account_id: Option<String>) -> Self {
        Self {
            bot,
            monitored_account_id,
        }
    }

    pub fn bot(&self) -> &BotIdentity {
        &self.bot
    }

    pub fn monitored_account_id(&self) -> Option<&str> {
        self.monitored_account_id.as_deref()
    }

    pub fn classify(&self, event: &StreamEvent) -> Classification {
        if event.author.id == self.bot.account_id {
            return Classification::Ignore(IgnoreReason::OwnPost);
        }

        match event.source {
            SourceKind::MonitoredAccount => self.classify_monitored(event),
            SourceKind::Mentions => self.classify_mention(event),
        }
    }

    fn classify_monitored(&self, event: &StreamEvent) -> Classification {
        let is_monitored = self
            .monitored_account_id
            .as_deref()
            .is_some_and(|id| id == event.author.id);
        if !is_monitored {
            return Classification::Ignore(IgnoreReason::NotMonitoredAuthor);
        }
        if !text::is_single_word(&event.content) {
            return Classification::Ignore(IgnoreReason::NotSingleWord);
        }
        Classification::MonitoredAccountPost
    }

    fn classify_mention(&self, event: &StreamEvent) -> Classification {
        if !event
            .mentioned_account_ids
            .iter()
            .any(|id| *id == self.bot.account_id)
        {
            return Classification::Ignore(IgnoreReason::NotAddressed);
        }

        if let Some(reason) = self.ignore_reason(event) {
            return Classification::Ignore(reason);
        }

        match event.channel {
            Channel::Filtered => Classification::FilteredMention,
            Channel::Primary if event.visibility.is_restricted() => {
                Classification::DirectMentionPrivate
            }
            Channel::Primary => Classification::DirectMentionPublic,
        }
    }

    /// Heuristics for mentions that are not scoring requests.
    fn ignore_reason(&self, event: &StreamEvent) -> Option<IgnoreReason> {
        let is_bot = |id: &Option<String>| id.as_deref() == Some(self.bot.account_id.as_str());

        if is_bot(&event.quoted_account_id) {
            return Some(IgnoreReason::QuotesBot);
        }
        if is_bot(&event.reblog_of_account_id) {
            return Some(IgnoreReason::ReblogOfBot);
        }

        let plain = text::strip_html(&event.content);
        let words = text::remove_handles(&plain)
            .split_whitespace()
            .count();
        if words == 0 {
            return Some(IgnoreReason::NoWord);
        }
        if words == 1 {
            return None;
        }

        let replies_to_other = event
            .in_reply_to_account_id
            .as_ref()
            .is_some_and(|id| *id != self.bot.account_id);
        if replies_to_other {
            return Some(IgnoreReason::Conversational);
        }

        if text::count_handles(&plain) >= GROUP_HANDLE_THRESHOLD {
            return Some(IgnoreReason::GroupDiscussion);
        }

        let lowered = plain.to_lowercase();
        if META_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return Some(IgnoreReason::MetaDiscussion);
        }

        None
    }
}
