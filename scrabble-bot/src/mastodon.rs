//! Mastodon-backed implementation of the stream and posting collaborators.

use async_trait::async_trait;
use fediverse_client::{
    ClientError, MastodonClient, NewStatus, Notification, NotificationType, Status,
    StreamMessage, StreamingClient, StreamingSession,
};
use tracing::{debug, info, trace};

use crate::classifier::BotIdentity;
use crate::dispatcher::{OutgoingReply, PostError, StatusPoster};
use crate::event::{Author, Channel, EventId, SourceKind, StreamEvent};
use crate::stream::{EventSession, StreamConnector, StreamError};

/// Convert a status into an event of `source`.
pub fn event_from_status(status: &Status, source: SourceKind) -> StreamEvent {
    StreamEvent {
        id: EventId::new(status.id.clone()),
        source,
        channel: if status.filtered.is_empty() {
            Channel::Primary
        } else {
            Channel::Filtered
        },
        author: Author {
            id: status.account.id.clone(),
            acct: status.account.acct.clone(),
        },
        content: status.content.clone(),
        visibility: status.visibility,
        language: status.language.clone(),
        in_reply_to_account_id: status.in_reply_to_account_id.clone(),
        mentioned_account_ids: status.mentions.iter().map(|m| m.id.clone()).collect(),
        quoted_account_id: status
            .quote
            .as_ref()
            .and_then(|q| q.account_id())
            .map(str::to_string),
        reblog_of_account_id: status.reblog.as_ref().map(|r| r.account.id.clone()),
    }
}

/// Mention notifications become mention events keyed by the status id.
pub fn event_from_notification(notification: &Notification) -> Option<StreamEvent> {
    if notification.kind != NotificationType::Mention {
        return None;
    }
    notification
        .status
        .as_ref()
        .map(|status| event_from_status(status, SourceKind::Mentions))
}

/// Map a streaming message to an event, dropping everything the bot does not act on.
pub fn event_from_message(
    message: &StreamMessage,
    monitored_account_id: Option<&str>,
) -> Option<StreamEvent> {
    match message {
        StreamMessage::Notification(notification) => event_from_notification(notification),
        StreamMessage::Update(status) => {
            let monitored = monitored_account_id?;
            if status.account.id != monitored || status.reblog.is_some() {
                return None;
            }
            Some(event_from_status(status, SourceKind::MonitoredAccount))
        }
        StreamMessage::Delete(_) | StreamMessage::Other(_) => None,
    }
}

/// REST + streaming access to one Mastodon instance.
#[derive(Clone)]
pub struct MastodonAdapter {
    rest: MastodonClient,
    streaming: StreamingClient,
    monitored_account_id: Option<String>,
}

impl MastodonAdapter {
    pub fn new(rest: MastodonClient, streaming: StreamingClient) -> Self {
        Self {
            rest,
            streaming,
            monitored_account_id: None,
        }
    }

    pub fn with_monitored_account(mut self, account_id: Option<String>) -> Self {
        self.monitored_account_id = account_id;
        self
    }

    /// Learn the bot's own identity and resolve the monitored handle.
    pub async fn resolve_identity(
        &self,
        monitored_acct: Option<&str>,
    ) -> Result<(BotIdentity, Option<String>), ClientError> {
        let me = self.rest.verify_credentials().await?;
        info!(account_id = %me.id, acct = %me.acct, "Verified credentials");

        let monitored = match monitored_acct {
            Some(acct) => {
                let account = self.rest.lookup_account(acct).await?;
                info!(account_id = %account.id, acct = %account.acct, "Resolved monitored account");
                Some(account.id)
            }
            None => None,
        };

        Ok((
            BotIdentity {
                account_id: me.id,
                acct: me.acct,
            },
            monitored,
        ))
    }
}

#[async_trait]
impl StreamConnector for MastodonAdapter {
    async fn open_session(&self) -> Result<Box<dyn EventSession>, StreamError> {
        let session = self.streaming.connect().await?;
        Ok(Box::new(MastodonSession {
            session,
            monitored_account_id: self.monitored_account_id.clone(),
        }))
    }

    async fn fetch_since(
        &self,
        source: SourceKind,
        since: Option<&EventId>,
        limit: usize,
    ) -> Result<Vec<StreamEvent>, StreamError> {
        match source {
            // Notification ids and status ids are not comparable, so the newest
            // page is fetched and the caller filters by status id.
            SourceKind::Mentions => {
                let notifications = self.rest.mention_notifications(None, limit).await?;
                debug!(count = notifications.len(), "Fetched mention notifications");
                Ok(notifications
                    .iter()
                    .filter_map(event_from_notification)
                    .collect())
            }
            SourceKind::MonitoredAccount => {
                let Some(account_id) = self.monitored_account_id.as_deref() else {
                    return Ok(Vec::new());
                };
                let statuses = self
                    .rest
                    .account_statuses(account_id, since.map(EventId::as_str), limit)
                    .await?;
                debug!(count = statuses.len(), "Fetched monitored account statuses");
                Ok(statuses
                    .iter()
                    .filter(|s| s.reblog.is_none())
                    .map(|s| event_from_status(s, SourceKind::MonitoredAccount))
                    .collect())
            }
        }
    }
}

#[async_trait]
impl StatusPoster for MastodonAdapter {
    async fn post_reply(&self, reply: &OutgoingReply) -> Result<EventId, PostError> {
        let status = NewStatus {
            status: reply.text.clone(),
            in_reply_to_id: Some(reply.in_reply_to.to_string()),
            visibility: reply.visibility,
            language: reply.language.clone(),
        };
        let posted = self.rest.post_status(&status).await?;
        Ok(EventId::new(posted.id))
    }
}

struct MastodonSession {
    session: StreamingSession,
    monitored_account_id: Option<String>,
}

#[async_trait]
impl EventSession for MastodonSession {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        loop {
            let Some(message) = self.session.next_message().await? else {
                return Ok(None);
            };
            match event_from_message(&message, self.monitored_account_id.as_deref()) {
                Some(event) => return Ok(Some(event)),
                None => trace!(?message, "Dropping stream message"),
            }
        }
    }

    async fn close(&mut self) {
        self.session.close().await;
    }
}
