//! Per-event processing: classify, deduplicate, rate-check, score, reply.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::{Classification, EventClassifier, IgnoreReason};
use crate::dedup::DuplicateGuard;
use crate::dispatcher::{DispatchError, ResponseDispatcher};
use crate::event::{EventId, SourceKind, StreamEvent};
use crate::messages;
use crate::rate_limiter::RateLimiter;
use crate::scoring::{ScoreError, Scorer};
use crate::text;

/// What kind of answer an event got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Score,
    OneWordOnly,
    LettersOnly,
    RateLimited,
    UnsupportedLanguage,
}

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    /// Seen before in this process or at/below the checkpoint.
    Duplicate,
    /// The checkpoint could not be persisted; the event was skipped.
    CheckpointFailed,
    Replied { reply_id: EventId, kind: ReplyKind },
    /// The event counts as processed but no reply could be posted.
    ReplyFailed { kind: ReplyKind },
}

/// Everything needed to handle one event, shared for the process lifetime.
pub struct Pipeline {
    classifier: EventClassifier,
    guard: Arc<DuplicateGuard>,
    limiter: Arc<RateLimiter>,
    scorer: Arc<dyn Scorer>,
    dispatcher: ResponseDispatcher,
    default_language: String,
}

impl Pipeline {
    pub fn new(
        classifier: EventClassifier,
        guard: Arc<DuplicateGuard>,
        limiter: Arc<RateLimiter>,
        scorer: Arc<dyn Scorer>,
        dispatcher: ResponseDispatcher,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            guard,
            limiter,
            scorer,
            dispatcher,
            default_language: default_language.into(),
        }
    }

    pub fn classifier(&self) -> &EventClassifier {
        &self.classifier
    }

    pub fn guard(&self) -> &Arc<DuplicateGuard> {
        &self.guard
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Handle one event to completion.
    ///
    /// The checkpoint is advanced before any reply is attempted, so a crash
    /// mid-reply never leads to a second reply after restart.
    pub async fn process(&self, event: &StreamEvent) -> Outcome {
        let classification = self.classifier.classify(event);
        if let Classification::Ignore(reason) = classification {
            debug!(event_id = %event.id, source = %event.source, %reason, "Ignoring event");
            return Outcome::Ignored(reason);
        }

        if !self.guard.should_process(event) {
            debug!(event_id = %event.id, source = %event.source, "Skipping duplicate event");
            return Outcome::Duplicate;
        }

        if self
            .guard
            .advance_checkpoint(event.source, &event.id)
            .await
            .is_err()
        {
            warn!(event_id = %event.id, source = %event.source, "Skipping event without checkpoint");
            return Outcome::CheckpointFailed;
        }
        self.guard.mark_seen(event.id.clone(), Some(event.source));

        let locale = messages::reply_locale(event.language.as_deref(), &self.default_language);
        let (kind, text) = self.compose(event, &locale);

        info!(
            event_id = %event.id,
            author = %event.author.acct,
            classification = classification.as_str(),
            kind = ?kind,
            "Answering event"
        );

        match self
            .dispatcher
            .reply(event, &classification, &text, &locale)
            .await
        {
            Ok(reply_id) => {
                self.guard.mark_seen(reply_id.clone(), None);
                Outcome::Replied { reply_id, kind }
            }
            Err(DispatchError::NotAnswerable) => Outcome::Ignored(IgnoreReason::NotAddressed),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "No reply posted");
                Outcome::ReplyFailed { kind }
            }
        }
    }

    /// Pick the reply text. User-input problems become localized messages.
    fn compose(&self, event: &StreamEvent, locale: &str) -> (ReplyKind, String) {
        if !self.limiter.allow_now(&event.author.id) {
            info!(identity = %event.author.acct, "Requester is rate limited");
            return (ReplyKind::RateLimited, messages::rate_limited(locale));
        }

        let word = match event.source {
            SourceKind::Mentions => match text::extract_word(&event.content) {
                Some((_, true)) => {
                    debug!(event_id = %event.id, "More than one word");
                    return (ReplyKind::OneWordOnly, messages::one_word(locale));
                }
                Some((word, false)) => word,
                None => return (ReplyKind::OneWordOnly, messages::one_word(locale)),
            },
            SourceKind::MonitoredAccount => text::strip_html(&event.content),
        };

        match self.scorer.score(&word, event.language.as_deref()) {
            Ok(score) => {
                let language = self.scorer.language_name(&score.language, locale);
                (
                    ReplyKind::Score,
                    messages::score(&word, score.points, &language, locale),
                )
            }
            Err(ScoreError::InvalidCharacters) => {
                debug!(event_id = %event.id, %word, "Word has invalid characters");
                (ReplyKind::LettersOnly, messages::letters_only(locale))
            }
            Err(ScoreError::UnsupportedLanguage) => {
                debug!(event_id = %event.id, %word, "Word language not supported");
                let names: Vec<String> = self
                    .scorer
                    .supported_languages()
                    .iter()
                    .map(|code| self.scorer.language_name(code, locale))
                    .collect();
                (
                    ReplyKind::UnsupportedLanguage,
                    messages::unsupported_language(&names, locale),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, CheckpointStore};
    use crate::classifier::BotIdentity;
    use crate::dedup::DedupConfig;
    use crate::dispatcher::{DispatcherConfig, OutgoingReply, PostError, StatusPoster};
    use crate::event::Author;
    use crate::rate_limiter::RateLimiterConfig;
    use crate::scoring::TableScorer;
    use async_trait::async_trait;
    use fediverse_client::Visibility;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPoster {
        replies: Mutex<Vec<OutgoingReply>>,
    }

    #[async_trait]
    impl StatusPoster for RecordingPoster {
        async fn post_reply(&self, reply: &OutgoingReply) -> Result<EventId, PostError> {
            let mut replies = self.replies.lock();
            replies.push(reply.clone());
            Ok(EventId::new(format!("{}", 5000 + replies.len())))
        }
    }

    fn pipeline(
        checkpoint_path: &Path,
        limiter: RateLimiterConfig,
    ) -> (Pipeline, Arc<RecordingPoster>) {
        let store = Arc::new(CheckpointStore::new(checkpoint_path));
        let guard = Arc::new(DuplicateGuard::new(
            DedupConfig::default(),
            store,
            Checkpoint::new(),
        ));
        let poster = Arc::new(RecordingPoster::default());
        let pipeline = Pipeline::new(
            EventClassifier::new(
                BotIdentity {
                    account_id: "1".to_string(),
                    acct: "bot".to_string(),
                },
                Some("42".to_string()),
            ),
            guard,
            Arc::new(RateLimiter::new(limiter)),
            Arc::new(TableScorer::builtin("de").unwrap()),
            ResponseDispatcher::new(poster.clone(), DispatcherConfig::default()),
            "de",
        );
        (pipeline, poster)
    }

    fn mention(id: &str, author_id: &str, text: &str) -> StreamEvent {
        let mut event = StreamEvent::new(
            id,
            SourceKind::Mentions,
            Author {
                id: author_id.to_string(),
                acct: format!("user{author_id}"),
            },
            format!("<p>@bot {text}</p>"),
            Visibility::Public,
        );
        event.mentioned_account_ids = vec!["1".to_string()];
        event.language = Some("de".to_string());
        event
    }

    #[tokio::test]
    async fn test_scores_and_remembers_own_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, poster) = pipeline(&dir.path().join("ids.json"), RateLimiterConfig::default());

        let outcome = pipeline.process(&mention("100", "7", "Hallo")).await;
        let Outcome::Replied { reply_id, kind } = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert_eq!(kind, ReplyKind::Score);
        assert!(poster.replies.lock()[0].text.contains("HALLO"));

        // The bot's own reply echoed back by the stream is not answered.
        let echo = mention(reply_id.as_str(), "7", "Hallo");
        assert_eq!(pipeline.process(&echo).await, Outcome::Duplicate);
        assert_eq!(
            pipeline.guard().checkpoint_for(SourceKind::Mentions),
            Some(EventId::from("100"))
        );
    }

    #[tokio::test]
    async fn test_rate_limited_requester_gets_notice() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = RateLimiterConfig {
            enabled: true,
            max_requests: 1,
            window: Duration::from_secs(60),
        };
        let (pipeline, poster) = pipeline(&dir.path().join("ids.json"), limiter);

        pipeline.process(&mention("100", "7", "Hallo")).await;
        let outcome = pipeline.process(&mention("101", "7", "Baum")).await;
        assert!(matches!(
            outcome,
            Outcome::Replied {
                kind: ReplyKind::RateLimited,
                ..
            }
        ));

        // Other requesters are unaffected.
        let outcome = pipeline.process(&mention("102", "8", "Baum")).await;
        assert!(matches!(
            outcome,
            Outcome::Replied {
                kind: ReplyKind::Score,
                ..
            }
        ));
        assert_eq!(poster.replies.lock().len(), 3);
        assert_eq!(
            pipeline.guard().checkpoint_for(SourceKind::Mentions),
            Some(EventId::from("102"))
        );
    }

    #[tokio::test]
    async fn test_user_input_errors_are_answered() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _poster) = pipeline(&dir.path().join("ids.json"), RateLimiterConfig::default());

        let outcome = pipeline.process(&mention("100", "7", "zwei Worte")).await;
        assert!(matches!(
            outcome,
            Outcome::Replied {
                kind: ReplyKind::OneWordOnly,
                ..
            }
        ));

        let outcome = pipeline.process(&mention("101", "7", "h3llo")).await;
        assert!(matches!(
            outcome,
            Outcome::Replied {
                kind: ReplyKind::LettersOnly,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_ignored_events_are_not_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, poster) = pipeline(&dir.path().join("ids.json"), RateLimiterConfig::default());

        let mut event = mention("100", "7", "Hallo");
        event.mentioned_account_ids.clear();

        assert_eq!(
            pipeline.process(&event).await,
            Outcome::Ignored(IgnoreReason::NotAddressed)
        );
        assert!(poster.replies.lock().is_empty());
        assert!(pipeline.guard().checkpoint_for(SourceKind::Mentions).is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_failure_skips_event() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let (pipeline, poster) = pipeline(&blocker.join("ids.json"), RateLimiterConfig::default());

        let outcome = pipeline.process(&mention("100", "7", "Hallo")).await;

        assert_eq!(outcome, Outcome::CheckpointFailed);
        assert!(poster.replies.lock().is_empty());
        assert!(pipeline.guard().checkpoint_for(SourceKind::Mentions).is_none());
    }

    #[tokio::test]
    async fn test_monitored_post_is_scored() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, poster) = pipeline(&dir.path().join("ids.json"), RateLimiterConfig::default());

        let mut event = StreamEvent::new(
            "2000",
            SourceKind::MonitoredAccount,
            Author {
                id: "42".to_string(),
                acct: "first_said".to_string(),
            },
            "<p>Wort</p>",
            Visibility::Unlisted,
        );
        event.language = Some("de".to_string());

        let outcome = pipeline.process(&event).await;
        assert!(matches!(
            outcome,
            Outcome::Replied {
                kind: ReplyKind::Score,
                ..
            }
        ));
        let replies = poster.replies.lock();
        assert!(replies[0].text.starts_with("@first_said "));
        assert!(replies[0].text.contains("WORT"));
        assert_eq!(replies[0].visibility, Visibility::Unlisted);
        assert_eq!(
            pipeline.guard().checkpoint_for(SourceKind::MonitoredAccount),
            Some(EventId::from("2000"))
        );
    }
}
