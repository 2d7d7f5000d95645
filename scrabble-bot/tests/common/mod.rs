//! In-memory collaborators for scenario tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fediverse_client::Visibility;
use parking_lot::Mutex;
use scrabble_bot::checkpoint::CheckpointStore;
use scrabble_bot::classifier::{BotIdentity, EventClassifier};
use scrabble_bot::dedup::{DedupConfig, DuplicateGuard};
use scrabble_bot::dispatcher::{
    DispatcherConfig, OutgoingReply, PostError, ResponseDispatcher, StatusPoster,
};
use scrabble_bot::event::{Author, EventId, SourceKind, StreamEvent};
use scrabble_bot::pipeline::Pipeline;
use scrabble_bot::rate_limiter::{RateLimiter, RateLimiterConfig};
use scrabble_bot::scoring::TableScorer;
use scrabble_bot::stream::{EventSession, StreamConnector, StreamError};
use scrabble_bot::supervisor::{StreamSupervisor, SupervisorConfig};
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub const BOT_ID: &str = "1";
pub const BOT_ACCT: &str = "bot";
pub const MONITORED_ID: &str = "42";
pub const MONITORED_ACCT: &str = "first_said";

pub fn bot() -> BotIdentity {
    BotIdentity {
        account_id: BOT_ID.to_string(),
        acct: BOT_ACCT.to_string(),
    }
}

/// A public mention of the bot as Mastodon renders it.
pub fn mention(id: &str, author: &str, text: &str, language: Option<&str>) -> StreamEvent {
    let content = format!(
        "<p><span class=\"h-card\"><a href=\"https://example.social/@bot\" class=\"u-url mention\">@<span>bot</span></a></span> {text}</p>"
    );
    let mut event = StreamEvent::new(
        id,
        SourceKind::Mentions,
        Author {
            id: format!("id-{author}"),
            acct: author.to_string(),
        },
        content,
        Visibility::Public,
    );
    event.language = language.map(str::to_string);
    event.mentioned_account_ids = vec![BOT_ID.to_string()];
    event
}

/// A single-word post of the monitored account.
pub fn monitored_post(id: &str, word: &str) -> StreamEvent {
    let mut event = StreamEvent::new(
        id,
        SourceKind::MonitoredAccount,
        Author {
            id: MONITORED_ID.to_string(),
            acct: MONITORED_ACCT.to_string(),
        },
        format!("<p>{word}</p>"),
        Visibility::Public,
    );
    event.language = Some("de".to_string());
    event
}

struct SessionScript {
    events: Vec<StreamEvent>,
    /// Report a remote close once the events are delivered instead of idling.
    then_close: bool,
}

/// Scripted stream: each `open_session` pops the next script entry.
#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<VecDeque<Result<SessionScript, StreamError>>>,
    history: Mutex<HashMap<SourceKind, VecDeque<Vec<StreamEvent>>>>,
    open_attempts: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that delivers `events` and then stays idle.
    pub fn with_session(self, events: Vec<StreamEvent>) -> Self {
        self.sessions.lock().push_back(Ok(SessionScript {
            events,
            then_close: false,
        }));
        self
    }

    /// A session that delivers `events` and is then closed by the remote side.
    pub fn with_dropping_session(self, events: Vec<StreamEvent>) -> Self {
        self.sessions.lock().push_back(Ok(SessionScript {
            events,
            then_close: true,
        }));
        self
    }

    pub fn with_failed_connect(self, error: StreamError) -> Self {
        self.sessions.lock().push_back(Err(error));
        self
    }

    /// Add a catch-up page for `source`. Successive fetches return successive
    /// pages; the last page keeps being returned.
    pub fn with_history(self, source: SourceKind, events: Vec<StreamEvent>) -> Self {
        self.history
            .lock()
            .entry(source)
            .or_default()
            .push_back(events);
        self
    }

    pub fn open_attempts(&self) -> Vec<Instant> {
        self.open_attempts.lock().clone()
    }
}

#[async_trait]
impl StreamConnector for FakeConnector {
    async fn open_session(&self) -> Result<Box<dyn EventSession>, StreamError> {
        self.open_attempts.lock().push(Instant::now());
        let next = self.sessions.lock().pop_front();
        match next {
            Some(Ok(script)) => Ok(Box::new(FakeSession {
                events: script.events.into(),
                then_close: script.then_close,
            })),
            Some(Err(e)) => Err(e),
            None => Err(StreamError::transient("connection refused")),
        }
    }

    async fn fetch_since(
        &self,
        source: SourceKind,
        _since: Option<&EventId>,
        limit: usize,
    ) -> Result<Vec<StreamEvent>, StreamError> {
        let mut history = self.history.lock();
        let mut events = match history.get_mut(&source) {
            Some(pages) if pages.len() > 1 => pages.pop_front().unwrap_or_default(),
            Some(pages) => pages.front().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        events.truncate(limit);
        Ok(events)
    }
}

struct FakeSession {
    events: VecDeque<StreamEvent>,
    then_close: bool,
}

#[async_trait]
impl EventSession for FakeSession {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.then_close => Ok(None),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Records every reply and answers with increasing ids.
#[derive(Default)]
pub struct RecordingPoster {
    replies: Mutex<Vec<OutgoingReply>>,
    next_id: AtomicU64,
    started: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingPoster {
    /// Each post waits for a permit of `gate` before it completes.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Posts that were started, finished or not.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn replies(&self) -> Vec<OutgoingReply> {
        self.replies.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl StatusPoster for RecordingPoster {
    async fn post_reply(&self, reply: &OutgoingReply) -> Result<EventId, PostError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| PostError::permanent("gate closed"))?
                .forget();
        }
        self.replies.lock().push(reply.clone());
        let id = 900_000 + self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(EventId::new(id.to_string()))
    }
}

pub struct Harness {
    pub supervisor: Arc<StreamSupervisor>,
    pub connector: Arc<FakeConnector>,
    pub poster: Arc<RecordingPoster>,
    pub guard: Arc<DuplicateGuard>,
    pub store: Arc<CheckpointStore>,
}

pub fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        reconnect_delay: Duration::from_secs(30),
        max_reconnect_attempts: 0,
        connect_timeout: Duration::from_secs(5),
        catch_up_limit: 40,
        poll_interval: Duration::from_secs(60),
    }
}

/// Optional parts of a [`Harness`].
#[derive(Default)]
pub struct HarnessOptions {
    pub poster: RecordingPoster,
    pub monitored_account_id: Option<String>,
}

impl HarnessOptions {
    pub fn monitoring() -> Self {
        Self {
            monitored_account_id: Some(MONITORED_ID.to_string()),
            ..Self::default()
        }
    }
}

/// Wire the real core around fakes, loading the checkpoint from `dir`.
pub async fn harness(connector: FakeConnector, config: SupervisorConfig, dir: &Path) -> Harness {
    harness_with(connector, config, dir, HarnessOptions::default()).await
}

pub async fn harness_with(
    connector: FakeConnector,
    config: SupervisorConfig,
    dir: &Path,
    options: HarnessOptions,
) -> Harness {
    let store = Arc::new(CheckpointStore::new(dir.join("last_ids.json")));
    let guard = Arc::new(
        DuplicateGuard::load(DedupConfig::default(), store.clone())
            .await
            .unwrap(),
    );
    let poster = Arc::new(options.poster);
    let connector = Arc::new(connector);

    let pipeline = Pipeline::new(
        EventClassifier::new(bot(), options.monitored_account_id),
        guard.clone(),
        Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        Arc::new(TableScorer::builtin("de").unwrap()),
        ResponseDispatcher::new(poster.clone(), DispatcherConfig::default()),
        "de",
    );
    let supervisor = Arc::new(StreamSupervisor::new(
        connector.clone(),
        Arc::new(pipeline),
        config,
    ));

    Harness {
        supervisor,
        connector,
        poster,
        guard,
        store,
    }
}

/// Poll until `condition` holds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Poll until the poster has recorded `count` replies.
pub async fn wait_for_replies(poster: &RecordingPoster, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while poster.count() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {count} replies, got {}", poster.count()));
}
