//! Stream supervision.
//!
//! [`StreamSupervisor`] owns the long-lived connection and walks this state
//! machine:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Reconnecting -> Connecting ...
//!                      any state -> ShuttingDown -> Stopped
//! ```
//!
//! Reconnects use a fixed delay. With `max_reconnect_attempts > 0` the
//! supervisor stops with an error after that many consecutive failed connects;
//! with `0` it retries forever.
//!
//! Events are handled one at a time in delivery order. Cancellation is observed
//! between events and during connect/backoff waits, never in the middle of a
//! reply.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::{SourceKind, StreamEvent};
use crate::pipeline::{Outcome, Pipeline};
use crate::stream::{EventSession, StreamConnector, StreamError};
use crate::{Error, Result};

/// Interval of rate limiter and duplicate cache housekeeping while streaming.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Identical consecutive failures between two `warn` summaries.
const FAILURE_SUMMARY_EVERY: u32 = 10;

/// Lifecycle state of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Connection policy.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed wait between a failure and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Consecutive failed connects before giving up; 0 retries forever.
    pub max_reconnect_attempts: u32,
    /// Upper bound for opening a session or fetching a catch-up page.
    pub connect_timeout: Duration,
    /// Page size when catching up after a (re)connect.
    pub catch_up_limit: usize,
    /// Polling interval of the monitored account while streaming.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            connect_timeout: Duration::from_secs(30),
            catch_up_limit: 40,
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Counters collected over one [`StreamSupervisor::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Sessions opened successfully.
    pub connections: u32,
    /// Failed connect attempts.
    pub failed_connects: u32,
    pub events_received: u64,
    pub replies_sent: u64,
    pub ignored: u64,
    pub duplicates: u64,
    /// Events skipped because of a checkpoint or reply failure.
    pub failures: u64,
}

impl SupervisorReport {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Replied { .. } => self.replies_sent += 1,
            Outcome::Ignored(_) => self.ignored += 1,
            Outcome::Duplicate => self.duplicates += 1,
            Outcome::CheckpointFailed | Outcome::ReplyFailed { .. } => self.failures += 1,
        }
    }
}

/// How a streaming session ended.
enum SessionEnd {
    Cancelled,
    Dropped(StreamError),
    Fatal(StreamError),
}

/// Logs repeated identical failures at decreasing verbosity.
#[derive(Debug, Default)]
struct FailureLog {
    last: Option<String>,
    repeats: u32,
}

impl FailureLog {
    fn record(&mut self, what: &str, error: &StreamError) {
        let message = error.to_string();
        if self.last.as_deref() == Some(message.as_str()) {
            self.repeats += 1;
            if self.repeats % FAILURE_SUMMARY_EVERY == 0 {
                warn!(
                    repeats = self.repeats,
                    error = %message,
                    "{} still failing", what
                );
            } else {
                debug!(repeats = self.repeats, error = %message, "{} failed again", what);
            }
        } else {
            warn!(error = %message, "{} failed", what);
            self.last = Some(message);
            self.repeats = 1;
        }
    }

    fn reset(&mut self) {
        if self.last.take().is_some() {
            info!(failures = self.repeats, "Connection recovered");
        }
        self.repeats = 0;
    }
}

/// Owns the stream connection and feeds events to the [`Pipeline`].
pub struct StreamSupervisor {
    connector: Arc<dyn StreamConnector>,
    pipeline: Arc<Pipeline>,
    config: SupervisorConfig,
    state_tx: watch::Sender<SupervisorState>,
    /// Sources whose starting point was already settled in this process.
    baselined: Mutex<HashSet<SourceKind>>,
}

impl StreamSupervisor {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        pipeline: Arc<Pipeline>,
        config: SupervisorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            connector,
            pipeline,
            config,
            state_tx,
            baselined: Mutex::new(HashSet::new()),
        }
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Supervisor state changed");
        }
    }

    /// Run until `cancel` fires or a fatal error occurs.
    ///
    /// Returns the report on a requested shutdown. Reconnect exhaustion and
    /// permanent stream failures are returned as errors after the checkpoint
    /// has been flushed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<SupervisorReport> {
        let mut report = SupervisorReport::default();
        let mut failures = FailureLog::default();
        let mut consecutive_failures: u32 = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            self.set_state(SupervisorState::Connecting);
            let opened = self.open_and_catch_up(&cancel, &mut report).await;

            let failure = match opened {
                Ok(Some(session)) => {
                    consecutive_failures = 0;
                    failures.reset();
                    report.connections += 1;
                    match self.stream(session, &cancel, &mut report).await {
                        SessionEnd::Cancelled => break Ok(()),
                        SessionEnd::Fatal(e) => break Err(Error::StreamFatal(e.to_string())),
                        SessionEnd::Dropped(e) => {
                            failures.record("Stream", &e);
                            None
                        }
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) if e.is_transient() => Some(e),
                Err(e) => break Err(Error::StreamFatal(e.to_string())),
            };

            if let Some(e) = failure {
                consecutive_failures += 1;
                report.failed_connects += 1;
                failures.record("Connect", &e);

                let max = self.config.max_reconnect_attempts;
                if max > 0 && consecutive_failures >= max {
                    error!(attempts = consecutive_failures, "Giving up reconnecting");
                    break Err(Error::ReconnectExhausted {
                        attempts: consecutive_failures,
                    });
                }
            }

            self.set_state(SupervisorState::Reconnecting);
            debug!(delay = ?self.config.reconnect_delay, "Waiting before reconnect");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        };

        self.set_state(SupervisorState::ShuttingDown);
        if let Err(e) = self.pipeline.guard().flush().await {
            error!(error = %e, "Failed to flush checkpoint on shutdown");
        }
        self.set_state(SupervisorState::Stopped);

        match outcome {
            Ok(()) => {
                info!(?report, "Stream supervisor stopped");
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, ?report, "Stream supervisor stopped with error");
                Err(e)
            }
        }
    }

    /// Open a session and process everything missed since the checkpoint.
    ///
    /// `Ok(None)` when cancelled while connecting or catching up.
    async fn open_and_catch_up(
        &self,
        cancel: &CancellationToken,
        report: &mut SupervisorReport,
    ) -> std::result::Result<Option<Box<dyn EventSession>>, StreamError> {
        let connect = tokio::time::timeout(self.config.connect_timeout, self.connector.open_session());
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = connect => match result {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StreamError::transient(format!(
                        "connect timed out after {:?}",
                        self.config.connect_timeout
                    )));
                }
            },
        };

        self.set_state(SupervisorState::Streaming);
        info!("Streaming");

        for source in self.sources() {
            if cancel.is_cancelled() {
                session.close().await;
                return Ok(None);
            }
            if let Err(e) = self.catch_up(source, cancel, report).await {
                session.close().await;
                return Err(e);
            }
        }
        Ok(Some(session))
    }

    fn sources(&self) -> Vec<SourceKind> {
        let mut sources = vec![SourceKind::Mentions];
        if self.pipeline.classifier().monitored_account_id().is_some() {
            sources.push(SourceKind::MonitoredAccount);
        }
        sources
    }

    /// Process events of `source` newer than its checkpoint, oldest first.
    ///
    /// The first catch-up of a source without a checkpoint only records the
    /// newest event as the starting point. Later catch-ups treat every fetched
    /// event as new, even when that first page was empty.
    async fn catch_up(
        &self,
        source: SourceKind,
        cancel: &CancellationToken,
        report: &mut SupervisorReport,
    ) -> std::result::Result<(), StreamError> {
        let guard = self.pipeline.guard();
        let since = guard.checkpoint_for(source);

        let fetch = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector
                .fetch_since(source, since.as_ref(), self.config.catch_up_limit),
        );
        let mut events: Vec<StreamEvent> = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = fetch => match result {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StreamError::transient(format!(
                        "catch-up of {source} timed out"
                    )));
                }
            },
        };
        events.sort_by(|a, b| a.id.cmp(&b.id));

        let first_catch_up = self.baselined.lock().insert(source);
        if since.is_none() && first_catch_up {
            match events.last() {
                Some(newest) => {
                    info!(%source, event_id = %newest.id, "No checkpoint, starting from newest event");
                    if let Err(e) = guard.advance_checkpoint(source, &newest.id).await {
                        error!(%source, error = %e, "Failed to record starting checkpoint");
                        self.baselined.lock().remove(&source);
                    }
                }
                None => info!(%source, "No checkpoint and no history, starting from the live stream"),
            }
            return Ok(());
        }

        let missed: Vec<StreamEvent> = match since {
            Some(since) => events.into_iter().filter(|e| e.id > since).collect(),
            None => events,
        };
        if !missed.is_empty() {
            info!(%source, count = missed.len(), "Catching up on missed events");
        }
        for event in missed {
            if cancel.is_cancelled() {
                break;
            }
            report.events_received += 1;
            let outcome = self.pipeline.process(&event).await;
            report.record(&outcome);
        }
        Ok(())
    }

    /// Consume a session until it ends or shutdown is requested.
    async fn stream(
        &self,
        mut session: Box<dyn EventSession>,
        cancel: &CancellationToken,
        report: &mut SupervisorReport,
    ) -> SessionEnd {
        let mut poll = self.sources().contains(&SourceKind::MonitoredAccount).then(|| {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + self.config.poll_interval,
                self.config.poll_interval,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut maintenance = tokio::time::interval_at(
            tokio::time::Instant::now() + MAINTENANCE_INTERVAL,
            MAINTENANCE_INTERVAL,
        );
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    session.close().await;
                    return SessionEnd::Cancelled;
                }

                next = session.next_event() => match next {
                    Ok(Some(event)) => {
                        report.events_received += 1;
                        let outcome = self.pipeline.process(&event).await;
                        report.record(&outcome);
                    }
                    Ok(None) => {
                        session.close().await;
                        return SessionEnd::Dropped(StreamError::transient("stream closed by remote"));
                    }
                    Err(e) if e.is_transient() => {
                        session.close().await;
                        return SessionEnd::Dropped(e);
                    }
                    Err(e) => {
                        session.close().await;
                        return SessionEnd::Fatal(e);
                    }
                },

                _ = tick_opt(&mut poll) => {
                    if let Err(e) = self
                        .catch_up(SourceKind::MonitoredAccount, cancel, report)
                        .await
                    {
                        warn!(error = %e, "Polling the monitored account failed");
                    }
                }

                _ = maintenance.tick() => {
                    let now = tokio::time::Instant::now();
                    self.pipeline.limiter().cleanup(now);
                    self.pipeline.guard().prune_expired();
                }
            }
        }
    }
}

/// Tick an optional interval; pending forever when absent.
async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
