//! Process-scoped wiring: builds every component from the config and runs the
//! supervisor until shutdown.

use std::sync::Arc;

use fediverse_client::{InstanceConfig, MastodonClient, StreamingClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::classifier::{BotIdentity, EventClassifier};
use crate::config::BotConfig;
use crate::dedup::DuplicateGuard;
use crate::dispatcher::{ResponseDispatcher, StatusPoster};
use crate::lock::InstanceLock;
use crate::logging::LoggingConfig;
use crate::mastodon::MastodonAdapter;
use crate::pipeline::Pipeline;
use crate::rate_limiter::RateLimiter;
use crate::scoring::{Scorer, TableScorer};
use crate::shutdown::ShutdownCoordinator;
use crate::stream::StreamConnector;
use crate::supervisor::{StreamSupervisor, SupervisorReport};
use crate::{Error, Result};

/// The external collaborators the core talks to.
pub struct Collaborators {
    pub connector: Arc<dyn StreamConnector>,
    pub poster: Arc<dyn StatusPoster>,
    pub scorer: Arc<dyn Scorer>,
}

/// Everything that lives for the whole process.
pub struct BotContext {
    pub config: BotConfig,
    pub supervisor: StreamSupervisor,
    pub shutdown: ShutdownCoordinator,
    lock: InstanceLock,
}

impl BotContext {
    /// Assemble the core around already-built collaborators.
    ///
    /// Loads the checkpoint; a corrupt checkpoint file is fatal.
    pub async fn assemble(
        config: BotConfig,
        lock: InstanceLock,
        shutdown: ShutdownCoordinator,
        identity: BotIdentity,
        monitored_account_id: Option<String>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let Collaborators {
            connector,
            poster,
            scorer,
        } = collaborators;
        let store = Arc::new(CheckpointStore::new(config.checkpoint_path.clone()));
        let guard = Arc::new(DuplicateGuard::load(config.dedup_config(), store).await?);
        info!(
            path = %config.checkpoint_path.display(),
            checkpoint = ?guard.checkpoint(),
            "Loaded checkpoint"
        );

        let pipeline = Pipeline::new(
            EventClassifier::new(identity, monitored_account_id),
            guard.clone(),
            Arc::new(RateLimiter::new(config.rate_limiter_config())),
            scorer,
            ResponseDispatcher::new(poster, config.dispatcher_config()),
            config.default_language.clone(),
        );
        let supervisor =
            StreamSupervisor::new(connector, Arc::new(pipeline), config.supervisor_config());

        Ok(Self {
            config,
            supervisor,
            shutdown,
            lock,
        })
    }

    /// Run the supervisor, then tear everything down.
    pub async fn run(self) -> Result<SupervisorReport> {
        let result = self.supervisor.run(self.shutdown.token()).await;
        self.shutdown.finish(self.lock).await;
        result
    }
}

/// Start the bot against the configured Mastodon instance.
pub async fn run(config: BotConfig, logging: Arc<LoggingConfig>) -> Result<SupervisorReport> {
    if let Some(filter) = config.log_filter.as_deref() {
        logging.set_filter(filter)?;
        info!(filter = %logging.get_filter(), "Applied configured log filter");
    }
    info!(?config, "Starting scrabble-bot");

    let lock = InstanceLock::acquire(config.lock_path.clone())?;

    let shutdown = ShutdownCoordinator::new();
    shutdown.spawn_signal_listener();
    shutdown.register_task(logging.start_retention_cleanup(shutdown.token()));

    let scorer: Arc<dyn Scorer> = match config.scoring_tables.as_deref() {
        Some(path) => Arc::new(TableScorer::load(path, &config.default_language).await?),
        None => Arc::new(TableScorer::builtin(&config.default_language)?),
    };
    info!(languages = ?scorer.supported_languages(), "Loaded scoring tables");

    let instance = InstanceConfig::new(&config.instance_url, config.access_token.clone())?
        .with_timeout(config.request_timeout());
    let rest = MastodonClient::new(instance.clone())?;
    let streaming = StreamingClient::new(instance).with_idle_timeout(config.idle_timeout());
    let adapter = MastodonAdapter::new(rest, streaming);

    let Some((identity, monitored_account_id)) =
        bootstrap_identity(&adapter, &config, &shutdown.token()).await?
    else {
        info!("Shutdown requested during startup");
        shutdown.stop_tasks().await;
        drop(lock);
        return Ok(SupervisorReport::default());
    };

    match &monitored_account_id {
        Some(id) => info!(account_id = %id, "Monitoring account posts"),
        None => info!("No monitored account, mention-only mode"),
    }

    let adapter = Arc::new(adapter.with_monitored_account(monitored_account_id.clone()));
    let context = BotContext::assemble(
        config,
        lock,
        shutdown,
        identity,
        monitored_account_id,
        Collaborators {
            connector: adapter.clone(),
            poster: adapter,
            scorer,
        },
    )
    .await?;

    context.run().await
}

/// Verify credentials and resolve the monitored account, retrying transient
/// failures with the reconnect policy. `Ok(None)` when cancelled.
async fn bootstrap_identity(
    adapter: &MastodonAdapter,
    config: &BotConfig,
    cancel: &CancellationToken,
) -> Result<Option<(BotIdentity, Option<String>)>> {
    let delay = config.supervisor_config().reconnect_delay;
    let max_attempts = config.reconnect.max_attempts;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            resolved = adapter.resolve_identity(config.monitored_account()) => resolved,
        };

        match resolved {
            Ok(identity) => return Ok(Some(identity)),
            Err(e) if e.is_transient() && (max_attempts == 0 || attempt < max_attempts) => {
                warn!(attempt, "Identity lookup failed, retrying in {:?}: {}", delay, e);
            }
            Err(e) if e.is_transient() => {
                return Err(Error::ReconnectExhausted { attempts: attempt });
            }
            Err(e) => return Err(e.into()),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
