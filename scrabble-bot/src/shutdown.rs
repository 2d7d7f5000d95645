//! Process shutdown: signal handling and orderly teardown.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::lock::InstanceLock;

/// Default time background tasks get to stop before they are aborted.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the process-wide stop signal.
///
/// Components observe [`ShutdownCoordinator::token`] at their own suspension
/// points; nothing is interrupted asynchronously.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Token cancelled once shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request shutdown. Idempotent.
    pub fn request_shutdown(&self, reason: &str) {
        if !self.token.is_cancelled() {
            info!(reason, "Shutdown requested");
            self.token.cancel();
        }
    }

    /// Track a background task so [`finish`](Self::finish) waits for it.
    pub fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Listen for SIGINT and, on Unix, SIGTERM. The listener exits on its own
    /// once shutdown has been requested by other means.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                signal = wait_for_signal() => {
                    info!(signal, "Received termination signal");
                    token.cancel();
                }
            }
        });
        self.register_task(handle);
    }

    /// Cancel the token and wait for registered tasks, aborting stragglers
    /// after the shutdown timeout.
    pub async fn stop_tasks(&self) {
        self.request_shutdown("teardown");

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let count = tasks.len();
        for mut task in tasks {
            if tokio::time::timeout(self.timeout, &mut task).await.is_err() {
                warn!("Background task did not stop in {:?}, aborting", self.timeout);
                task.abort();
            }
        }
        info!("Stopped {} background tasks", count);
    }

    /// Tear down after the supervisor returned: stop background tasks and
    /// release the instance lock.
    ///
    /// The checkpoint has already been flushed by the supervisor on its way to
    /// `Stopped`.
    pub async fn finish(&self, mut lock: InstanceLock) {
        self.stop_tasks().await;
        lock.release();
        info!("Shutdown complete");
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt() => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    interrupt().await;
    "Ctrl+C"
}
