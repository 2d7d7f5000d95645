//! Per-requester rate limiting.
//!
//! Implements a sliding window: for each identity the limiter keeps the
//! timestamps of accepted requests within the trailing window and rejects a
//! request once the window is full.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Configuration for a rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// When false, every request is allowed and nothing is recorded.
    pub enabled: bool,
    /// Requests allowed per identity within `window`.
    pub max_requests: u32,
    /// Length of the sliding window.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 5,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Sliding-window rate limiter keyed by requester identity.
///
/// Identities live in separate map entries, so callers working on different
/// identities never wait on each other's bookkeeping.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check and record a request for `identity` at `now`.
    ///
    /// Returns `false` without recording when the window is already full.
    ///
    /// # Concurrency
    ///
    /// The purge, the count and the append happen while holding the entry's
    /// shard lock, so two concurrent calls for the same identity cannot both
    /// take the last free slot. No await point is involved.
    pub fn allow(&self, identity: &str, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut window = self.windows.entry(identity.to_string()).or_default();
        purge(&mut window, now, self.config.window);

        if window.len() >= self.config.max_requests as usize {
            debug!(
                identity = %identity,
                requests = window.len(),
                "Rate limit reached"
            );
            return false;
        }

        window.push_back(now);
        trace!(identity = %identity, requests = window.len(), "Request recorded");
        true
    }

    /// [`allow`](Self::allow) at the current instant.
    pub fn allow_now(&self, identity: &str) -> bool {
        self.allow(identity, Instant::now())
    }

    /// Drop identities whose window holds no timestamp newer than the window.
    ///
    /// Returns the number of identities removed.
    pub fn cleanup(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let window = self.config.window;
        self.windows.retain(|_, timestamps| {
            purge(timestamps, now, window);
            !timestamps.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Cleaned up idle rate limit windows");
        }
        removed
    }

    /// Number of identities with recorded requests.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

/// Remove timestamps older than `now - window`.
fn purge(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while timestamps.front().is_some_and(|ts| *ts < cutoff) {
        timestamps.pop_front();
    }
}
