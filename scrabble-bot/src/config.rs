//! Bot configuration.
//!
//! Loaded from a TOML file (every field has a default, a missing file means
//! all defaults) and then overridden by environment variables. Secrets are
//! expected to come from the environment or a `.env` file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::dedup::DedupConfig;
use crate::dispatcher::DispatcherConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::supervisor::SupervisorConfig;
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "SCRABBLE_BOT_CONFIG";
/// Config file used when neither argument nor env var names one.
pub const DEFAULT_CONFIG_PATH: &str = "scrabble-bot.toml";

const ACCESS_TOKEN_ENV: &str = "MASTODON_BOT_ACCESS_TOKEN";
const INSTANCE_ENV: &str = "MASTODON_INSTANCE";
const MONITORED_ACCOUNT_ENV: &str = "SCRABBLE_BOT_MONITORED_ACCOUNT";
const CHECKPOINT_ENV: &str = "SCRABBLE_BOT_CHECKPOINT";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub delay_secs: u64,
    /// 0 retries forever.
    pub max_attempts: u32,
    pub connect_timeout_secs: u64,
    /// Session is considered dead after this long without any frame.
    pub idle_timeout_secs: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_secs: 30,
            max_attempts: 0,
            connect_timeout_secs: 30,
            idle_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 5,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub max_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub instance_url: String,
    pub access_token: String,
    /// Handle of the account whose single-word posts are scored. `None` means
    /// mention-only mode.
    pub monitored_account: Option<String>,
    pub default_language: String,
    pub checkpoint_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_dir: PathBuf,
    /// Overrides `RUST_LOG` and the built-in filter when set.
    pub log_filter: Option<String>,
    /// Letter-value tables; the bundled tables are used when unset.
    pub scoring_tables: Option<PathBuf>,
    pub catch_up_limit: usize,
    pub poll_interval_secs: u64,
    pub reconnect: ReconnectSettings,
    pub rate_limit: RateLimitSettings,
    pub dispatch: DispatchSettings,
    pub dedup: DedupSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            instance_url: "https://mastodon.social".to_string(),
            access_token: String::new(),
            monitored_account: None,
            default_language: "de".to_string(),
            checkpoint_path: PathBuf::from("last_ids.json"),
            lock_path: PathBuf::from("scrabble-bot.lock"),
            log_dir: PathBuf::from("logs"),
            log_filter: None,
            scoring_tables: None,
            catch_up_limit: 40,
            poll_interval_secs: 60,
            reconnect: ReconnectSettings::default(),
            rate_limit: RateLimitSettings::default(),
            dispatch: DispatchSettings::default(),
            dedup: DedupSettings::default(),
        }
    }
}

// The access token must never end up in logs.
impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"<redacted>")
            .field("monitored_account", &self.monitored_account)
            .field("default_language", &self.default_language)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("lock_path", &self.lock_path)
            .field("log_dir", &self.log_dir)
            .field("log_filter", &self.log_filter)
            .field("scoring_tables", &self.scoring_tables)
            .field("catch_up_limit", &self.catch_up_limit)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("reconnect", &self.reconnect)
            .field("rate_limit", &self.rate_limit)
            .field("dispatch", &self.dispatch)
            .field("dedup", &self.dedup)
            .finish()
    }
}

impl BotConfig {
    /// Config file path: first CLI argument, then `SCRABBLE_BOT_CONFIG`, then the default.
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!(path = %path.display(), "Loading config file");
                Self::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(io_error("reading config", path, e)),
        }
    }

    /// Load the file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(ACCESS_TOKEN_ENV) {
            self.access_token = token.trim().to_string();
        }
        if let Some(instance) = non_empty(INSTANCE_ENV) {
            self.instance_url = instance.trim().to_string();
        }
        if let Some(account) = non_empty(MONITORED_ACCOUNT_ENV) {
            self.monitored_account = Some(account.trim().to_string());
        }
        if let Some(path) = non_empty(CHECKPOINT_ENV) {
            self.checkpoint_path = PathBuf::from(path);
        }
    }

    /// Reject settings the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(Error::config(format!(
                "access token missing, set {ACCESS_TOKEN_ENV}"
            )));
        }

        let url = Url::parse(&self.instance_url)
            .map_err(|e| Error::config(format!("invalid instance_url {}: {e}", self.instance_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "instance_url must be http(s), got {}",
                self.instance_url
            )));
        }

        if self.default_language.trim().is_empty() {
            return Err(Error::config("default_language must not be empty"));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                return Err(Error::config("rate_limit.max_requests must be greater than 0"));
            }
            if self.rate_limit.window_secs == 0 {
                return Err(Error::config("rate_limit.window_secs must be greater than 0"));
            }
        }

        if self.dispatch.max_attempts == 0 {
            return Err(Error::config("dispatch.max_attempts must be greater than 0"));
        }
        if self.dedup.capacity == 0 {
            return Err(Error::config("dedup.capacity must be greater than 0"));
        }
        if self.catch_up_limit == 0 {
            return Err(Error::config("catch_up_limit must be greater than 0"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::config("poll_interval_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Monitored account handle without a leading `@`, if configured.
    pub fn monitored_account(&self) -> Option<&str> {
        self.monitored_account
            .as_deref()
            .map(|acct| acct.trim().trim_start_matches('@'))
            .filter(|acct| !acct.is_empty())
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            enabled: self.rate_limit.enabled,
            max_requests: self.rate_limit.max_requests,
            window: Duration::from_secs(self.rate_limit.window_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_attempts: self.dispatch.max_attempts,
            initial_retry_delay_ms: self.dispatch.initial_retry_delay_ms,
            max_retry_delay_ms: self.dispatch.max_retry_delay_ms,
            request_timeout: Duration::from_secs(self.dispatch.request_timeout_secs),
        }
    }

    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            capacity: self.dedup.capacity,
            ttl: Duration::from_secs(self.dedup.ttl_secs),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_delay: Duration::from_secs(self.reconnect.delay_secs),
            max_reconnect_attempts: self.reconnect.max_attempts,
            connect_timeout: Duration::from_secs(self.reconnect.connect_timeout_secs),
            catch_up_limit: self.catch_up_limit,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> BotConfig {
        BotConfig {
            access_token: "secret".to_string(),
            ..BotConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::from_toml_str("").unwrap();
        assert_eq!(config.instance_url, "https://mastodon.social");
        assert_eq!(config.default_language, "de");
        assert_eq!(config.checkpoint_path, PathBuf::from("last_ids.json"));
        assert_eq!(config.reconnect.delay_secs, 30);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.catch_up_limit, 40);
        assert!(config.monitored_account().is_none());
    }

    #[test]
    fn test_partial_file() {
        let config = BotConfig::from_toml_str(
            r#"
            monitored_account = "@first_said@example.org"
            default_language = "en"

            [reconnect]
            max_attempts = 3

            [rate_limit]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.monitored_account(), Some("first_said@example.org"));
        assert_eq!(config.default_language, "en");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.delay_secs, 30);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.max_requests, 5);
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        assert!(BotConfig::from_toml_str("catch_up_limit = \"many\"").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BotConfig::load_file(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.catch_up_limit, 40);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MASTODON_BOT_ACCESS_TOKEN", " token "),
            ("MASTODON_INSTANCE", "https://example.social"),
            ("SCRABBLE_BOT_MONITORED_ACCOUNT", "first_said"),
            ("SCRABBLE_BOT_CHECKPOINT", ""),
        ]);

        let mut config = BotConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.access_token, "token");
        assert_eq!(config.instance_url, "https://example.social");
        assert_eq!(config.monitored_account(), Some("first_said"));
        // Empty values do not override.
        assert_eq!(config.checkpoint_path, PathBuf::from("last_ids.json"));
    }

    #[test]
    fn test_validation() {
        assert!(valid().validate().is_ok());
        assert!(BotConfig::default().validate().is_err());

        let mut config = valid();
        config.instance_url = "ftp://example.org".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());
        config.rate_limit.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = valid();
        config.dispatch.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dedup.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let output = format!("{:?}", valid());
        assert!(!output.contains("secret"));
        assert!(output.contains("<redacted>"));
    }
}
