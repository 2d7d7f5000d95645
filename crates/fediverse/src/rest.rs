//! REST client for the handful of Mastodon endpoints the bot uses.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, header};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{ClientError, Result};
use crate::model::{Account, NewStatus, Notification, Status};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings shared by the REST and streaming clients.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Base URL, e.g. `https://mastodon.social`.
    pub base_url: Url,
    /// OAuth bearer token.
    pub access_token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl InstanceConfig {
    pub fn new(base_url: &str, access_token: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("invalid instance url {base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "instance url must be http(s), got {}",
                base_url.scheme()
            )));
        }

        Ok(Self {
            base_url,
            access_token: access_token.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Config(format!("invalid endpoint {path}: {e}")))
    }
}

/// Thin Mastodon REST client.
#[derive(Debug, Clone)]
pub struct MastodonClient {
    config: InstanceConfig,
    client: Client,
}

impl MastodonClient {
    pub fn new(config: InstanceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(concat!("scrabble-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// `GET /api/v1/accounts/verify_credentials`
    pub async fn verify_credentials(&self) -> Result<Account> {
        let url = self.config.endpoint("/api/v1/accounts/verify_credentials")?;
        self.send_json(self.client.get(url)).await
    }

    /// `GET /api/v1/accounts/lookup?acct=...`
    pub async fn lookup_account(&self, acct: &str) -> Result<Account> {
        let acct = acct.trim_start_matches('@');
        let url = self.config.endpoint("/api/v1/accounts/lookup")?;
        self.send_json(self.client.get(url).query(&[("acct", acct)]))
            .await
    }

    /// Mention notifications newer than `since_id`, newest first.
    pub async fn mention_notifications(
        &self,
        since_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let url = self.config.endpoint("/api/v1/notifications")?;
        let mut query = vec![
            ("types[]", "mention".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since_id) = since_id {
            query.push(("since_id", since_id.to_string()));
        }
        self.send_json(self.client.get(url).query(&query)).await
    }

    /// Statuses of an account newer than `since_id`, newest first.
    pub async fn account_statuses(
        &self,
        account_id: &str,
        since_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Status>> {
        let url = self
            .config
            .endpoint(&format!("/api/v1/accounts/{account_id}/statuses"))?;
        let mut query = vec![
            ("limit", limit.to_string()),
            ("exclude_reblogs", "true".to_string()),
        ];
        if let Some(since_id) = since_id {
            query.push(("since_id", since_id.to_string()));
        }
        self.send_json(self.client.get(url).query(&query)).await
    }

    /// `POST /api/v1/statuses`
    pub async fn post_status(&self, status: &NewStatus) -> Result<Status> {
        let url = self.config.endpoint("/api/v1/statuses")?;
        self.send_json(self.client.post(url).json(status)).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        trace!(len = body.len(), "Received response body");
        serde_json::from_str(&body).map_err(ClientError::from)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();

    if status.as_u16() == 429 {
        warn!(path = %url, retry_after = ?retry_after, "Throttled by instance");
    } else {
        debug!(path = %url, status = status.as_u16(), "Request failed");
    }

    Err(ClientError::from_status(status.as_u16(), body, retry_after))
}

/// `Retry-After` is either delta-seconds or an HTTP date; only the former is honoured.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
