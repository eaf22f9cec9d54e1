//! Rate-limited HTTP client for provider API calls
//!
//! Requests to one host are spaced by at least `min_interval_ms`. Every
//! transport failure and non-success status is mapped to a [`SyncError`] in
//! one place, so providers only deal with decoded JSON bodies.

use crate::config::RateLimitConfig;
use crate::error::SyncError;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Per-host spacing of outgoing requests
#[derive(Debug, Default)]
struct HostThrottle {
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    /// Wait until `host` may be called again and reserve the following slot
    async fn acquire(&self, host: &str, spacing: Duration) {
        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let start = slots.get(host).copied().filter(|at| *at > now).unwrap_or(now);
            slots.insert(host.to_string(), start + spacing);
            start - now
        };

        if !wait.is_zero() {
            debug!(host, wait_ms = wait.as_millis() as u64, "Throttling request");
            tokio::time::sleep(wait).await;
        }
    }
}

/// HTTP client shared by the provider adapters
#[derive(Debug)]
pub struct RateLimitedClient {
    client: Client,
    throttle: HostThrottle,
    config: RateLimitConfig,
}

impl RateLimitedClient {
    pub fn new(config: RateLimitConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("popularity-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config))
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client, config: RateLimitConfig) -> Self {
        Self {
            client,
            throttle: HostThrottle::default(),
            config,
        }
    }

    /// POST an url-encoded form and decode the JSON answer
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<T, SyncError> {
        self.execute(url, self.client.post(url).form(form)).await
    }

    /// POST a plain-text body with query parameters and decode the JSON answer
    pub async fn post_text<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: String,
    ) -> Result<T, SyncError> {
        let request = self
            .client
            .post(url)
            .query(query)
            .header(CONTENT_TYPE, "text/plain")
            .body(body);
        self.execute(url, request).await
    }

    /// GET with query parameters and decode the JSON answer
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SyncError> {
        self.execute(url, self.client.get(url).query(query)).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, SyncError> {
        let spacing = Duration::from_millis(self.config.min_interval_ms);
        self.throttle.acquire(&host_key(url), spacing).await;

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let err = status_error(status, response.headers(), self.config.rate_limit_wait_secs);
            warn!(url, status = status.as_u16(), error = %err, "Provider request rejected");
            return Err(err);
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        debug!(url, body_size = bytes.len(), "Provider response received");

        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::BadUpstreamResponse(format!("invalid JSON: {}", e)))
    }
}

/// Error for a non-success HTTP status
fn status_error(status: StatusCode, headers: &HeaderMap, default_wait_secs: u64) -> SyncError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited(
            headers
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(default_wait_secs),
        ),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized,
        other => SyncError::UpstreamStatus(other.as_u16()),
    }
}

fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::NetworkTimeout
    } else if e.is_connect() {
        SyncError::ConnectionRefused
    } else {
        SyncError::Network(e.to_string())
    }
}

/// Throttling key of a URL: host and explicit port
fn host_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}
