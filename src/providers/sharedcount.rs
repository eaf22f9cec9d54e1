//! Bulk aggregation provider (submit and poll)
//!
//! A page of URLs is submitted as one bulk job. The job status endpoint is
//! then polled at a fixed interval until the provider reports completion.
//! Polling has no iteration cap; each individual call is retried within the
//! retry budget like any other provider call.
//!
//! # API
//!
//! - `POST {api_url}/bulk?apikey=KEY` with newline-separated URLs → `{bulk_id}`
//! - `GET {api_url}/bulk?apikey=KEY&bulk_id=ID` →
//!   `{_meta: {completed}, data: {url: {Network: {counts...} | count}}}`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::SharedCountConfig;
use crate::error::SyncError;
use crate::scoring::MetricField;
use crate::sync::{RateLimitedClient, RetryPolicy};

use super::{MetricsProvider, PageItem, ProviderKind, ProviderResult};

/// Name of this provider in configuration and snapshots
pub const PROVIDER_NAME: &str = "sharedcount";

/// Counter name used when a network reports a bare number
const BARE_COUNT_FIELD: &str = "count";

/// Metrics this provider reports, with their snapshot field names
pub static METRIC_FIELDS: &[MetricField] = &[
    MetricField {
        key: "shares",
        field: "share_count",
    },
    MetricField {
        key: "comments",
        field: "comment_count",
    },
    MetricField {
        key: "reactions",
        field: "reaction_count",
    },
    MetricField {
        key: "total",
        field: "total_count",
    },
    MetricField {
        key: "count",
        field: BARE_COUNT_FIELD,
    },
];

#[derive(Debug, Deserialize)]
struct BulkSubmission {
    bulk_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BulkStatus {
    #[serde(rename = "_meta")]
    meta: BulkMeta,
    #[serde(default)]
    data: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct BulkMeta {
    #[serde(default)]
    completed: bool,
}

/// Bulk aggregation adapter
pub struct SharedCountProvider {
    config: SharedCountConfig,
    api_key: String,
    http_client: Arc<RateLimitedClient>,
    retry_policy: RetryPolicy,
}

impl SharedCountProvider {
    /// Create a new provider; the API key is required
    pub fn new(config: SharedCountConfig) -> Result<Self, SyncError> {
        let http_client = RateLimitedClient::new(config.rate_limit.clone())?;
        Self::with_http_client(config, Arc::new(http_client))
    }

    /// Create a provider sharing an existing HTTP client
    pub fn with_http_client(
        config: SharedCountConfig,
        http_client: Arc<RateLimitedClient>,
    ) -> Result<Self, SyncError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                SyncError::Configuration("providers.sharedcount.api_key is required".to_string())
            })?;
        let retry_policy = RetryPolicy::from(&config.retry);

        Ok(Self {
            config,
            api_key,
            http_client,
            retry_policy,
        })
    }

    fn bulk_url(&self) -> String {
        format!("{}/bulk", self.config.api_url.trim_end_matches('/'))
    }

    /// Submit a bulk job and return its identifier
    async fn submit(&self, url: &str, body: &str) -> Result<String, SyncError> {
        let submission: BulkSubmission = self
            .http_client
            .post_text(url, &[("apikey", self.api_key.as_str())], body.to_string())
            .await?;

        match submission.bulk_id {
            Some(Value::String(id)) if !id.is_empty() => Ok(id),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(SyncError::BadUpstreamResponse(
                "bulk submission returned no bulk_id".to_string(),
            )),
        }
    }

    /// Fetch the status of a bulk job
    async fn status(&self, url: &str, bulk_id: &str) -> Result<BulkStatus, SyncError> {
        self.http_client
            .get_json(
                url,
                &[("apikey", self.api_key.as_str()), ("bulk_id", bulk_id)],
            )
            .await
    }
}

#[async_trait]
impl MetricsProvider for SharedCountProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::SubmitAndPoll
    }

    fn page_size(&self) -> usize {
        self.config.page_size
    }

    async fn fetch_metrics(&self, items: &[PageItem]) -> Result<Vec<ProviderResult>, SyncError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.bulk_url();
        let url = url.as_str();
        let body = items
            .iter()
            .map(|item| item.url.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let body = body.as_str();

        let bulk_id = self
            .retry_policy
            .run(|| self.submit(url, body))
            .await?;
        let bulk_id = bulk_id.as_str();

        debug!(bulk_id, urls = items.len(), "Bulk job submitted");

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut polls = 0u64;

        let data = loop {
            tokio::time::sleep(poll_interval).await;
            polls += 1;

            let status = self
                .retry_policy
                .run(|| self.status(url, bulk_id))
                .await?;

            if status.meta.completed {
                break status.data;
            }

            debug!(bulk_id, polls, "Bulk job still running");
        };

        let results: Vec<ProviderResult> = items
            .iter()
            .filter_map(|item| {
                let network = data.get(&item.url)?.get(&self.config.network)?;
                Some(ProviderResult {
                    record_id: item.record_id.clone(),
                    counts: network_counts(network)?,
                })
            })
            .collect();

        debug!(
            bulk_id,
            polls,
            answered = results.len(),
            "Bulk job completed"
        );

        Ok(results)
    }
}

/// Extract numeric counters of one network entry
///
/// Object entries contribute each numeric member; a bare number is stored
/// under `count`. Anything else yields no result.
fn network_counts(value: &Value) -> Option<BTreeMap<String, f64>> {
    match value {
        Value::Object(fields) => Some(
            fields
                .iter()
                .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
                .collect(),
        ),
        Value::Number(count) => count
            .as_f64()
            .map(|count| BTreeMap::from([(BARE_COUNT_FIELD.to_string(), count)])),
        _ => None,
    }
}
