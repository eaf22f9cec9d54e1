//! Graph API provider (direct batch)
//!
//! One page of URLs becomes one batch request. Each sub-request asks the
//! Graph API for the like and share totals of a single URL. The batch answer
//! must contain one successful item per sub-request, in order; any deviation
//! fails the whole batch, which is then retried as a unit.
//!
//! # Request format
//!
//! `POST {graph_url}` with form fields `batch` (JSON array of
//! `{method, relative_url}`) and, when configured, `access_token`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::FacebookConfig;
use crate::error::SyncError;
use crate::scoring::MetricField;
use crate::sync::{RateLimitedClient, RetryPolicy};

use super::{MetricsProvider, PageItem, ProviderKind, ProviderResult};

/// Name of this provider in configuration and snapshots
pub const PROVIDER_NAME: &str = "facebook";

/// Fixed field selection of every sub-request; the target URL is appended
pub const FIELDS_TEMPLATE: &str =
    "?fields=og_object%7Blikes.summary(total_count).limit(0)%7D,share&id=";

/// Metrics this provider reports, with their snapshot field names
pub static METRIC_FIELDS: &[MetricField] = &[
    MetricField {
        key: "likes",
        field: "likes",
    },
    MetricField {
        key: "shares",
        field: "shares",
    },
];

/// One sub-request of a batch
#[derive(Debug, Clone, Serialize, PartialEq)]
struct BatchRequest {
    method: &'static str,
    relative_url: String,
}

/// One item of a batch answer
#[derive(Debug, Deserialize)]
struct BatchItem {
    code: u16,
    /// JSON document encoded as a string
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphObject {
    og_object: Option<OgObject>,
    share: Option<ShareStats>,
}

#[derive(Debug, Deserialize)]
struct OgObject {
    likes: Option<LikeStats>,
}

#[derive(Debug, Deserialize)]
struct LikeStats {
    summary: Option<LikeSummary>,
}

#[derive(Debug, Deserialize)]
struct LikeSummary {
    total_count: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ShareStats {
    share_count: Option<f64>,
}

/// Graph API batch adapter
pub struct FacebookProvider {
    config: FacebookConfig,
    http_client: Arc<RateLimitedClient>,
    retry_policy: RetryPolicy,
}

impl FacebookProvider {
    /// Create a new provider with the given configuration
    pub fn new(config: FacebookConfig) -> Result<Self, SyncError> {
        let http_client = RateLimitedClient::new(config.rate_limit.clone())?;
        Ok(Self::with_http_client(config, Arc::new(http_client)))
    }

    /// Create a provider sharing an existing HTTP client
    pub fn with_http_client(config: FacebookConfig, http_client: Arc<RateLimitedClient>) -> Self {
        let retry_policy = RetryPolicy::from(&config.retry);
        Self {
            config,
            http_client,
            retry_policy,
        }
    }

    /// Send one batch and validate its shape
    ///
    /// Returns the decoded counters of each item, by position. Items
    /// without a body decode to `None`.
    async fn send_batch(
        &self,
        form: &[(&str, String)],
        expected: usize,
    ) -> Result<Vec<Option<BTreeMap<String, f64>>>, SyncError> {
        let response: Vec<Option<BatchItem>> = self
            .http_client
            .post_form(&self.config.graph_url, form)
            .await?;

        if response.len() != expected {
            return Err(SyncError::BadUpstreamResponse(format!(
                "batch answer has {} items, expected {}",
                response.len(),
                expected
            )));
        }

        response
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let item = item.ok_or_else(|| {
                    SyncError::BadUpstreamResponse(format!("batch item {} has no response", index))
                })?;
                if !(200..300).contains(&item.code) {
                    return Err(SyncError::BadUpstreamResponse(format!(
                        "batch item {} returned status {}",
                        index, item.code
                    )));
                }
                item.body.as_deref().map(parse_graph_body).transpose()
            })
            .collect()
    }
}

#[async_trait]
impl MetricsProvider for FacebookProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::DirectBatch
    }

    fn page_size(&self) -> usize {
        self.config.page_size
    }

    async fn fetch_metrics(&self, items: &[PageItem]) -> Result<Vec<ProviderResult>, SyncError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let batch = serde_json::to_string(&build_batch(items))
            .map_err(|e| SyncError::Configuration(format!("batch encoding: {}", e)))?;

        let mut form = vec![("batch", batch)];
        if let Some(token) = &self.config.access_token {
            form.push(("access_token", token.clone()));
        }

        let form = &form;
        let counts = self
            .retry_policy
            .run(|| self.send_batch(form, items.len()))
            .await?;

        let results: Vec<ProviderResult> = items
            .iter()
            .zip(counts)
            .filter_map(|(item, counts)| {
                counts.map(|counts| ProviderResult {
                    record_id: item.record_id.clone(),
                    counts,
                })
            })
            .collect();

        debug!(
            requested = items.len(),
            answered = results.len(),
            "Graph API batch completed"
        );

        Ok(results)
    }
}

fn build_batch(items: &[PageItem]) -> Vec<BatchRequest> {
    items
        .iter()
        .map(|item| BatchRequest {
            method: "GET",
            relative_url: format!("{}{}", FIELDS_TEMPLATE, urlencoding::encode(&item.url)),
        })
        .collect()
}

/// Decode the JSON body of one batch item into counters
///
/// Totals the Graph API omits are left out of the snapshot.
fn parse_graph_body(body: &str) -> Result<BTreeMap<String, f64>, SyncError> {
    let object: GraphObject = serde_json::from_str(body)
        .map_err(|e| SyncError::BadUpstreamResponse(format!("invalid batch item body: {}", e)))?;

    let mut counts = BTreeMap::new();

    let likes = object
        .og_object
        .and_then(|og| og.likes)
        .and_then(|likes| likes.summary)
        .and_then(|summary| summary.total_count);
    if let Some(likes) = likes {
        counts.insert("likes".to_string(), likes);
    }

    if let Some(shares) = object.share.and_then(|share| share.share_count) {
        counts.insert("shares".to_string(), shares);
    }

    Ok(counts)
}
