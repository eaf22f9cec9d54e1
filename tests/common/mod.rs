//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::watch;
use wiremock::{Request, Respond, ResponseTemplate};

use popularity_sync::config::Config;
use popularity_sync::database::{RecordStore, SqliteRecordStore};
use popularity_sync::models::{MetricSnapshot, NewRecord, ScoreUpdate};

/// Create an in-memory record store for testing
pub async fn create_test_store() -> Arc<SqliteRecordStore> {
    Arc::new(
        SqliteRecordStore::in_memory()
            .await
            .expect("Failed to create test store"),
    )
}

/// Insert published article records with absolute URLs
pub async fn seed_articles(store: &SqliteRecordStore, locale: &str, ids: &[&str]) {
    for id in ids {
        store
            .insert_record(&NewRecord::new(*id, "article", locale).with_url(article_url(id)))
            .await
            .expect("Failed to insert record");
    }
}

/// Public URL used for a seeded article
pub fn article_url(id: &str) -> String {
    format!("https://example.com/articles/{}", id)
}

/// Store a previous snapshot for a record, as an earlier run would have
pub async fn seed_snapshot(
    store: &SqliteRecordStore,
    id: &str,
    provider: &str,
    snapshot: MetricSnapshot,
) {
    let delta = snapshot.score;
    store
        .apply_updates(&[ScoreUpdate {
            record_id: id.to_string(),
            provider: provider.to_string(),
            snapshot,
            delta,
        }])
        .await
        .expect("Failed to seed snapshot");
}

/// Configuration with a Graph API provider pointing at `graph_url`
///
/// Articles weigh likes 1 and shares 2. Retries are immediate.
pub fn facebook_config(graph_url: &str, page_size: usize, extra: &str) -> Config {
    let yaml = format!(
        r#"
providers:
  facebook:
    graph_url: "{graph_url}"
    page_size: {page_size}
    retry:
      max_attempts: 2
      delay_ms: 0

record_types:
  article:
    popularity:
      metrics:
        facebook:
          likes:
            score: 1
          shares:
            score: 2
{extra}
"#
    );
    Config::from_yaml(&yaml).expect("Failed to parse test config")
}

#[derive(Deserialize)]
struct SubRequest {
    relative_url: String,
}

/// Graph API batch responder
///
/// Answers every sub-request with the counters registered for its URL, or
/// with an empty object. Batches containing a failing URL get HTTP 500.
/// Optionally raises a cancellation flag when it serves a request.
#[derive(Clone, Default)]
pub struct GraphResponder {
    counts: HashMap<String, (u64, u64)>,
    failing: HashSet<String>,
    cancel_on_request: Option<Arc<watch::Sender<bool>>>,
}

impl GraphResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register likes and shares for a URL
    pub fn with_counts(mut self, url: impl Into<String>, likes: u64, shares: u64) -> Self {
        self.counts.insert(url.into(), (likes, shares));
        self
    }

    /// Make every batch containing `url` fail
    pub fn failing_on(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }

    /// Raise `cancel` when the first batch is served
    pub fn cancelling(mut self, cancel: watch::Sender<bool>) -> Self {
        self.cancel_on_request = Some(Arc::new(cancel));
        self
    }
}

/// URLs of the sub-requests of a recorded batch request
pub fn batch_urls(request: &Request) -> Vec<String> {
    let batch = url::form_urlencoded::parse(&request.body)
        .find(|(key, _)| key == "batch")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();

    let sub_requests: Vec<SubRequest> = serde_json::from_str(&batch).unwrap_or_default();
    sub_requests
        .iter()
        .filter_map(|sub| {
            let (_, encoded) = sub.relative_url.split_once("&id=")?;
            urlencoding::decode(encoded).ok().map(|url| url.into_owned())
        })
        .collect()
}

impl Respond for GraphResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Some(cancel) = &self.cancel_on_request {
            cancel.send_replace(true);
        }

        let urls = batch_urls(request);
        if urls.iter().any(|url| self.failing.contains(url)) {
            return ResponseTemplate::new(500);
        }

        let items: Vec<serde_json::Value> = urls
            .iter()
            .map(|url| {
                let body = match self.counts.get(url) {
                    Some((likes, shares)) => serde_json::json!({
                        "og_object": {"likes": {"summary": {"total_count": likes}}},
                        "share": {"share_count": shares},
                        "id": url,
                    }),
                    None => serde_json::json!({"id": url}),
                };
                serde_json::json!({"code": 200, "body": body.to_string()})
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(items)
    }
}
