//! Metrics provider trait definition
//!
//! This module defines the trait that every social-metrics provider adapter
//! implements. An adapter receives one page of eligible records and answers
//! with the raw counters it obtained for them.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::SyncError;

use super::ProviderKind;

/// One eligible record submitted to a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageItem {
    /// Record id
    pub record_id: String,
    /// Absolute public URL
    pub url: String,
}

impl PageItem {
    /// Create a new page item
    pub fn new(record_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            url: url.into(),
        }
    }
}

/// Raw counters a provider returned for one record
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    /// Record id the counters belong to
    pub record_id: String,
    /// Counters keyed by provider field name
    pub counts: BTreeMap<String, f64>,
}

/// Trait for metrics provider adapters
///
/// Adapters are responsible for:
/// - Encoding a page of URLs into the provider's request format
/// - Retrying failed calls within their retry budget
/// - Validating the response shape and decoding counters
///
/// Records the provider has no data for are simply absent from the result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Provider name, also the key of its snapshot on each record
    fn name(&self) -> &str;

    /// Integration strategy of this provider
    fn kind(&self) -> ProviderKind;

    /// Records per request, bounded by the provider's batch limit
    fn page_size(&self) -> usize;

    /// Fetch counters for one page
    ///
    /// # Returns
    ///
    /// - `Ok(results)` for the records the provider answered for
    /// - `Err(SyncError::ExhaustedRetries)` once the retry budget is spent
    async fn fetch_metrics(&self, items: &[PageItem]) -> Result<Vec<ProviderResult>, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Mock provider can be configured
    #[tokio::test]
    async fn test_mock_provider() {
        let mut mock = MockMetricsProvider::new();

        mock.expect_name().return_const("mock".to_string());
        mock.expect_kind().return_const(ProviderKind::DirectBatch);
        mock.expect_page_size().return_const(10usize);
        mock.expect_fetch_metrics().returning(|items| {
            Ok(items
                .iter()
                .map(|item| ProviderResult {
                    record_id: item.record_id.clone(),
                    counts: BTreeMap::from([("likes".to_string(), 1.0)]),
                })
                .collect())
        });

        assert_eq!(mock.name(), "mock");
        assert_eq!(mock.kind(), ProviderKind::DirectBatch);
        assert_eq!(mock.page_size(), 10);

        let results = mock
            .fetch_metrics(&[PageItem::new("a1", "https://example.com/a1")])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record_id, "a1");
    }

    // Test 2: Mock provider error propagation
    #[tokio::test]
    async fn test_mock_provider_error() {
        let mut mock = MockMetricsProvider::new();

        mock.expect_fetch_metrics().returning(|_| {
            Err(SyncError::ExhaustedRetries {
                attempts: 3,
                last: Box::new(SyncError::NetworkTimeout),
            })
        });

        let result = mock.fetch_metrics(&[]).await;
        assert!(matches!(
            result,
            Err(SyncError::ExhaustedRetries { attempts: 3, .. })
        ));
    }
}
