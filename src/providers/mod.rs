//! Social metrics provider adapters
//!
//! Two integration strategies are supported:
//!
//! - [`facebook`]: Graph API batch requests, one synchronous call per page
//! - [`sharedcount`]: bulk jobs, submitted once per page then polled until complete
//!
//! Adapters are built once per run from the configuration and shared by every
//! record type that enables them.

pub mod facebook;
pub mod sharedcount;
pub mod traits;

use std::fmt;
use std::sync::Arc;

use crate::config::ProvidersConfig;
use crate::error::SyncError;
use crate::scoring::MetricField;

pub use facebook::FacebookProvider;
pub use sharedcount::SharedCountProvider;
pub use traits::{MetricsProvider, PageItem, ProviderResult};

#[cfg(test)]
pub use traits::MockMetricsProvider;

/// Integration strategy of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// One multi-item request per page
    DirectBatch,
    /// Job submission followed by status polling
    SubmitAndPoll,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::DirectBatch => write!(f, "direct_batch"),
            ProviderKind::SubmitAndPoll => write!(f, "submit_and_poll"),
        }
    }
}

/// Metric catalog of the provider registered under `name`
///
/// Available without building the adapter, so a record type can be checked
/// for enabled metrics before any credential is required.
pub fn metric_catalog(name: &str) -> Result<&'static [MetricField], SyncError> {
    match name {
        facebook::PROVIDER_NAME => Ok(facebook::METRIC_FIELDS),
        sharedcount::PROVIDER_NAME => Ok(sharedcount::METRIC_FIELDS),
        other => Err(unknown_provider(other)),
    }
}

/// Build the adapter registered under `name`
///
/// Unknown names and missing credentials are configuration errors.
pub fn build_provider(
    name: &str,
    config: &ProvidersConfig,
) -> Result<Arc<dyn MetricsProvider>, SyncError> {
    match name {
        facebook::PROVIDER_NAME => Ok(Arc::new(FacebookProvider::new(config.facebook.clone())?)),
        sharedcount::PROVIDER_NAME => Ok(Arc::new(SharedCountProvider::new(
            config.sharedcount.clone(),
        )?)),
        other => Err(unknown_provider(other)),
    }
}

fn unknown_provider(name: &str) -> SyncError {
    SyncError::Configuration(format!("unknown metrics provider: {}", name))
}
