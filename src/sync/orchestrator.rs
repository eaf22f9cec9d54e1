//! Synchronization orchestrator
//!
//! Drives one pass per (record type, locale, provider): fetch a page of
//! eligible records, ask the provider for fresh counters, compute score
//! deltas and persist the page as one unit before moving the cursor. The
//! cursor of every pass is saved after each persisted page so an aborted
//! pass resumes after its last fully processed page.
//!
//! Passes are isolated: a provider or store failure aborts only the pass it
//! happened in. Configuration errors abort the whole run.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};
use url::Url;

use crate::config::{Config, ConfigError};
use crate::database::RecordStore;
use crate::error::AppError;
use crate::locales::{self, DefaultLocale, LocaleRegistry};
use crate::models::{MetricSnapshot, Partition, ProgressKey, ScoreUpdate, SyncProgress};
use crate::otel::SyncMetrics;
use crate::providers::{self, MetricsProvider, PageItem, ProviderResult};
use crate::scoring::{self, WeightConfig};

use super::cursor::{next_page, Cursor, EligibleRecord};
use super::scheduler::Syncable;

/// A provider enabled for a record type, with its resolved weights
#[derive(Clone)]
pub struct ProviderBinding {
    /// Adapter used for every page of the type
    pub provider: Arc<dyn MetricsProvider>,
    /// Weights of the enabled metrics; empty means nothing to sync
    pub weights: WeightConfig,
}

/// Everything synchronized for one record type
#[derive(Clone)]
pub struct TypePlan {
    /// Record type name
    pub record_type: String,
    /// Providers enabled for the type
    pub bindings: Vec<ProviderBinding>,
    /// Providers configured for the type with no known metric turned on
    pub skipped: Vec<String>,
}

/// How a partition pass ended
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionOutcome {
    /// Reached the end of the partition
    Completed,
    /// Aborted on an error; the committed cursor is kept
    Failed(String),
    /// Stopped at a page boundary on request
    Cancelled,
    /// No metric enabled for the provider
    Skipped,
}

/// Result of one partition pass
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionReport {
    /// Partition processed
    pub partition: Partition,
    /// Provider name
    pub provider: String,
    /// Non-empty pages fetched
    pub pages: u64,
    /// Records whose snapshot was replaced
    pub records_updated: u64,
    /// How the pass ended
    pub outcome: PartitionOutcome,
}

impl PartitionReport {
    fn new(partition: Partition, provider: &str, outcome: PartitionOutcome) -> Self {
        Self {
            partition,
            provider: provider.to_string(),
            pages: 0,
            records_updated: 0,
            outcome,
        }
    }
}

/// Result of a full run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// One entry per partition pass, in processing order
    pub partitions: Vec<PartitionReport>,
}

impl RunReport {
    /// Number of passes that aborted on an error
    pub fn failed(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| matches!(p.outcome, PartitionOutcome::Failed(_)))
            .count()
    }

    /// Total records updated during the run
    pub fn records_updated(&self) -> u64 {
        self.partitions.iter().map(|p| p.records_updated).sum()
    }

    /// True when the run stopped early on request
    pub fn was_cancelled(&self) -> bool {
        self.partitions
            .iter()
            .any(|p| p.outcome == PartitionOutcome::Cancelled)
    }
}

/// The synchronization job
pub struct SyncOrchestrator<S: RecordStore> {
    store: Arc<S>,
    plans: Vec<TypePlan>,
    locales: Arc<dyn LocaleRegistry>,
    base_url: Option<Url>,
    metrics: Option<Arc<SyncMetrics>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<S: RecordStore> SyncOrchestrator<S> {
    /// Create an orchestrator over explicit plans, for an unlocalized site
    pub fn new(store: Arc<S>, plans: Vec<TypePlan>) -> Self {
        Self {
            store,
            plans,
            locales: Arc::new(DefaultLocale),
            base_url: None,
            metrics: None,
            cancel: None,
        }
    }

    /// Build the orchestrator from configuration
    ///
    /// Each (record type, provider) pair is resolved once here. Unknown
    /// providers are configuration errors, as are missing credentials of a
    /// provider that has at least one metric turned on.
    pub fn from_config(store: Arc<S>, config: &Config) -> Result<Self, AppError> {
        let mut adapters: HashMap<String, Arc<dyn MetricsProvider>> = HashMap::new();
        let mut plans = Vec::new();

        for (record_type, type_config) in &config.record_types {
            let Some(popularity) = &type_config.popularity else {
                continue;
            };
            let Some(metrics) = &popularity.metrics else {
                warn!(
                    record_type = record_type.as_str(),
                    "Popularity is enabled but no metrics are configured, type ignored"
                );
                continue;
            };

            let mut bindings = Vec::with_capacity(metrics.len());
            let mut skipped = Vec::new();
            for (provider_name, settings) in metrics {
                let weights =
                    WeightConfig::resolve(settings, providers::metric_catalog(provider_name)?);
                if weights.is_empty() {
                    skipped.push(provider_name.clone());
                    continue;
                }

                let provider = match adapters.get(provider_name) {
                    Some(provider) => provider.clone(),
                    None => {
                        let provider = providers::build_provider(provider_name, &config.providers)?;
                        adapters.insert(provider_name.clone(), provider.clone());
                        provider
                    }
                };
                bindings.push(ProviderBinding { provider, weights });
            }

            plans.push(TypePlan {
                record_type: record_type.clone(),
                bindings,
                skipped,
            });
        }

        let base_url = config
            .site
            .base_url
            .as_deref()
            .map(|url| {
                Url::parse(url).map_err(|e| {
                    ConfigError::InvalidValue(format!("site.base_url {}: {}", url, e))
                })
            })
            .transpose()?;

        let mut orchestrator = Self::new(store, plans)
            .with_locales(locales::from_config(config.locales.as_ref()));
        orchestrator.base_url = base_url;
        Ok(orchestrator)
    }

    /// Use the given locale source
    pub fn with_locales(mut self, locales: Arc<dyn LocaleRegistry>) -> Self {
        self.locales = locales;
        self
    }

    /// Resolve relative record URLs against `base_url`
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Record OpenTelemetry metrics
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Stop at the next page boundary once `cancel` turns true
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Resolved plans
    pub fn plans(&self) -> &[TypePlan] {
        &self.plans
    }

    /// Task entry point: run every pass and fail if any of them failed
    pub async fn update_metrics(&self) -> Result<RunReport, AppError> {
        let report = self.run().await?;

        match report.failed() {
            0 => Ok(report),
            failed => Err(AppError::PartitionsFailed(failed)),
        }
    }

    /// Run every partition pass and report on each
    ///
    /// Returns an error only for failures that stop the whole run.
    pub async fn run(&self) -> Result<RunReport, AppError> {
        let locales = self.locales.eligible_locales();
        let mut report = RunReport::default();

        info!(
            record_types = self.plans.len(),
            locales = locales.len(),
            "Starting popularity sync"
        );

        for plan in &self.plans {
            for provider in &plan.skipped {
                skip_provider(&mut report, &plan.record_type, provider, &locales);
            }

            for binding in &plan.bindings {
                let provider = binding.provider.name();

                if binding.weights.is_empty() {
                    skip_provider(&mut report, &plan.record_type, provider, &locales);
                    continue;
                }

                for locale in &locales {
                    let partition = Partition::new(&plan.record_type, locale);

                    if self.is_cancelled() {
                        report.partitions.push(PartitionReport::new(
                            partition,
                            provider,
                            PartitionOutcome::Cancelled,
                        ));
                        continue;
                    }

                    let span = tracing::info_span!(
                        "partition",
                        record_type = plan.record_type.as_str(),
                        locale = locale.as_str(),
                        provider,
                        kind = %binding.provider.kind()
                    );
                    let partition_report = self
                        .sync_partition(partition, binding)
                        .instrument(span)
                        .await?;
                    report.partitions.push(partition_report);
                }
            }
        }

        info!(
            partitions = report.partitions.len(),
            failed = report.failed(),
            records_updated = report.records_updated(),
            cancelled = report.was_cancelled(),
            "Popularity sync finished"
        );

        Ok(report)
    }

    /// Run one pass, turning non-fatal errors into a failed report
    async fn sync_partition(
        &self,
        partition: Partition,
        binding: &ProviderBinding,
    ) -> Result<PartitionReport, AppError> {
        let provider = binding.provider.name();
        let mut report = PartitionReport::new(partition, provider, PartitionOutcome::Completed);

        match self.drive_partition(binding, &mut report).await {
            Ok(()) => {
                info!(
                    pages = report.pages,
                    records_updated = report.records_updated,
                    outcome = ?report.outcome,
                    "Partition finished"
                );
                Ok(report)
            }
            Err(err) if err.is_fatal() => {
                error!(error = %err, "Unrecoverable error, aborting run");
                Err(err)
            }
            Err(err) => {
                error!(
                    error = %err,
                    pages = report.pages,
                    "Partition aborted, progress kept for the next run"
                );

                let key = ProgressKey::new(&report.partition, provider);
                match self.store.load_progress(&key).await {
                    Ok(stored) => {
                        let progress = stored.unwrap_or_else(|| SyncProgress::new(key));
                        if let Err(save_err) = self
                            .store
                            .save_progress(&progress.failed(err.to_string()))
                            .await
                        {
                            warn!(error = %save_err, "Failed to record partition failure");
                        }
                    }
                    // Saving over an unread row would drop its resume cursor
                    Err(load_err) => {
                        warn!(
                            error = %load_err,
                            "Failed to load partition progress, failure not recorded"
                        );
                    }
                }

                if let Some(metrics) = &self.metrics {
                    metrics.record_partition_failed(provider, &report.partition.record_type);
                }

                report.outcome = PartitionOutcome::Failed(err.to_string());
                Ok(report)
            }
        }
    }

    /// Page loop of one pass
    async fn drive_partition(
        &self,
        binding: &ProviderBinding,
        report: &mut PartitionReport,
    ) -> Result<(), AppError> {
        let provider = binding.provider.as_ref();
        let partition = report.partition.clone();
        let key = ProgressKey::new(&partition, provider.name());

        let stored = self.store.load_progress(&key).await?;
        let mut cursor = stored
            .as_ref()
            .and_then(|progress| progress.resume_cursor())
            .map(Cursor::after)
            .unwrap_or_default();
        let mut progress = stored.unwrap_or_else(|| SyncProgress::new(key));

        if let Some(last_id) = cursor.last_id() {
            info!(cursor = last_id, "Resuming partition");
        }

        loop {
            if self.is_cancelled() {
                self.store
                    .save_progress(&progress.in_progress(cursor.into_inner()))
                    .await?;
                report.outcome = PartitionOutcome::Cancelled;
                info!("Cancellation requested, stopping at page boundary");
                return Ok(());
            }

            let page = next_page(
                self.store.as_ref(),
                &partition,
                &cursor,
                provider.page_size(),
                self.base_url.as_ref(),
            )
            .await?;

            if !page.has_more {
                break;
            }

            report.pages += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_page(provider.name());
            }

            if !page.items.is_empty() {
                let items: Vec<PageItem> = page.items.iter().map(EligibleRecord::to_item).collect();

                let started = Instant::now();
                let results = provider.fetch_metrics(&items).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_provider_duration(
                        provider.name(),
                        started.elapsed().as_secs_f64(),
                    );
                }

                let updates =
                    compute_updates(provider.name(), &binding.weights, &page.items, results);
                self.store.apply_updates(&updates).await?;

                report.records_updated += updates.len() as u64;
                if let Some(metrics) = &self.metrics {
                    metrics.record_updates(provider.name(), updates.len() as u64);
                }
            }

            cursor = page.next;
            progress = progress.in_progress(cursor.last_id().map(String::from));
            self.store.save_progress(&progress).await?;

            debug!(
                cursor = cursor.last_id(),
                eligible = page.items.len(),
                "Page committed"
            );
        }

        self.store.save_progress(&progress.completed()).await?;
        report.outcome = PartitionOutcome::Completed;
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }
}

/// Report every locale of a (type, provider) pair with nothing to sync
fn skip_provider(
    report: &mut RunReport,
    record_type: &str,
    provider: &str,
    locales: &BTreeSet<String>,
) {
    warn!(
        record_type,
        provider, "Metrics are enabled but none of the known metrics is turned on, skipping"
    );
    for locale in locales {
        report.partitions.push(PartitionReport::new(
            Partition::new(record_type, locale),
            provider,
            PartitionOutcome::Skipped,
        ));
    }
}

#[async_trait]
impl<S: RecordStore + 'static> Syncable for SyncOrchestrator<S> {
    fn name(&self) -> &str {
        "popularity"
    }

    async fn sync(&self) -> Result<RunReport, AppError> {
        self.update_metrics().await
    }
}

/// Turn provider results of one page into store updates
///
/// The previous score is the one stored with the provider's snapshot, so the
/// aggregate stays the sum of the provider scores it was built from, even
/// after a weight change. Records without a result are left out.
pub fn compute_updates(
    provider: &str,
    weights: &WeightConfig,
    records: &[EligibleRecord],
    results: Vec<ProviderResult>,
) -> Vec<ScoreUpdate> {
    let stored: HashMap<&str, &EligibleRecord> =
        records.iter().map(|record| (record.id.as_str(), record)).collect();

    results
        .into_iter()
        .filter_map(|result| {
            let record = stored.get(result.record_id.as_str())?;

            let old_score = record
                .metrics
                .get(provider)
                .map_or(0.0, |snapshot| snapshot.score);
            let mut snapshot = MetricSnapshot::new(result.counts);
            let new_score = scoring::score(Some(&snapshot), weights);
            snapshot.score = new_score;

            Some(ScoreUpdate {
                record_id: result.record_id,
                provider: provider.to_string(),
                snapshot,
                delta: new_score - old_score,
            })
        })
        .collect()
}
