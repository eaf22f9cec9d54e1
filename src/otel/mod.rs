//! OpenTelemetry integration for popularity-sync
//!
//! This module provides observability through OpenTelemetry: an optional
//! OTLP export of spans and metrics, the sync job's own instruments, and the
//! tracing subscriber setup shared by every command.

use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry setup errors
#[derive(Debug, Error)]
pub enum OtelError {
    /// Export requested without a collector endpoint
    #[error("OTLP export is enabled but otel.endpoint is not set")]
    MissingEndpoint,

    /// An OTLP exporter could not be built
    #[error("Failed to build OTLP {signal} exporter: {message}")]
    Exporter {
        /// `traces` or `metrics`
        signal: &'static str,
        /// Underlying error
        message: String,
    },

    /// The global tracing subscriber could not be installed
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    /// Pending telemetry could not be flushed
    #[error("Failed to flush telemetry: {0}")]
    Flush(String),
}

/// Trace and metric providers of the process
///
/// Without export, metrics are recorded by a provider that has no reader and
/// no tracer is handed out.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    service_name: String,
}

impl OtelProvider {
    /// Build the providers; export starts only when `config.enabled`
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let service_name = config.service_name.clone();
        let resource = Resource::new([
            KeyValue::new("service.name", service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]);

        if !config.enabled {
            return Ok(Self {
                tracer_provider: None,
                meter_provider: SdkMeterProvider::builder().with_resource(resource).build(),
                service_name,
            });
        }

        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or(OtelError::MissingEndpoint)?;
        let tracer_provider = span_pipeline(endpoint, &resource)?;
        let meter_provider = metric_pipeline(endpoint, &resource)?;
        global::set_tracer_provider(tracer_provider.clone());

        Ok(Self {
            tracer_provider: Some(tracer_provider),
            meter_provider,
            service_name,
        })
    }

    /// Tracer feeding the OTLP exporter, when exporting
    pub fn tracer(&self) -> Option<opentelemetry_sdk::trace::Tracer> {
        self.tracer_provider
            .as_ref()
            .map(|provider| provider.tracer("popularity-sync"))
    }

    /// Meter the sync instruments are created on
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.service_name.clone())
    }

    /// True when spans and metrics leave the process
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Flush pending spans and stop the metric reader
    pub fn shutdown(&self) -> Result<(), OtelError> {
        let mut failures: Vec<String> = Vec::new();

        if let Some(provider) = &self.tracer_provider {
            failures.extend(
                provider
                    .force_flush()
                    .into_iter()
                    .filter_map(Result::err)
                    .map(|e| format!("traces: {:?}", e)),
            );
        }
        if let Err(e) = self.meter_provider.shutdown() {
            failures.push(format!("metrics: {:?}", e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OtelError::Flush(failures.join("; ")))
        }
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn span_pipeline(endpoint: &str, resource: &Resource) -> Result<TracerProvider, OtelError> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime;
    use opentelemetry_sdk::trace::{Config, Sampler};

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| OtelError::Exporter {
            signal: "traces",
            message: e.to_string(),
        })?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(resource.clone()),
        )
        .build())
}

fn metric_pipeline(endpoint: &str, resource: &Resource) -> Result<SdkMeterProvider, OtelError> {
    use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
    use opentelemetry_sdk::metrics::reader::{
        DefaultAggregationSelector, DefaultTemporalitySelector,
    };
    use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

    let exporter = MetricsExporterBuilder::from(
        opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint),
    )
    .build_metrics_exporter(
        Box::new(DefaultTemporalitySelector::new()),
        Box::new(DefaultAggregationSelector::new()),
    )
    .map_err(|e| OtelError::Exporter {
        signal: "metrics",
        message: e.to_string(),
    })?;

    Ok(SdkMeterProvider::builder()
        .with_resource(resource.clone())
        .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
        .build())
}

/// Instruments of the synchronization job, all labelled by provider
pub struct SyncMetrics {
    /// Pages fetched from the record store
    pub pages_total: Counter<u64>,

    /// Records whose snapshot and score were rewritten
    pub records_updated_total: Counter<u64>,

    /// Partition passes that aborted on an error
    pub partitions_failed_total: Counter<u64>,

    /// Duration of one provider call for a page, retries included
    pub provider_duration: Histogram<f64>,
}

impl SyncMetrics {
    /// Create the instruments on the given meter
    pub fn new(meter: &Meter) -> Self {
        let pages_total = meter
            .u64_counter("popularity_sync_pages_total")
            .with_description("Total number of record pages fetched")
            .init();

        let records_updated_total = meter
            .u64_counter("popularity_sync_records_updated_total")
            .with_description("Total number of records whose popularity was updated")
            .init();

        let partitions_failed_total = meter
            .u64_counter("popularity_sync_partitions_failed_total")
            .with_description("Total number of partition passes aborted by an error")
            .init();

        let provider_duration = meter
            .f64_histogram("popularity_sync_provider_duration_seconds")
            .with_description("Provider call duration per page in seconds")
            .init();

        Self {
            pages_total,
            records_updated_total,
            partitions_failed_total,
            provider_duration,
        }
    }

    /// Record one fetched page
    pub fn record_page(&self, provider: &str) {
        self.pages_total
            .add(1, &[KeyValue::new("provider", provider.to_string())]);
    }

    /// Record updated records of one page
    pub fn record_updates(&self, provider: &str, count: u64) {
        self.records_updated_total
            .add(count, &[KeyValue::new("provider", provider.to_string())]);
    }

    /// Record an aborted partition pass
    pub fn record_partition_failed(&self, provider: &str, record_type: &str) {
        self.partitions_failed_total.add(
            1,
            &[
                KeyValue::new("provider", provider.to_string()),
                KeyValue::new("record_type", record_type.to_string()),
            ],
        );
    }

    /// Record the duration of one provider call
    pub fn record_provider_duration(&self, provider: &str, duration_secs: f64) {
        self.provider_duration.record(
            duration_secs,
            &[KeyValue::new("provider", provider.to_string())],
        );
    }
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Output is JSON
/// unless the format is `pretty`.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(&logging.level)));

    let otel_layer = otel
        .tracer()
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    let result = if logging.format.eq_ignore_ascii_case("pretty") {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    };

    result.map_err(|e| OtelError::Subscriber(e.to_string()))
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}
