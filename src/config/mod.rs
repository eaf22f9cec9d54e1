//! Configuration management for popularity-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Public site settings
    #[serde(default)]
    pub site: SiteConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Metrics provider configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Per record-type popularity settings
    #[serde(default)]
    pub record_types: BTreeMap<String, RecordTypeConfig>,

    /// Locale registry; absent means a single default locale
    #[serde(default)]
    pub locales: Option<BTreeMap<String, LocaleConfig>>,

    /// Periodic run settings
    #[serde(default)]
    pub scheduler: ScheduleConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix POPULARITY_SYNC_
    ///
    /// Record types cannot be expressed through the environment, so a config
    /// loaded this way only carries connection settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(base_url) = std::env::var("POPULARITY_SYNC_BASE_URL") {
            config.site.base_url = Some(base_url);
        }
        if let Ok(path) = std::env::var("POPULARITY_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(token) = std::env::var("POPULARITY_SYNC_FACEBOOK_ACCESS_TOKEN") {
            config.providers.facebook.access_token = Some(token);
        }
        if let Ok(key) = std::env::var("POPULARITY_SYNC_SHAREDCOUNT_API_KEY") {
            config.providers.sharedcount.api_key = Some(key);
        }
        if let Ok(level) = std::env::var("POPULARITY_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(interval) = std::env::var("POPULARITY_SYNC_INTERVAL_SECS") {
            config.scheduler.interval_secs = interval
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid interval".to_string()))?;
        }

        Ok(config)
    }
}

/// Public site settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    /// Base URL used to turn relative record URLs into absolute ones
    pub base_url: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "/data/db/popularity.db".to_string()
}

/// Metrics provider configurations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProvidersConfig {
    /// Graph API (direct batch)
    #[serde(default)]
    pub facebook: FacebookConfig,

    /// Bulk aggregation API (submit and poll)
    #[serde(default)]
    pub sharedcount: SharedCountConfig,
}

/// Graph API provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacebookConfig {
    /// Graph API endpoint
    #[serde(default = "default_graph_url")]
    pub graph_url: String,

    /// Access token sent with every batch
    pub access_token: Option<String>,

    /// Records per batch request (the Graph API batch limit)
    #[serde(default = "default_facebook_page_size")]
    pub page_size: usize,

    /// Retry configuration; the Graph API wants a long pause when throttled
    #[serde(default = "default_facebook_retry")]
    pub retry: RetryConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            graph_url: default_graph_url(),
            access_token: None,
            page_size: default_facebook_page_size(),
            retry: default_facebook_retry(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_graph_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_facebook_page_size() -> usize {
    50
}

fn default_facebook_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: default_max_attempts(),
        delay_ms: 60_000,
    }
}

/// Bulk aggregation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedCountConfig {
    /// API base URL
    #[serde(default = "default_sharedcount_url")]
    pub api_url: String,

    /// API key; required as soon as a record type uses this provider
    pub api_key: Option<String>,

    /// Network whose counters are read from each per-URL result
    #[serde(default = "default_sharedcount_network")]
    pub network: String,

    /// URLs submitted per bulk job
    #[serde(default = "default_sharedcount_page_size")]
    pub page_size: usize,

    /// Interval between status polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for SharedCountConfig {
    fn default() -> Self {
        Self {
            api_url: default_sharedcount_url(),
            api_key: None,
            network: default_sharedcount_network(),
            page_size: default_sharedcount_page_size(),
            poll_interval_ms: default_poll_interval(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_sharedcount_url() -> String {
    "https://api.sharedcount.com/v1.0".to_string()
}

fn default_sharedcount_network() -> String {
    "Facebook".to_string()
}

fn default_sharedcount_page_size() -> usize {
    100
}

fn default_poll_interval() -> u64 {
    1000
}

/// Retry configuration for external API calls
///
/// Fixed delay between attempts, no exponential growth and no jitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    60
}

fn default_retry_delay() -> u64 {
    1000
}

/// Rate limiting configuration for HTTP clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum interval between requests to the same host in milliseconds
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Wait time reported when rate limited without Retry-After (in seconds)
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 0,
            rate_limit_wait_secs: default_rate_limit_wait(),
        }
    }
}

fn default_rate_limit_wait() -> u64 {
    60
}

/// Popularity settings of one record type
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordTypeConfig {
    /// Presence enables popularity tracking for the type
    #[serde(default)]
    pub popularity: Option<PopularityConfig>,
}

/// Popularity tracking options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PopularityConfig {
    /// provider name -> metric name -> setting
    #[serde(default)]
    pub metrics: Option<BTreeMap<String, BTreeMap<String, MetricSetting>>>,
}

/// Setting of one metric: a plain toggle or a weight descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricSetting {
    /// `true` enables the metric with weight 1.0, `false` disables it
    Toggle(bool),
    /// `{score: n}` enables the metric with the given weight
    Weighted(WeightDescriptor),
}

impl MetricSetting {
    /// Effective weight, or None when the metric is turned off
    pub fn weight(&self) -> Option<f64> {
        match self {
            MetricSetting::Toggle(true) => Some(1.0),
            MetricSetting::Toggle(false) => None,
            MetricSetting::Weighted(descriptor) => Some(descriptor.score.unwrap_or(1.0)),
        }
    }
}

/// Weight descriptor of an enabled metric
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeightDescriptor {
    /// Multiplier applied to the raw counter
    #[serde(default)]
    pub score: Option<f64>,
}

/// Locale registry entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocaleConfig {
    /// Private locales are never synchronized
    #[serde(default)]
    pub private: bool,
}

/// Periodic run settings used by the `watch` command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Delay before the first run (seconds)
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// Random delay added to each interval (seconds)
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Time between the end of one run and the start of the next (seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 0,
            jitter_secs: default_jitter_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_jitter_secs() -> u64 {
    60
}

fn default_interval_secs() -> u64 {
    86400
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "popularity-sync".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Test 1: Parse complete configuration from YAML
    #[test]
    fn test_parse_complete_yaml_config() {
        let yaml = r#"
site:
  base_url: "https://example.com"

database:
  path: "/tmp/popularity.db"

providers:
  facebook:
    graph_url: "http://localhost:9000"
    access_token: "token"
    page_size: 25
    retry:
      max_attempts: 5
      delay_ms: 10
  sharedcount:
    api_url: "http://localhost:9001"
    api_key: "secret"
    poll_interval_ms: 50

record_types:
  article:
    popularity:
      metrics:
        facebook:
          likes:
            score: 1
          shares:
            score: 2
  event:
    popularity:
      metrics:
        sharedcount:
          shares: true
          comments: false

locales:
  en: {}
  en-draft: {}
  fr:
    private: true

scheduler:
  interval_secs: 3600
  jitter_secs: 0

logging:
  level: "debug"
  format: "pretty"
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.site.base_url.as_deref(), Some("https://example.com"));
        assert_eq!(config.database.path, "/tmp/popularity.db");

        let fb = &config.providers.facebook;
        assert_eq!(fb.graph_url, "http://localhost:9000");
        assert_eq!(fb.access_token.as_deref(), Some("token"));
        assert_eq!(fb.page_size, 25);
        assert_eq!(fb.retry.max_attempts, 5);
        assert_eq!(fb.retry.delay_ms, 10);

        let sc = &config.providers.sharedcount;
        assert_eq!(sc.api_key.as_deref(), Some("secret"));
        assert_eq!(sc.poll_interval_ms, 50);
        assert_eq!(sc.page_size, 100);
        assert_eq!(sc.network, "Facebook");

        let article = config.record_types["article"].popularity.as_ref().unwrap();
        let fb_metrics = &article.metrics.as_ref().unwrap()["facebook"];
        assert_eq!(fb_metrics["likes"].weight(), Some(1.0));
        assert_eq!(fb_metrics["shares"].weight(), Some(2.0));

        let event = config.record_types["event"].popularity.as_ref().unwrap();
        let sc_metrics = &event.metrics.as_ref().unwrap()["sharedcount"];
        assert_eq!(sc_metrics["shares"].weight(), Some(1.0));
        assert_eq!(sc_metrics["comments"].weight(), None);

        let locales = config.locales.as_ref().unwrap();
        assert_eq!(locales.len(), 3);
        assert!(locales["fr"].private);
        assert!(!locales["en"].private);

        assert_eq!(config.scheduler.interval_secs, 3600);
        assert_eq!(config.logging.level, "debug");
    }

    // Test 2: Default values applied
    #[test]
    fn test_default_values_applied() {
        let config = Config::from_yaml("{}").unwrap();

        assert_eq!(config.database.path, "/data/db/popularity.db");
        assert_eq!(config.providers.facebook.graph_url, "https://graph.facebook.com");
        assert_eq!(config.providers.facebook.page_size, 50);
        assert_eq!(config.providers.facebook.retry.max_attempts, 60);
        assert_eq!(config.providers.facebook.retry.delay_ms, 60_000);
        assert_eq!(config.providers.sharedcount.page_size, 100);
        assert_eq!(config.providers.sharedcount.retry.delay_ms, 1000);
        assert_eq!(config.providers.sharedcount.poll_interval_ms, 1000);
        assert!(config.providers.sharedcount.api_key.is_none());
        assert!(config.record_types.is_empty());
        assert!(config.locales.is_none());
        assert_eq!(config.logging.format, "json");
        assert!(!config.otel.enabled);
    }

    // Test 3: Environment variable expansion
    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("TEST_POPULARITY_SC_KEY", "expanded-key");

        let yaml = r#"
providers:
  sharedcount:
    api_key: "${TEST_POPULARITY_SC_KEY}"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.providers.sharedcount.api_key.as_deref(),
            Some("expanded-key")
        );

        std::env::remove_var("TEST_POPULARITY_SC_KEY");
    }

    // Test 4: Unknown variables are left untouched
    #[test]
    fn test_env_var_expansion_unknown_var() {
        let expanded = expand_env_vars("key: ${POPULARITY_SYNC_SURELY_UNSET_VAR}");
        assert_eq!(expanded, "key: ${POPULARITY_SYNC_SURELY_UNSET_VAR}");
    }

    // Test 5: Load from environment
    #[test]
    fn test_from_env() {
        std::env::set_var("POPULARITY_SYNC_DATABASE_PATH", "/tmp/env.db");
        std::env::set_var("POPULARITY_SYNC_SHAREDCOUNT_API_KEY", "env-key");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database.path, "/tmp/env.db");
        assert_eq!(
            config.providers.sharedcount.api_key.as_deref(),
            Some("env-key")
        );

        std::env::remove_var("POPULARITY_SYNC_DATABASE_PATH");
        std::env::remove_var("POPULARITY_SYNC_SHAREDCOUNT_API_KEY");
    }

    // Test 6: Parse error on invalid YAML
    #[test]
    fn test_parse_error_invalid_yaml() {
        let result = Config::from_yaml("record_types: [unclosed");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // Test 7: Weight descriptor without score defaults to 1.0
    #[test]
    fn test_weight_descriptor_default_score() {
        let setting: MetricSetting = serde_yaml::from_str("{}").unwrap();
        assert_eq!(setting.weight(), Some(1.0));

        let setting: MetricSetting = serde_yaml::from_str("score: 0.5").unwrap();
        assert_eq!(setting.weight(), Some(0.5));

        let setting: MetricSetting = serde_yaml::from_str("false").unwrap();
        assert_eq!(setting.weight(), None);
    }

    // Test 8: Popularity without metrics parses to None
    #[test]
    fn test_popularity_without_metrics() {
        let yaml = r#"
record_types:
  page:
    popularity: {}
  note: {}
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let page = config.record_types["page"].popularity.as_ref().unwrap();
        assert!(page.metrics.is_none());
        assert!(config.record_types["note"].popularity.is_none());
    }

    // Test 9: Load from file
    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database:\n  path: \"/tmp/file.db\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database.path, "/tmp/file.db");

        let missing = Config::from_file("/nonexistent/popularity.yaml");
        assert!(matches!(missing, Err(ConfigError::FileRead(_))));
    }
}
