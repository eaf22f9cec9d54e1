//! Synchronization of popularity metrics
//!
//! This module drives the sync job: paging through eligible records,
//! calling providers through a rate-limited client with fixed-delay retry,
//! and running the job periodically.
//!
//! # Components
//!
//! - [`retry`]: Fixed-delay retry around a single outbound call
//! - [`http_client`]: Rate-limited HTTP client for provider APIs
//! - [`cursor`]: Forward-only pagination over a partition
//! - [`orchestrator`]: The job itself, one pass per partition and provider
//! - [`scheduler`]: Periodic runner with jitter
//!
//! # Example
//!
//! ```ignore
//! use popularity_sync::config::Config;
//! use popularity_sync::database::SqliteRecordStore;
//! use popularity_sync::sync::SyncOrchestrator;
//!
//! let config = Config::from_file("config.yaml")?;
//! let store = Arc::new(SqliteRecordStore::new(&config.database.path).await?);
//! let report = SyncOrchestrator::from_config(store, &config)?
//!     .update_metrics()
//!     .await?;
//! ```

pub mod cursor;
pub mod http_client;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;

// Re-export main types for convenience
pub use cursor::{next_page, Cursor, EligibleRecord, Page};
pub use http_client::RateLimitedClient;
pub use orchestrator::{
    compute_updates, PartitionOutcome, PartitionReport, ProviderBinding, RunReport,
    SyncOrchestrator, TypePlan,
};
pub use retry::{with_retry, RetryPolicy};
pub use scheduler::{SyncScheduler, SyncStatus, Syncable};
