//! Application error types for popularity-sync
//!
//! This module defines the error taxonomy shared by the HTTP layer, the
//! record store and the synchronization orchestrator. All error types use
//! `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::config::ConfigError;

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the async connection wrapper
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Stored or outgoing JSON could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by a single outbound provider call
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Generic transport error
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limited by upstream
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Upstream answered with a non-success status
    #[error("Upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    /// Upstream rejected our credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Response shape violates the provider contract or the body is unparsable
    #[error("Bad upstream response: {0}")]
    BadUpstreamResponse(String),

    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The retry budget for one call was spent
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Number of attempts made
        attempts: u32,
        /// Last error observed before giving up
        last: Box<SyncError>,
    },
}

impl SyncError {
    /// Returns true for errors that must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}

/// Application-level error type
///
/// Aggregates the domain-specific errors. Returned by the orchestrator and
/// mapped to a non-zero exit status by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Provider call error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// At least one partition aborted during the run
    #[error("{0} partition(s) failed to synchronize")]
    PartitionsFailed(usize),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true if the error must stop the run instead of a single partition
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Sync(err) => err.is_fatal(),
            AppError::Config(_) => true,
            _ => false,
        }
    }
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            // Upstream flakiness of any kind is absorbed by the retry budget
            SyncError::NetworkTimeout
            | SyncError::ConnectionRefused
            | SyncError::Network(_)
            | SyncError::RateLimited(_)
            | SyncError::UpstreamStatus(_)
            | SyncError::Unauthorized
            | SyncError::BadUpstreamResponse(_) => true,

            SyncError::Configuration(_) => false,
            SyncError::ExhaustedRetries { .. } => false,
        }
    }
}
