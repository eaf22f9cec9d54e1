//! Record store for popularity-sync
//!
//! This module defines the store trait the sync job depends on and its
//! SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteRecordStore;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{NewRecord, Partition, ProgressKey, Record, ScoreUpdate, SyncProgress};

/// Record store trait
///
/// The sync job only reads a filtered, projected view of records and issues
/// partial updates. It uses `async_trait` for async methods and
/// `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    // =========================================================================
    // Record operations
    // =========================================================================

    /// Create a record; its aggregate score starts at zero
    async fn insert_record(&self, record: &NewRecord) -> Result<(), DbError>;

    /// Get a record by id
    async fn get_record(&self, id: &str) -> Result<Option<Record>, DbError>;

    /// Fetch up to `limit` publicly visible records of a partition whose id
    /// is strictly greater than `after`, in ascending id order
    async fn fetch_after(
        &self,
        partition: &Partition,
        after: &str,
        limit: usize,
    ) -> Result<Vec<Record>, DbError>;

    /// Replace each update's provider snapshot and add its delta to the
    /// aggregate score, as one unit
    async fn apply_updates(&self, updates: &[ScoreUpdate]) -> Result<(), DbError>;

    // =========================================================================
    // Resume state operations
    // =========================================================================

    /// Load the progress row of a partition pass
    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<SyncProgress>, DbError>;

    /// Insert or replace the progress row of a partition pass
    async fn save_progress(&self, progress: &SyncProgress) -> Result<(), DbError>;

    /// List all progress rows
    async fn list_progress(&self) -> Result<Vec<SyncProgress>, DbError>;
}
