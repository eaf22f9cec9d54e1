//! Domain models for popularity-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod progress;
pub mod record;

// Re-export commonly used types
pub use progress::{ProgressKey, ProgressStatus, SyncProgress};
pub use record::{MetricSnapshot, NewRecord, Partition, Record, ScoreUpdate};
