//! Resume state of a partition
//!
//! One row per (record type, locale, provider) holding the last cursor
//! committed after a fully processed page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Partition;

/// Identifies the resume state of one provider pass over one partition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressKey {
    /// Record type name
    pub record_type: String,

    /// Locale name
    pub locale: String,

    /// Provider name
    pub provider: String,
}

impl ProgressKey {
    /// Create a key for a partition and provider
    pub fn new(partition: &Partition, provider: impl Into<String>) -> Self {
        Self {
            record_type: partition.record_type.clone(),
            locale: partition.locale.clone(),
            provider: provider.into(),
        }
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.record_type, self.locale, self.provider)
    }
}

/// Persisted progress of a partition pass
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    /// Partition and provider
    pub key: ProgressKey,

    /// Last committed record id; None means start from the beginning
    pub cursor: Option<String>,

    /// Status of the pass
    pub status: ProgressStatus,

    /// Error message if the pass failed
    pub error_message: Option<String>,

    /// When the row was last written
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncProgress {
    /// Create a fresh progress row
    pub fn new(key: ProgressKey) -> Self {
        Self {
            key,
            cursor: None,
            status: ProgressStatus::InProgress,
            error_message: None,
            updated_at: None,
        }
    }

    /// Record a committed cursor position
    pub fn in_progress(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self.status = ProgressStatus::InProgress;
        self.error_message = None;
        self.updated_at = Some(Utc::now());
        self
    }

    /// Mark the pass as finished; the next run starts over
    pub fn completed(mut self) -> Self {
        self.cursor = None;
        self.status = ProgressStatus::Completed;
        self.error_message = None;
        self.updated_at = Some(Utc::now());
        self
    }

    /// Mark the pass as failed, keeping the committed cursor
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = ProgressStatus::Failed;
        self.error_message = Some(error.into());
        self.updated_at = Some(Utc::now());
        self
    }

    /// Cursor to resume from, if the previous pass did not finish
    pub fn resume_cursor(&self) -> Option<&str> {
        match self.status {
            ProgressStatus::Completed => None,
            ProgressStatus::InProgress | ProgressStatus::Failed => self.cursor.as_deref(),
        }
    }
}

/// Status value of a partition pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Pass started and has not finished (or was interrupted)
    InProgress,
    /// Pass reached the end of the partition
    Completed,
    /// Pass aborted on an error
    Failed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::InProgress => write!(f, "in_progress"),
            ProgressStatus::Completed => write!(f, "completed"),
            ProgressStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "failed" => Ok(ProgressStatus::Failed),
            other => Err(format!("unknown progress status: {}", other)),
        }
    }
}
