//! Record-related domain models
//!
//! This module defines the projected view of content records the sync job
//! reads, the per-provider metric snapshot, and the partial update it writes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Independent unit of synchronization work with its own cursor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    /// Record type name
    pub record_type: String,

    /// Locale name
    pub locale: String,
}

impl Partition {
    /// Create a new partition
    pub fn new(record_type: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            locale: locale.into(),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.locale)
    }
}

/// Raw provider counters plus the score derived from them at write time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Raw counters keyed by provider field name
    #[serde(flatten)]
    pub counts: BTreeMap<String, f64>,

    /// Weighted score computed when the snapshot was written
    #[serde(default)]
    pub score: f64,
}

impl MetricSnapshot {
    /// Create a snapshot from raw counters with a zero score
    pub fn new(counts: BTreeMap<String, f64>) -> Self {
        Self { counts, score: 0.0 }
    }

    /// Set a single counter
    pub fn with_count(mut self, field: impl Into<String>, value: f64) -> Self {
        self.counts.insert(field.into(), value);
        self
    }

    /// Read a counter, absent counters read as zero
    pub fn count(&self, field: &str) -> f64 {
        self.counts.get(field).copied().unwrap_or(0.0)
    }
}

/// Content record as seen by the sync job
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Totally ordered record key
    pub id: String,

    /// Record type name
    pub record_type: String,

    /// Locale the record belongs to
    pub locale: String,

    /// Public URL; records without one are never synchronized
    pub public_url: Option<String>,

    /// Stored snapshot per provider name
    pub popularity_metrics: BTreeMap<String, MetricSnapshot>,

    /// Aggregate score, the sum of all providers' scores
    pub popularity_score: f64,
}

/// Record to be created in the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Record key
    pub id: String,

    /// Record type name
    pub record_type: String,

    /// Locale the record belongs to
    pub locale: String,

    /// Public URL, absolute or relative to the site base URL
    pub public_url: Option<String>,

    /// Whether the record is visible to anonymous visitors
    pub published: bool,
}

impl NewRecord {
    /// Create a published record without a URL
    pub fn new(
        id: impl Into<String>,
        record_type: impl Into<String>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            locale: locale.into(),
            public_url: None,
            published: true,
        }
    }

    /// Set the public URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Mark the record as not publicly visible
    pub fn unpublished(mut self) -> Self {
        self.published = false;
        self
    }
}

/// Partial update for one record and one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    /// Record key
    pub record_id: String,

    /// Provider whose snapshot is replaced
    pub provider: String,

    /// New snapshot, replaces the stored one
    pub snapshot: MetricSnapshot,

    /// Signed change applied to the aggregate score
    pub delta: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_display() {
        assert_eq!(Partition::new("article", "en").to_string(), "article/en");
    }

    #[test]
    fn test_snapshot_json_shape_is_flat() {
        let snapshot = MetricSnapshot {
            counts: BTreeMap::from([("likes".to_string(), 10.0), ("shares".to_string(), 3.0)]),
            score: 16.0,
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json, serde_json::json!({"likes": 10.0, "shares": 3.0, "score": 16.0}));

        let parsed: MetricSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_snapshot_missing_count_reads_zero() {
        let snapshot = MetricSnapshot::default().with_count("likes", 4.0);
        assert_eq!(snapshot.count("likes"), 4.0);
        assert_eq!(snapshot.count("shares"), 0.0);
    }

    #[test]
    fn test_new_record_builder() {
        let record = NewRecord::new("a1", "article", "en")
            .with_url("https://example.com/a1")
            .unpublished();
        assert_eq!(record.public_url.as_deref(), Some("https://example.com/a1"));
        assert!(!record.published);
    }
}
