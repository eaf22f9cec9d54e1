//! Popularity score calculation
//!
//! Maps a provider's metric snapshot and a weight configuration to a single
//! number. Pure and deterministic: only metrics enabled in the weight
//! configuration contribute, whatever else the snapshot carries.

use std::collections::BTreeMap;

use crate::config::MetricSetting;
use crate::models::MetricSnapshot;

/// A metric a provider knows how to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricField {
    /// Name used in configuration (e.g. `shares`)
    pub key: &'static str,
    /// Counter name in the provider snapshot (e.g. `share_count`)
    pub field: &'static str,
}

/// Weight of one enabled metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricWeight {
    /// Configuration name of the metric
    pub key: String,
    /// Snapshot counter the weight applies to
    pub field: String,
    /// Multiplier
    pub weight: f64,
}

/// Resolved weights of one (record type, provider) pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightConfig {
    weights: Vec<MetricWeight>,
}

impl WeightConfig {
    /// Create a weight configuration from resolved weights
    pub fn new(weights: Vec<MetricWeight>) -> Self {
        Self { weights }
    }

    /// Resolve configured settings against a provider's metric catalog
    ///
    /// Keys the provider does not know are ignored, as are disabled ones.
    pub fn resolve(settings: &BTreeMap<String, MetricSetting>, catalog: &[MetricField]) -> Self {
        let weights = catalog
            .iter()
            .filter_map(|metric| {
                let weight = settings.get(metric.key)?.weight()?;
                Some(MetricWeight {
                    key: metric.key.to_string(),
                    field: metric.field.to_string(),
                    weight,
                })
            })
            .collect();

        Self { weights }
    }

    /// True when no metric is enabled
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Enabled metrics
    pub fn weights(&self) -> &[MetricWeight] {
        &self.weights
    }
}

/// Compute the score of a snapshot
///
/// Returns 0 when there is no snapshot.
pub fn score(snapshot: Option<&MetricSnapshot>, weights: &WeightConfig) -> f64 {
    let Some(snapshot) = snapshot else {
        return 0.0;
    };

    weights
        .weights
        .iter()
        .map(|w| w.weight * snapshot.count(&w.field))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightDescriptor;

    const CATALOG: &[MetricField] = &[
        MetricField {
            key: "likes",
            field: "likes",
        },
        MetricField {
            key: "shares",
            field: "share_count",
        },
    ];

    fn weighted(score: f64) -> MetricSetting {
        MetricSetting::Weighted(WeightDescriptor { score: Some(score) })
    }

    // Test 1: No snapshot scores zero
    #[test]
    fn test_missing_snapshot_scores_zero() {
        let settings = BTreeMap::from([("likes".to_string(), MetricSetting::Toggle(true))]);
        let weights = WeightConfig::resolve(&settings, CATALOG);
        assert_eq!(score(None, &weights), 0.0);
    }

    // Test 2: Weighted sum over enabled metrics with field name mapping
    #[test]
    fn test_weighted_sum() {
        let settings = BTreeMap::from([
            ("likes".to_string(), weighted(1.0)),
            ("shares".to_string(), weighted(2.0)),
        ]);
        let weights = WeightConfig::resolve(&settings, CATALOG);

        let snapshot = MetricSnapshot::default()
            .with_count("likes", 10.0)
            .with_count("share_count", 3.0);

        assert_eq!(score(Some(&snapshot), &weights), 16.0);
    }

    // Test 3: Metrics absent from the weight configuration are ignored
    #[test]
    fn test_unconfigured_metrics_ignored() {
        let settings = BTreeMap::from([("likes".to_string(), MetricSetting::Toggle(true))]);
        let weights = WeightConfig::resolve(&settings, CATALOG);

        let snapshot = MetricSnapshot::default()
            .with_count("likes", 7.0)
            .with_count("share_count", 1000.0)
            .with_count("comment_count", 1000.0);

        assert_eq!(score(Some(&snapshot), &weights), 7.0);
    }

    // Test 4: Disabled and unknown keys do not resolve
    #[test]
    fn test_resolve_skips_disabled_and_unknown() {
        let settings = BTreeMap::from([
            ("likes".to_string(), MetricSetting::Toggle(false)),
            ("retweets".to_string(), MetricSetting::Toggle(true)),
        ]);
        let weights = WeightConfig::resolve(&settings, CATALOG);
        assert!(weights.is_empty());
    }

    // Test 5: Resolution keeps catalog order and maps fields
    #[test]
    fn test_resolve_maps_fields() {
        let settings = BTreeMap::from([
            ("shares".to_string(), weighted(0.5)),
            ("likes".to_string(), MetricSetting::Toggle(true)),
        ]);
        let weights = WeightConfig::resolve(&settings, CATALOG);

        assert_eq!(
            weights.weights(),
            &[
                MetricWeight {
                    key: "likes".to_string(),
                    field: "likes".to_string(),
                    weight: 1.0,
                },
                MetricWeight {
                    key: "shares".to_string(),
                    field: "share_count".to_string(),
                    weight: 0.5,
                },
            ]
        );
    }

    // Test 6: Scoring is deterministic
    #[test]
    fn test_score_is_deterministic() {
        let settings = BTreeMap::from([("shares".to_string(), weighted(1.5))]);
        let weights = WeightConfig::resolve(&settings, CATALOG);
        let snapshot = MetricSnapshot::default().with_count("share_count", 4.0);

        let first = score(Some(&snapshot), &weights);
        for _ in 0..10 {
            assert_eq!(score(Some(&snapshot), &weights), first);
        }
    }
}
