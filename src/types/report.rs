//! Validation and drift report structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accuracy thresholds a candidate must meet before it may serve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub min_r_squared: f64,
    pub max_rmse: f64,
    /// Maximum mean absolute percentage error, as a fraction (0.15 = 15%)
    pub max_mape: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_r_squared: 0.85,
            max_rmse: 5000.0,
            max_mape: 0.15,
        }
    }
}

/// Outcome of one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Computed metrics keyed by name (`r_squared`, `rmse`, `mape`, `mae`)
    pub metrics: BTreeMap<String, f64>,
    pub thresholds: ValidationThresholds,
    pub passed: bool,
    /// One entry per unmet condition, in check order
    pub failure_reasons: Vec<String>,
    /// Number of labeled rows evaluated
    pub sample_size: usize,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Drift classification, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftFlag {
    Stable,
    Warning,
    Drift,
}

impl DriftFlag {
    /// Classify a distance statistic against the configured cut-points
    pub fn from_score(score: f64, cut_points: &DriftCutPoints) -> Self {
        if score >= cut_points.drift {
            DriftFlag::Drift
        } else if score >= cut_points.warning {
            DriftFlag::Warning
        } else {
            DriftFlag::Stable
        }
    }
}

/// Distance cut-points separating stable, warning and drift
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftCutPoints {
    pub warning: f64,
    pub drift: f64,
}

impl Default for DriftCutPoints {
    fn default() -> Self {
        // Conventional PSI bands
        Self {
            warning: 0.1,
            drift: 0.25,
        }
    }
}

/// Result of one drift detector cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub reference_window_id: String,
    pub comparison_window_id: String,
    /// Population stability index per feature
    pub per_feature_scores: BTreeMap<String, f64>,
    /// Classification per feature
    pub feature_flags: BTreeMap<String, DriftFlag>,
    /// Worst classification across all features
    pub overall_flag: DriftFlag,
    pub reference_samples: usize,
    pub comparison_samples: usize,
    pub generated_at: DateTime<Utc>,
}

impl DriftReport {
    /// Features classified as drifting
    pub fn drifted_features(&self) -> Vec<&str> {
        self.feature_flags
            .iter()
            .filter(|(_, flag)| **flag == DriftFlag::Drift)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
