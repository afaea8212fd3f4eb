//! Validation gate for model set candidates.
//!
//! A candidate runs over a labeled sample and is accepted only when every
//! accuracy threshold holds. The gate is a pure evaluation: it never swaps
//! anything itself.

use crate::error::{Result, ServingError};
use crate::models::model_set::ModelSet;
use crate::types::features::FeatureVector;
use crate::types::report::{ValidationResult, ValidationThresholds};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// One labeled evaluation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    pub features: FeatureVector,
    pub target: f64,
}

/// Labeled evaluation sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledSample {
    rows: Vec<LabeledRow>,
}

impl LabeledSample {
    pub fn new(rows: Vec<LabeledRow>) -> Self {
        Self { rows }
    }

    /// Load a JSON-lines file of `{"features": {...}, "target": n}` rows
    pub fn load_jsonl<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut rows = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row: LabeledRow = serde_json::from_str(line).map_err(|e| {
                ServingError::InsufficientData(format!(
                    "{}:{}: invalid labeled row: {}",
                    path.as_ref().display(),
                    line_no + 1,
                    e
                ))
            })?;
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[LabeledRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Regression error metrics over a sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionMetrics {
    pub r_squared: f64,
    pub rmse: f64,
    pub mae: f64,
    /// `None` when every true value is zero
    pub mape: Option<f64>,
}

impl RegressionMetrics {
    /// Compute metrics from (prediction, truth) pairs. `pairs` must be non-empty.
    pub fn compute(pairs: &[(f64, f64)]) -> Self {
        let n = pairs.len() as f64;
        let mean_truth = pairs.iter().map(|(_, t)| t).sum::<f64>() / n;

        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        let mut abs_sum = 0.0;
        let mut pct_sum = 0.0;
        let mut pct_rows = 0usize;

        for (predicted, truth) in pairs {
            let error = truth - predicted;
            ss_res += error * error;
            ss_tot += (truth - mean_truth).powi(2);
            abs_sum += error.abs();
            if *truth != 0.0 {
                pct_sum += error.abs() / truth.abs();
                pct_rows += 1;
            }
        }

        // Constant targets: perfect fit scores 1, anything else 0
        let r_squared = if ss_tot == 0.0 {
            if ss_res == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - ss_res / ss_tot
        };

        Self {
            r_squared,
            rmse: (ss_res / n).sqrt(),
            mae: abs_sum / n,
            mape: (pct_rows > 0).then(|| pct_sum / pct_rows as f64),
        }
    }
}

/// Accepts or rejects candidates against configured thresholds
#[derive(Debug, Clone)]
pub struct ValidationGate {
    thresholds: ValidationThresholds,
}

impl ValidationGate {
    pub fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ValidationThresholds {
        &self.thresholds
    }

    /// Validate a candidate with this gate's thresholds
    pub fn check(&self, candidate: &ModelSet, sample: &LabeledSample) -> Result<ValidationResult> {
        validate(candidate, sample, &self.thresholds)
    }
}

/// Run `candidate` over every sample row and compare metrics with thresholds.
///
/// Fails with `InsufficientData` on an empty sample. A row the candidate
/// cannot score fails the whole run with that row's error.
pub fn validate(
    candidate: &ModelSet,
    sample: &LabeledSample,
    thresholds: &ValidationThresholds,
) -> Result<ValidationResult> {
    if sample.is_empty() {
        return Err(ServingError::InsufficientData(
            "validation sample is empty".to_string(),
        ));
    }

    let predictor = candidate.predictor();
    let mut pairs = Vec::with_capacity(sample.len());
    for row in sample.rows() {
        pairs.push((predictor.predict(&row.features)?, row.target));
    }

    let computed = RegressionMetrics::compute(&pairs);
    let mut failure_reasons = Vec::new();

    if computed.r_squared < thresholds.min_r_squared {
        failure_reasons.push(format!(
            "R² {:.4} below threshold {}",
            computed.r_squared, thresholds.min_r_squared
        ));
    }
    if computed.rmse > thresholds.max_rmse {
        failure_reasons.push(format!(
            "RMSE {:.4} above threshold {}",
            computed.rmse, thresholds.max_rmse
        ));
    }
    match computed.mape {
        Some(mape) if mape > thresholds.max_mape => failure_reasons.push(format!(
            "MAPE {:.2}% above threshold {:.2}%",
            mape * 100.0,
            thresholds.max_mape * 100.0
        )),
        Some(_) => {}
        None => warn!(
            version = %candidate.version(),
            "MAPE undefined for an all-zero sample, skipping that check"
        ),
    }

    let mut metrics = BTreeMap::new();
    metrics.insert("r_squared".to_string(), computed.r_squared);
    metrics.insert("rmse".to_string(), computed.rmse);
    metrics.insert("mae".to_string(), computed.mae);
    if let Some(mape) = computed.mape {
        metrics.insert("mape".to_string(), mape);
    }

    let passed = failure_reasons.is_empty();
    if passed {
        info!(
            version = %candidate.version(),
            r_squared = computed.r_squared,
            rmse = computed.rmse,
            mape = ?computed.mape,
            "Candidate passes all validation checks"
        );
    } else {
        warn!(
            version = %candidate.version(),
            reasons = ?failure_reasons,
            "Candidate failed validation"
        );
    }

    Ok(ValidationResult {
        metrics,
        thresholds: *thresholds,
        passed,
        failure_reasons,
        sample_size: sample.len(),
        validated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::loader::tests::sample_bundle;
    use crate::models::loader::ModelLoader;

    /// Predicts 3 * duration
    fn candidate() -> ModelSet {
        ModelLoader::new().build(sample_bundle("5", 2.0, 4.0)).unwrap()
    }

    fn row(duration: f64, target: f64) -> LabeledRow {
        LabeledRow {
            features: FeatureVector::new().with("duration", duration),
            target,
        }
    }

    fn loose() -> ValidationThresholds {
        ValidationThresholds {
            min_r_squared: 0.5,
            max_rmse: 10.0,
            max_mape: 0.2,
        }
    }

    #[test]
    fn test_perfect_predictions_pass() {
        let sample = LabeledSample::new(vec![row(1.0, 3.0), row(2.0, 6.0), row(5.0, 15.0)]);

        let result = validate(&candidate(), &sample, &loose()).unwrap();

        assert!(result.passed);
        assert!(result.failure_reasons.is_empty());
        assert_eq!(result.metric("r_squared"), Some(1.0));
        assert_eq!(result.metric("rmse"), Some(0.0));
        assert_eq!(result.metric("mape"), Some(0.0));
        assert_eq!(result.sample_size, 3);
    }

    #[test]
    fn test_empty_sample_is_insufficient() {
        let result = validate(&candidate(), &LabeledSample::default(), &loose());
        assert!(matches!(result, Err(ServingError::InsufficientData(_))));
    }

    #[test]
    fn test_each_unmet_threshold_reported() {
        // Predictions 3, 6, 9 against truths 10, 2, 20
        let sample = LabeledSample::new(vec![row(1.0, 10.0), row(2.0, 2.0), row(3.0, 20.0)]);
        let strict = ValidationThresholds {
            min_r_squared: 0.9,
            max_rmse: 1.0,
            max_mape: 0.05,
        };

        let result = validate(&candidate(), &sample, &strict).unwrap();

        assert!(!result.passed);
        assert_eq!(result.failure_reasons.len(), 3);
        assert!(result.failure_reasons[0].starts_with("R²"));
        assert!(result.failure_reasons[1].starts_with("RMSE"));
        assert!(result.failure_reasons[2].starts_with("MAPE"));
    }

    #[test]
    fn test_zero_targets_excluded_from_mape() {
        // Row 0: prediction 0, truth 0. Row 1: prediction 6, truth 5.
        let pairs = [(0.0, 0.0), (6.0, 5.0)];
        let metrics = RegressionMetrics::compute(&pairs);

        assert!((metrics.mape.unwrap() - 0.2).abs() < 1e-12);
        // The zero row still counts towards RMSE
        assert!((metrics.rmse - (0.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_fit_on_zero_targets_passes() {
        let sample = LabeledSample::new(vec![row(0.0, 0.0), row(0.0, 0.0)]);
        let result = validate(&candidate(), &sample, &loose()).unwrap();

        assert!(result.passed);
        assert!(result.failure_reasons.is_empty());
        assert!(result.metric("mape").is_none());
        assert_eq!(result.metric("r_squared"), Some(1.0));
    }

    #[test]
    fn test_zero_targets_still_checked_against_rmse() {
        // 3 * duration misses the zero targets by 30
        let sample = LabeledSample::new(vec![row(10.0, 0.0), row(10.0, 0.0)]);
        let result = validate(&candidate(), &sample, &loose()).unwrap();

        assert!(!result.passed);
        assert!(result.metric("mape").is_none());
        assert!(result.failure_reasons.iter().any(|r| r.starts_with("RMSE")));
        assert!(!result.failure_reasons.iter().any(|r| r.contains("MAPE")));
    }

    #[test]
    fn test_schema_mismatch_propagates() {
        let sample = LabeledSample::new(vec![LabeledRow {
            features: FeatureVector::new().with("distance", 1.0),
            target: 1.0,
        }]);
        let err = validate(&candidate(), &sample, &loose()).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }

    #[test]
    fn test_load_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holdout.jsonl");
        std::fs::write(
            &path,
            "{\"features\": {\"duration\": 1.0}, \"target\": 3.0}\n\n{\"features\": {\"duration\": 2.0}, \"target\": 6.0}\n",
        )
        .unwrap();

        let sample = LabeledSample::load_jsonl(&path).unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sample.rows()[1].target, 6.0);
    }
}
