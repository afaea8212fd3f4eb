//! Ensemble weights and score aggregation

use crate::error::{Result, ServingError};
use std::collections::HashMap;

/// Tolerance on the sum of weights
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Per-component combination weights.
///
/// Weights are non-negative and sum to 1.0 within [`WEIGHT_SUM_TOLERANCE`];
/// anything else is rejected at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleWeights {
    weights: Vec<(String, f64)>,
}

impl EnsembleWeights {
    /// Create weights from (component id, weight) pairs.
    pub fn new(weights: Vec<(String, f64)>) -> Result<Self> {
        if weights.is_empty() {
            return Err(ServingError::InvalidWeights("no weights given".to_string()));
        }

        let mut total = 0.0;
        for (i, (id, weight)) in weights.iter().enumerate() {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ServingError::InvalidWeights(format!(
                    "weight for '{}' must be a non-negative number, got {}",
                    id, weight
                )));
            }
            if weights[..i].iter().any(|(other, _)| other == id) {
                return Err(ServingError::InvalidWeights(format!(
                    "duplicate weight for '{}'",
                    id
                )));
            }
            total += weight;
        }

        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ServingError::InvalidWeights(format!(
                "weights sum to {} instead of 1.0",
                total
            )));
        }

        Ok(Self { weights })
    }

    /// Create equal weights for the given components.
    pub fn equal(ids: &[&str]) -> Result<Self> {
        if ids.is_empty() {
            return Err(ServingError::InvalidWeights("no components".to_string()));
        }
        let weight = 1.0 / ids.len() as f64;
        Self::new(ids.iter().map(|id| (id.to_string(), weight)).collect())
    }

    /// Replace weights with operator-supplied overrides.
    ///
    /// The overrides must cover exactly the same components and obey the
    /// same sum rule.
    pub fn with_overrides(&self, overrides: &HashMap<String, f64>) -> Result<Self> {
        if overrides.len() != self.weights.len()
            || self.weights.iter().any(|(id, _)| !overrides.contains_key(id))
        {
            return Err(ServingError::InvalidWeights(
                "weight overrides must name exactly the bundle's components".to_string(),
            ));
        }
        Self::new(
            self.weights
                .iter()
                .map(|(id, _)| (id.clone(), overrides[id]))
                .collect(),
        )
    }

    /// Get the weight for a component.
    pub fn weight(&self, id: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, w)| *w)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.weights.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(id, w)| (id.as_str(), *w))
    }

    /// Weighted sum of component scores.
    ///
    /// Every score must belong to a weighted component.
    pub fn aggregate(&self, scores: &[(String, f64)]) -> Result<f64> {
        let mut total = 0.0;
        for (id, score) in scores {
            let weight = self.weight(id).ok_or_else(|| {
                ServingError::IncompatibleSchema(format!("no weight for component '{}'", id))
            })?;
            total += weight * score;
        }
        Ok(total)
    }
}

/// Spread of component scores around their mean (population std dev)
pub fn score_spread(scores: &[(String, f64)]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().map(|(_, s)| s).sum::<f64>() / n;
    let variance = scores.iter().map(|(_, s)| (s - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(values: &[(&str, f64)]) -> Vec<(String, f64)> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_weighted_aggregation() {
        let weights = EnsembleWeights::new(pairs(&[
            ("random_forest", 0.35),
            ("xgboost", 0.40),
            ("lightgbm", 0.25),
        ]))
        .unwrap();

        let scores = pairs(&[
            ("random_forest", 100.0),
            ("xgboost", 200.0),
            ("lightgbm", 300.0),
        ]);

        let combined = weights.aggregate(&scores).unwrap();

        // 0.35*100 + 0.40*200 + 0.25*300 = 190
        assert!((combined - 190.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let result = EnsembleWeights::new(pairs(&[("a", 0.5), ("b", 0.5), ("c", 0.5)]));
        assert!(matches!(result, Err(ServingError::InvalidWeights(_))));

        let within_tolerance =
            EnsembleWeights::new(pairs(&[("a", 0.5), ("b", 0.5000004)]));
        assert!(within_tolerance.is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let result = EnsembleWeights::new(pairs(&[("a", 1.5), ("b", -0.5)]));
        assert!(result.is_err());
    }

    #[test]
    fn test_equal_weights() {
        let weights = EnsembleWeights::equal(&["model1", "model2"]).unwrap();
        let combined = weights
            .aggregate(&pairs(&[("model1", 0.8), ("model2", 0.6)]))
            .unwrap();

        assert!((combined - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_overrides_must_cover_components() {
        let weights = EnsembleWeights::equal(&["rf", "gbm"]).unwrap();

        let mut overrides = HashMap::new();
        overrides.insert("rf".to_string(), 0.7);
        overrides.insert("gbm".to_string(), 0.3);
        let replaced = weights.with_overrides(&overrides).unwrap();
        assert_eq!(replaced.weight("rf"), Some(0.7));

        overrides.remove("gbm");
        assert!(weights.with_overrides(&overrides).is_err());
    }

    #[test]
    fn test_score_spread() {
        assert_eq!(score_spread(&pairs(&[("a", 5.0)])), 0.0);
        let spread = score_spread(&pairs(&[("a", 1.0), ("b", 3.0)]));
        assert!((spread - 1.0).abs() < 1e-9);
    }
}
