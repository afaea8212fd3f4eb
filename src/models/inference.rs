//! Weighted ensemble inference engine

use crate::error::{Result, ServingError};
use crate::models::aggregator::EnsembleWeights;
use crate::models::component::ModelComponent;
use crate::types::features::{FeatureSchema, FeatureVector};
use std::collections::HashSet;
use tracing::{debug, error};

/// Result of one ensemble evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct EnsemblePrediction {
    /// Weighted sum of component scores
    pub value: f64,
    /// Raw score of every component, in component order
    pub component_scores: Vec<(String, f64)>,
}

/// Combines N fitted components into one prediction.
///
/// Evaluation is all-or-nothing: if any component fails the whole call fails,
/// there is no averaging over the components that happened to succeed.
#[derive(Debug, Clone)]
pub struct EnsemblePredictor {
    /// Full request schema: the union of every component's fields
    schema: FeatureSchema,
    components: Vec<ModelComponent>,
    weights: EnsembleWeights,
}

impl EnsemblePredictor {
    /// Assemble a predictor. Structure is checked by
    /// [`validate_structure`](Self::validate_structure), not here.
    pub fn new(
        schema: FeatureSchema,
        components: Vec<ModelComponent>,
        weights: EnsembleWeights,
    ) -> Self {
        Self {
            schema,
            components,
            weights,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn components(&self) -> &[ModelComponent] {
        &self.components
    }

    pub fn weights(&self) -> &EnsembleWeights {
        &self.weights
    }

    /// Get the number of components
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Get component ids in evaluation order
    pub fn component_ids(&self) -> Vec<String> {
        self.components.iter().map(|c| c.id().to_string()).collect()
    }

    /// Predict a single value
    pub fn predict(&self, features: &FeatureVector) -> Result<f64> {
        self.predict_detailed(features).map(|p| p.value)
    }

    /// Predict and keep every component's raw score
    pub fn predict_detailed(&self, features: &FeatureVector) -> Result<EnsemblePrediction> {
        self.schema.conform(features)?;

        let mut component_scores = Vec::with_capacity(self.components.len());
        for component in &self.components {
            match component.evaluate(features) {
                Ok(score) => component_scores.push((component.id().to_string(), score)),
                Err(e) => {
                    error!(
                        component = %component.id(),
                        kind = ?component.kind(),
                        error = %e,
                        "Component evaluation failed, aborting ensemble"
                    );
                    return Err(e);
                }
            }
        }

        let value = self.weights.aggregate(&component_scores)?;

        debug!(
            value = value,
            component_scores = ?component_scores,
            "Ensemble inference complete"
        );

        Ok(EnsemblePrediction {
            value,
            component_scores,
        })
    }

    /// Run inference on a batch of feature vectors
    pub fn predict_batch(&self, batch: &[FeatureVector]) -> Vec<Result<f64>> {
        batch.iter().map(|f| self.predict(f)).collect()
    }

    /// Check the assembled predictor is safe to serve.
    pub fn validate_structure(&self) -> Result<()> {
        self.schema.validate_structure()?;

        if self.components.is_empty() {
            return Err(ServingError::IncompatibleSchema(
                "ensemble has no components".to_string(),
            ));
        }

        if self.components.len() != self.weights.len() {
            return Err(ServingError::IncompatibleSchema(format!(
                "{} components but {} weights",
                self.components.len(),
                self.weights.len()
            )));
        }

        let mut ids = HashSet::with_capacity(self.components.len());
        for component in &self.components {
            if !ids.insert(component.id()) {
                return Err(ServingError::IncompatibleSchema(format!(
                    "component id '{}' used more than once",
                    component.id()
                )));
            }
        }

        if let Some(orphan) = self.weights.ids().find(|id| !ids.contains(id)) {
            return Err(ServingError::IncompatibleSchema(format!(
                "weight given for unknown component '{}'",
                orphan
            )));
        }

        for component in &self.components {
            component.validate_structure()?;

            for field in component.schema().fields() {
                match self.schema.field(&field.name) {
                    None => {
                        return Err(ServingError::IncompatibleSchema(format!(
                            "component '{}' reads '{}' which the model set schema does not declare",
                            component.id(),
                            field.name
                        )))
                    }
                    Some(declared) if declared.kind != field.kind => {
                        return Err(ServingError::IncompatibleSchema(format!(
                            "component '{}' reads '{}' as {:?} but the model set declares {:?}",
                            component.id(),
                            field.name,
                            field.kind,
                            declared.kind
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::component::{Algorithm, LinearParams};
    use crate::types::features::FeatureField;

    /// Component that always returns `value`, reading `duration`
    pub(crate) fn constant(id: &str, value: f64) -> ModelComponent {
        ModelComponent::new(
            id,
            Algorithm::Linear(LinearParams {
                intercept: value,
                coefficients: vec![0.0],
            }),
            FeatureSchema::new(vec![FeatureField::numeric("duration")]),
        )
    }

    pub(crate) fn request_schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureField::numeric("duration"),
            FeatureField::numeric("days_left"),
        ])
    }

    pub(crate) fn three_model_predictor() -> EnsemblePredictor {
        let weights = EnsembleWeights::new(vec![
            ("random_forest".to_string(), 0.35),
            ("xgboost".to_string(), 0.40),
            ("lightgbm".to_string(), 0.25),
        ])
        .unwrap();

        EnsemblePredictor::new(
            request_schema(),
            vec![
                constant("random_forest", 100.0),
                constant("xgboost", 200.0),
                constant("lightgbm", 300.0),
            ],
            weights,
        )
    }

    pub(crate) fn features() -> FeatureVector {
        FeatureVector::new()
            .with("duration", 2.5)
            .with("days_left", 7.0)
    }

    #[test]
    fn test_weighted_sum() {
        let predictor = three_model_predictor();
        predictor.validate_structure().unwrap();

        let prediction = predictor.predict_detailed(&features()).unwrap();

        assert!((prediction.value - 190.0).abs() < 1e-9);
        assert_eq!(prediction.component_scores.len(), 3);
        assert_eq!(prediction.component_scores[1], ("xgboost".to_string(), 200.0));
    }

    #[test]
    fn test_schema_mismatch() {
        let predictor = three_model_predictor();
        let missing = FeatureVector::new().with("duration", 2.5);

        let err = predictor.predict(&missing).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }

    #[test]
    fn test_component_failure_aborts_ensemble() {
        let weights = EnsembleWeights::equal(&["ok", "broken"]).unwrap();
        let broken = ModelComponent::new(
            "broken",
            Algorithm::Linear(LinearParams {
                intercept: 0.0,
                coefficients: vec![f64::MAX],
            }),
            FeatureSchema::new(vec![FeatureField::numeric("days_left")]),
        );
        let predictor =
            EnsemblePredictor::new(request_schema(), vec![constant("ok", 1.0), broken], weights);

        let err = predictor.predict(&features()).unwrap_err();
        assert!(matches!(err, ServingError::ComponentEvaluation { ref component, .. } if component == "broken"));
    }

    #[test]
    fn test_count_mismatch_is_incompatible() {
        let weights = EnsembleWeights::equal(&["a", "b"]).unwrap();
        let predictor = EnsemblePredictor::new(request_schema(), vec![constant("a", 1.0)], weights);

        assert!(matches!(
            predictor.validate_structure(),
            Err(ServingError::IncompatibleSchema(_))
        ));
    }

    #[test]
    fn test_component_field_outside_set_schema() {
        let weights = EnsembleWeights::equal(&["a"]).unwrap();
        let predictor = EnsemblePredictor::new(
            FeatureSchema::new(vec![FeatureField::numeric("days_left")]),
            vec![constant("a", 1.0)],
            weights,
        );

        assert!(matches!(
            predictor.validate_structure(),
            Err(ServingError::IncompatibleSchema(_))
        ));
    }

    #[test]
    fn test_predict_batch() {
        let predictor = three_model_predictor();
        let results = predictor.predict_batch(&[features(), FeatureVector::new()]);

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
