//! Immutable, versioned bundle of an ensemble predictor

use crate::error::{Result, ServingError};
use crate::models::component::AlgorithmKind;
use crate::models::inference::EnsemblePredictor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The unit of atomic hot reload.
///
/// Never mutated after construction; readers share it through `Arc`.
#[derive(Debug)]
pub struct ModelSet {
    version: String,
    alias: Option<String>,
    predictor: EnsemblePredictor,
    loaded_at: DateTime<Utc>,
}

/// Serializable summary of a model set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_version: String,
    pub model_alias: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub components: Vec<ComponentInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub id: String,
    pub kind: AlgorithmKind,
    pub weight: f64,
}

impl ModelSet {
    pub fn new(version: &str, predictor: EnsemblePredictor) -> Self {
        Self {
            version: version.to_string(),
            alias: None,
            predictor,
            loaded_at: Utc::now(),
        }
    }

    /// Record the alias the set was resolved from
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn predictor(&self) -> &EnsemblePredictor {
        &self.predictor
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Checks that must pass before the set may become active
    pub fn validate_structure(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(ServingError::IncompatibleSchema(
                "model set has an empty version".to_string(),
            ));
        }
        self.predictor.validate_structure()
    }

    pub fn info(&self) -> ModelInfo {
        let weights = self.predictor.weights();
        ModelInfo {
            model_version: self.version.clone(),
            model_alias: self.alias.clone(),
            loaded_at: self.loaded_at,
            components: self
                .predictor
                .components()
                .iter()
                .map(|c| ComponentInfo {
                    id: c.id().to_string(),
                    kind: c.kind(),
                    weight: weights.weight(c.id()).unwrap_or(0.0),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inference::tests::three_model_predictor;

    #[test]
    fn test_info_lists_components() {
        let set = ModelSet::new("7", three_model_predictor()).with_alias(Some("production".into()));
        let info = set.info();

        assert_eq!(info.model_version, "7");
        assert_eq!(info.model_alias.as_deref(), Some("production"));
        assert_eq!(info.components.len(), 3);
        assert_eq!(info.components[0].id, "random_forest");
        assert_eq!(info.components[0].weight, 0.35);
    }

    #[test]
    fn test_empty_version_rejected() {
        let set = ModelSet::new(" ", three_model_predictor());
        assert!(matches!(
            set.validate_structure(),
            Err(ServingError::IncompatibleSchema(_))
        ));
    }
}
