//! Fitted model components and their scoring algorithms

use crate::error::{Result, ServingError};
use crate::feature_extractor::FeatureExtractor;
use crate::types::features::{FeatureSchema, FeatureVector};
use serde::{Deserialize, Serialize};

/// Algorithm family backing a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Linear,
    RandomForest,
    GradientBoosting,
}

/// A node of a fitted regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Go `left` when `input[feature] <= threshold`, otherwise `right`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Flat array representation of a regression tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn leaf(value: f64) -> Self {
        Self {
            nodes: vec![TreeNode::Leaf { value }],
        }
    }

    /// Walk the tree for one input row
    fn evaluate(&self, input: &[f64]) -> std::result::Result<f64, String> {
        let mut index = 0;

        // A well-formed tree reaches a leaf in fewer steps than it has nodes
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(index) {
                None => return Err(format!("node {} does not exist", index)),
                Some(TreeNode::Leaf { value }) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = input
                        .get(*feature)
                        .ok_or_else(|| format!("split reads missing feature {}", feature))?;
                    index = if *value <= *threshold { *left } else { *right };
                }
            }
        }

        Err("tree walk did not terminate".to_string())
    }

    /// Check node references against the input width
    fn check(&self, width: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= width {
                    return Err(format!(
                        "node {} splits on feature {} but schema has {} fields",
                        i, feature, width
                    ));
                }
                if *left >= self.nodes.len() || *right >= self.nodes.len() {
                    return Err(format!("node {} points outside the tree", i));
                }
            }
        }
        Ok(())
    }
}

/// Parameters of a linear regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

/// Parameters of a random forest regressor (mean of trees)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub trees: Vec<RegressionTree>,
}

/// Parameters of a gradient boosted regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

/// Decoded scoring function of one component
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
    Linear(LinearParams),
    RandomForest(ForestParams),
    GradientBoosting(BoostingParams),
}

impl Algorithm {
    /// Decode a serialized parameter blob for the given algorithm kind
    pub fn decode(kind: AlgorithmKind, parameters: &[u8]) -> Result<Self> {
        let algorithm = match kind {
            AlgorithmKind::Linear => Algorithm::Linear(serde_json::from_slice(parameters)?),
            AlgorithmKind::RandomForest => {
                Algorithm::RandomForest(serde_json::from_slice(parameters)?)
            }
            AlgorithmKind::GradientBoosting => {
                Algorithm::GradientBoosting(serde_json::from_slice(parameters)?)
            }
        };
        Ok(algorithm)
    }

    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::Linear(_) => AlgorithmKind::Linear,
            Algorithm::RandomForest(_) => AlgorithmKind::RandomForest,
            Algorithm::GradientBoosting(_) => AlgorithmKind::GradientBoosting,
        }
    }

    /// Score one dense input row
    pub fn evaluate(&self, input: &[f64]) -> std::result::Result<f64, String> {
        let score = match self {
            Algorithm::Linear(params) => {
                if params.coefficients.len() != input.len() {
                    return Err(format!(
                        "expected {} inputs, got {}",
                        params.coefficients.len(),
                        input.len()
                    ));
                }
                params.intercept
                    + params
                        .coefficients
                        .iter()
                        .zip(input)
                        .map(|(c, x)| c * x)
                        .sum::<f64>()
            }
            Algorithm::RandomForest(params) => {
                if params.trees.is_empty() {
                    return Err("forest has no trees".to_string());
                }
                let mut sum = 0.0;
                for tree in &params.trees {
                    sum += tree.evaluate(input)?;
                }
                sum / params.trees.len() as f64
            }
            Algorithm::GradientBoosting(params) => {
                let mut sum = 0.0;
                for tree in &params.trees {
                    sum += tree.evaluate(input)?;
                }
                params.base_score + params.learning_rate * sum
            }
        };

        if score.is_finite() {
            Ok(score)
        } else {
            Err(format!("produced non-finite score {}", score))
        }
    }

    /// Check the parameters are consistent with an input of `width` fields
    pub fn check(&self, width: usize) -> std::result::Result<(), String> {
        match self {
            Algorithm::Linear(params) => {
                if params.coefficients.len() != width {
                    return Err(format!(
                        "{} coefficients for {} schema fields",
                        params.coefficients.len(),
                        width
                    ));
                }
                Ok(())
            }
            Algorithm::RandomForest(params) => {
                if params.trees.is_empty() {
                    return Err("forest has no trees".to_string());
                }
                params.trees.iter().try_for_each(|t| t.check(width))
            }
            Algorithm::GradientBoosting(params) => {
                params.trees.iter().try_for_each(|t| t.check(width))
            }
        }
    }
}

/// One fitted scoring function plus the features it consumes
#[derive(Debug, Clone)]
pub struct ModelComponent {
    id: String,
    algorithm: Algorithm,
    extractor: FeatureExtractor,
}

impl ModelComponent {
    pub fn new(id: &str, algorithm: Algorithm, schema: FeatureSchema) -> Self {
        Self {
            id: id.to_string(),
            algorithm,
            extractor: FeatureExtractor::new(schema),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.extractor.schema()
    }

    /// Score a feature vector
    pub fn evaluate(&self, features: &FeatureVector) -> Result<f64> {
        let input = self.extractor.extract(features)?;
        self.algorithm
            .evaluate(&input)
            .map_err(|reason| ServingError::component(&self.id, reason))
    }

    /// Structural checks run before a model set may become active
    pub fn validate_structure(&self) -> Result<()> {
        self.schema().validate_structure().map_err(|e| {
            ServingError::IncompatibleSchema(format!("component '{}': {}", self.id, e))
        })?;

        self.algorithm
            .check(self.schema().len())
            .map_err(|reason| {
                ServingError::IncompatibleSchema(format!("component '{}': {}", self.id, reason))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::features::FeatureField;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureField::numeric("duration"),
            FeatureField::numeric("days_left"),
        ])
    }

    fn stump(feature: usize, threshold: f64, low: f64, high: f64) -> RegressionTree {
        RegressionTree {
            nodes: vec![
                TreeNode::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { value: low },
                TreeNode::Leaf { value: high },
            ],
        }
    }

    #[test]
    fn test_linear_evaluation() {
        let algorithm = Algorithm::Linear(LinearParams {
            intercept: 100.0,
            coefficients: vec![10.0, -2.0],
        });
        let component = ModelComponent::new("linear", algorithm, schema());

        let features = FeatureVector::new()
            .with("duration", 3.0)
            .with("days_left", 5.0);

        assert_eq!(component.evaluate(&features).unwrap(), 120.0);
    }

    #[test]
    fn test_forest_averages_trees() {
        let algorithm = Algorithm::RandomForest(ForestParams {
            trees: vec![stump(0, 2.0, 1000.0, 2000.0), stump(1, 10.0, 3000.0, 500.0)],
        });

        // duration 3 -> 2000, days_left 5 -> 3000
        assert_eq!(algorithm.evaluate(&[3.0, 5.0]).unwrap(), 2500.0);
    }

    #[test]
    fn test_boosting_sums_scaled_trees() {
        let algorithm = Algorithm::GradientBoosting(BoostingParams {
            base_score: 1500.0,
            learning_rate: 0.5,
            trees: vec![stump(0, 2.0, -200.0, 400.0), RegressionTree::leaf(100.0)],
        });

        assert_eq!(algorithm.evaluate(&[1.0, 0.0]).unwrap(), 1450.0);
        assert_eq!(algorithm.evaluate(&[3.0, 0.0]).unwrap(), 1750.0);
    }

    #[test]
    fn test_decode_parameters() {
        let blob = br#"{"trees": [{"nodes": [{"node": "leaf", "value": 7.5}]}]}"#;
        let algorithm = Algorithm::decode(AlgorithmKind::RandomForest, blob).unwrap();

        assert_eq!(algorithm.kind(), AlgorithmKind::RandomForest);
        assert_eq!(algorithm.evaluate(&[]).unwrap(), 7.5);
    }

    #[test]
    fn test_non_finite_score_is_component_error() {
        let algorithm = Algorithm::Linear(LinearParams {
            intercept: 0.0,
            coefficients: vec![f64::MAX, f64::MAX],
        });
        let component = ModelComponent::new("overflow", algorithm, schema());
        let features = FeatureVector::new()
            .with("duration", 10.0)
            .with("days_left", 10.0);

        let err = component.evaluate(&features).unwrap_err();
        assert!(matches!(err, ServingError::ComponentEvaluation { component, .. } if component == "overflow"));
    }

    #[test]
    fn test_structure_rejects_out_of_range_split() {
        let algorithm = Algorithm::RandomForest(ForestParams {
            trees: vec![stump(5, 1.0, 0.0, 1.0)],
        });
        let component = ModelComponent::new("rf", algorithm, schema());

        assert!(matches!(
            component.validate_structure(),
            Err(ServingError::IncompatibleSchema(_))
        ));
    }

    #[test]
    fn test_cyclic_tree_fails_evaluation() {
        let tree = RegressionTree {
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(tree.check(1).is_ok());
        assert!(tree.evaluate(&[0.5]).is_err());
    }
}
