//! Feature extraction for component model inference.
//!
//! Each model component consumes a subset of the request's features in the
//! exact order it was trained on. The extractor turns a named feature vector
//! into that dense, ordered input.

use crate::error::{Result, ServingError};
use crate::types::features::{FeatureSchema, FeatureVector};

/// Feature extractor that transforms named features into model input order.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    schema: FeatureSchema,
}

impl FeatureExtractor {
    /// Create an extractor for a component's declared schema.
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    /// Extract features in schema order.
    ///
    /// Only fields declared by the schema are read; extra fields in the
    /// vector are ignored here because the model set schema has already
    /// rejected anything unknown.
    pub fn extract(&self, features: &FeatureVector) -> Result<Vec<f64>> {
        let mut dense = Vec::with_capacity(self.schema.len());

        for field in self.schema.fields() {
            let value = features.get(&field.name).ok_or_else(|| {
                ServingError::SchemaMismatch(format!("missing required field '{}'", field.name))
            })?;

            if !field.kind.accepts(value) {
                return Err(ServingError::SchemaMismatch(format!(
                    "field '{}' expects a {:?} value, got {}",
                    field.name, field.kind, value
                )));
            }

            dense.push(value);
        }

        Ok(dense)
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        self.schema.len()
    }

    /// Get feature names in extraction order.
    pub fn feature_names(&self) -> Vec<&str> {
        self.schema.names().collect()
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::features::FeatureField;

    #[test]
    fn test_feature_extraction_order() {
        let extractor = FeatureExtractor::new(FeatureSchema::new(vec![
            FeatureField::numeric("days_left"),
            FeatureField::numeric("duration"),
        ]));

        let features = FeatureVector::new()
            .with("duration", 2.5)
            .with("cabin_class", 1.0)
            .with("days_left", 14.0);

        let dense = extractor.extract(&features).unwrap();

        assert_eq!(dense, vec![14.0, 2.5]);
        assert_eq!(extractor.feature_count(), 2);
        assert_eq!(extractor.feature_names(), vec!["days_left", "duration"]);
    }

    #[test]
    fn test_missing_feature() {
        let extractor =
            FeatureExtractor::new(FeatureSchema::new(vec![FeatureField::numeric("duration")]));

        let err = extractor.extract(&FeatureVector::new()).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }
}
