//! Feature schema and feature vector types

use crate::error::{Result, ServingError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Name reserved for the model output in drift windows; no feature may use it
pub const RESERVED_PREDICTION_FIELD: &str = "prediction";

/// Declared type of a single input feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// Any finite real number
    Numeric,
    /// Category code, encoded as a non-negative whole number
    Categorical,
}

impl FeatureType {
    /// Whether `value` is acceptable for this type
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            FeatureType::Numeric => value.is_finite(),
            FeatureType::Categorical => value.is_finite() && value >= 0.0 && value.fract() == 0.0,
        }
    }
}

/// One named, typed field of a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FeatureType,
}

impl FeatureField {
    pub fn numeric(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FeatureType::Numeric,
        }
    }

    pub fn categorical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FeatureType::Categorical,
        }
    }
}

/// Ordered list of fields a model set or component expects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSchema {
    fields: Vec<FeatureField>,
}

impl FeatureSchema {
    pub fn new(fields: Vec<FeatureField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FeatureField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FeatureField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Check the schema itself is well formed: non-empty, unique names, none
    /// of them reserved.
    pub fn validate_structure(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(ServingError::IncompatibleSchema(
                "schema declares no fields".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(ServingError::IncompatibleSchema(
                    "schema contains an unnamed field".to_string(),
                ));
            }
            if field.name == RESERVED_PREDICTION_FIELD {
                return Err(ServingError::IncompatibleSchema(format!(
                    "field name '{}' is reserved for the model output",
                    RESERVED_PREDICTION_FIELD
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ServingError::IncompatibleSchema(format!(
                    "field '{}' declared more than once",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Check a feature vector against this schema.
    ///
    /// Every declared field must be present with a value of the declared
    /// type, and the vector may not carry fields the schema does not know.
    pub fn conform(&self, features: &FeatureVector) -> Result<()> {
        for field in &self.fields {
            match features.get(&field.name) {
                None => {
                    return Err(ServingError::SchemaMismatch(format!(
                        "missing required field '{}'",
                        field.name
                    )))
                }
                Some(value) if !field.kind.accepts(value) => {
                    return Err(ServingError::SchemaMismatch(format!(
                        "field '{}' expects a {:?} value, got {}",
                        field.name, field.kind, value
                    )))
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = features.names().find(|name| self.field(name).is_none()) {
            return Err(ServingError::SchemaMismatch(format!(
                "unknown field '{}'",
                unknown
            )));
        }

        Ok(())
    }
}

/// Ordered mapping from feature name to value.
///
/// On the wire this is a flat JSON object of numbers. Categorical values are
/// sent already encoded as whole numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct FeatureVector {
    values: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value, keeping first-insertion order
    pub fn insert(&mut self, name: &str, value: f64) {
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut vector = FeatureVector::new();
        for (name, value) in iter {
            vector.insert(&name, value);
        }
        vector
    }
}

impl TryFrom<Map<String, Value>> for FeatureVector {
    type Error = ServingError;

    fn try_from(map: Map<String, Value>) -> Result<Self> {
        let mut vector = FeatureVector::new();
        for (name, value) in map {
            let number = value.as_f64().ok_or_else(|| {
                ServingError::SchemaMismatch(format!(
                    "field '{}' must be a number, got {}",
                    name, value
                ))
            })?;
            vector.insert(&name, number);
        }
        Ok(vector)
    }
}

impl From<FeatureVector> for Map<String, Value> {
    fn from(vector: FeatureVector) -> Self {
        vector
            .values
            .into_iter()
            .map(|(name, value)| (name, Value::from(value)))
            .collect()
    }
}
