//! Column-oriented sample windows compared by the drift detector

use crate::error::Result;
use crate::models::inference::EnsemblePredictor;
use crate::types::features::{FeatureVector, RESERVED_PREDICTION_FIELD};
use crate::types::record::PredictionRecord;
use crate::validation::LabeledSample;
use chrono::Utc;
use std::collections::BTreeMap;

/// Column holding the served (or reference) prediction. Schemas may not
/// declare a feature with this name.
pub const PREDICTION_COLUMN: &str = RESERVED_PREDICTION_FIELD;

/// A set of rows stored per feature column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureWindow {
    id: String,
    model_version: Option<String>,
    columns: BTreeMap<String, Vec<f64>>,
    rows: usize,
}

impl FeatureWindow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Tag the window with the model version whose predictions it holds
    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    /// Append one row of features plus its prediction
    pub fn push_row(&mut self, features: &FeatureVector, prediction: f64) {
        for (name, value) in features.iter() {
            self.columns.entry(name.to_string()).or_default().push(value);
        }
        self.columns
            .entry(PREDICTION_COLUMN.to_string())
            .or_default()
            .push(prediction);
        self.rows += 1;
    }

    /// Reference window: the validation sample scored by the promoted predictor
    pub fn from_sample(
        version: &str,
        sample: &LabeledSample,
        predictor: &EnsemblePredictor,
    ) -> Result<Self> {
        let id = format!("reference-v{}-{}", version, Utc::now().format("%Y%m%dT%H%M%S"));
        let mut window = Self::new(id).with_model_version(version);
        for row in sample.rows() {
            let prediction = predictor.predict(&row.features)?;
            window.push_row(&row.features, prediction);
        }
        Ok(window)
    }

    /// Comparison window from logged predictions.
    ///
    /// With `model_version` set, only records served by that version are kept.
    pub fn from_records(records: &[PredictionRecord], model_version: Option<&str>) -> Self {
        let selected: Vec<&PredictionRecord> = records
            .iter()
            .filter(|r| model_version.map_or(true, |v| r.model_version == v))
            .collect();

        let id = match (selected.first(), selected.last()) {
            (Some(first), Some(last)) => format!(
                "live-{}-{}",
                first.served_at.format("%Y%m%dT%H%M%S"),
                last.served_at.format("%Y%m%dT%H%M%S")
            ),
            _ => "live-empty".to_string(),
        };

        let mut window = Self::new(id);
        if let Some(version) = model_version {
            window.model_version = Some(version.to_string());
        }
        for record in selected {
            window.push_row(&record.features, record.predicted_value);
        }
        window
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Column names in sorted order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::loader::tests::sample_bundle;
    use crate::models::loader::ModelLoader;
    use crate::validation::LabeledRow;

    fn record(version: &str, duration: f64) -> PredictionRecord {
        PredictionRecord::new(
            "req".to_string(),
            FeatureVector::new().with("duration", duration),
            duration * 2.0,
            version.to_string(),
        )
    }

    #[test]
    fn test_push_row_adds_prediction_column() {
        let mut window = FeatureWindow::new("w");
        window.push_row(&FeatureVector::new().with("a", 1.0).with("b", 2.0), 9.0);
        window.push_row(&FeatureVector::new().with("a", 3.0).with("b", 4.0), 8.0);

        assert_eq!(window.len(), 2);
        assert_eq!(window.column("a"), Some(&[1.0, 3.0][..]));
        assert_eq!(window.column(PREDICTION_COLUMN), Some(&[9.0, 8.0][..]));
        assert_eq!(
            window.column_names().collect::<Vec<_>>(),
            vec!["a", "b", "prediction"]
        );
    }

    #[test]
    fn test_from_records_filters_by_version() {
        let records = vec![record("1", 1.0), record("2", 2.0), record("1", 3.0)];

        let window = FeatureWindow::from_records(&records, Some("1"));
        assert_eq!(window.len(), 2);
        assert_eq!(window.column("duration"), Some(&[1.0, 3.0][..]));
        assert_eq!(window.model_version(), Some("1"));
        assert!(window.id().starts_with("live-"));

        assert_eq!(FeatureWindow::from_records(&records, None).len(), 3);
        assert!(FeatureWindow::from_records(&records, Some("9")).is_empty());
    }

    #[test]
    fn test_from_sample_scores_rows() {
        let set = ModelLoader::new().build(sample_bundle("4", 1.0, 3.0)).unwrap();
        let sample = LabeledSample::new(vec![
            LabeledRow {
                features: FeatureVector::new().with("duration", 1.0),
                target: 2.0,
            },
            LabeledRow {
                features: FeatureVector::new().with("duration", 5.0),
                target: 10.0,
            },
        ]);

        let window = FeatureWindow::from_sample("4", &sample, set.predictor()).unwrap();

        assert_eq!(window.model_version(), Some("4"));
        assert_eq!(window.column(PREDICTION_COLUMN), Some(&[2.0, 10.0][..]));
        assert!(window.id().starts_with("reference-v4-"));
    }
}
