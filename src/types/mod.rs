//! Type definitions for the serving pipeline

pub mod features;
pub mod record;
pub mod report;

pub use features::{FeatureField, FeatureSchema, FeatureType, FeatureVector};
pub use record::{ErrorReply, PredictRequest, PredictionRecord, PredictionResponse};
pub use report::{
    DriftCutPoints, DriftFlag, DriftReport, ValidationResult, ValidationThresholds,
};
