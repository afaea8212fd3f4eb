//! Prediction request, response and log record structures

use crate::error::ServingError;
use crate::types::features::FeatureVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Incoming prediction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Caller-supplied request identifier; generated when absent
    #[serde(default)]
    pub request_id: Option<String>,

    /// Feature values keyed by name
    pub features: FeatureVector,
}

/// Successful prediction returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub request_id: String,
    pub predicted_value: f64,
    pub model_version: String,
}

/// Structured error returned to callers in place of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Stable error kind, e.g. `schema_mismatch`
    pub kind: String,
    pub message: String,
    /// True when the request itself was at fault
    pub client_error: bool,
}

impl From<&ServingError> for ErrorReply {
    fn from(err: &ServingError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            client_error: err.is_client_error(),
        }
    }
}

/// One served prediction, written once to the prediction sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub request_id: String,
    pub features: FeatureVector,
    pub predicted_value: f64,
    pub model_version: String,
    pub served_at: DateTime<Utc>,
    /// Time spent evaluating the ensemble, in microseconds
    #[serde(default)]
    pub latency_us: u64,
}

impl PredictionRecord {
    /// Create a record stamped with the current time
    pub fn new(
        request_id: String,
        features: FeatureVector,
        predicted_value: f64,
        model_version: String,
    ) -> Self {
        Self {
            request_id,
            features,
            predicted_value,
            model_version,
            served_at: Utc::now(),
            latency_us: 0,
        }
    }

    /// Attach the measured evaluation latency
    pub fn with_latency_us(mut self, latency_us: u64) -> Self {
        self.latency_us = latency_us;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_id() {
        let request: PredictRequest =
            serde_json::from_str(r#"{"features": {"duration": 2.0}}"#).unwrap();
        assert!(request.request_id.is_none());
        assert_eq!(request.features.get("duration"), Some(2.0));
    }

    #[test]
    fn test_error_reply_from_error() {
        let err = ServingError::SchemaMismatch("missing required field 'duration'".into());
        let reply = ErrorReply::from(&err);

        assert_eq!(reply.kind, "schema_mismatch");
        assert!(reply.client_error);
        assert!(reply.message.contains("duration"));
    }

    #[test]
    fn test_record_serialization() {
        let record = PredictionRecord::new(
            "req-1".to_string(),
            FeatureVector::new().with("duration", 2.0),
            4200.0,
            "3".to_string(),
        )
        .with_latency_us(85);

        let json = serde_json::to_string(&record).unwrap();
        let restored: PredictionRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.request_id, "req-1");
        assert_eq!(restored.model_version, "3");
        assert_eq!(restored.latency_us, 85);
    }
}
