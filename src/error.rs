//! Error types for the ensemble serving pipeline.
//!
//! Every failure the core can surface is a variant of [`ServingError`]. Each
//! variant maps to a stable [`kind`](ServingError::kind) string that is safe to
//! put on the wire, and to a client/server classification used by the
//! prediction API.
//!
//! # Error Categories
//!
//! - **Request**: schema mismatches and malformed payloads from the caller
//! - **Model**: component evaluation failures inside a model set
//! - **Promotion**: invalid weights, structurally incompatible model sets,
//!   rejected candidates
//! - **Statistics**: too little data for validation or drift
//! - **Collaborators**: artifact store and sink failures

use crate::types::report::ValidationResult;
use std::io;
use thiserror::Error;

/// Main error type for serving operations.
#[derive(Error, Debug)]
pub enum ServingError {
    // Request errors
    #[error("Feature vector does not match schema: {0}")]
    SchemaMismatch(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Model errors
    #[error("Component '{component}' failed to evaluate: {reason}")]
    ComponentEvaluation { component: String, reason: String },

    // Promotion errors
    #[error("Invalid ensemble weights: {0}")]
    InvalidWeights(String),

    #[error("Incompatible model set schema: {0}")]
    IncompatibleSchema(String),

    #[error("Candidate rejected by validation gate: {}", .0.failure_reasons.join("; "))]
    ValidationRejected(Box<ValidationResult>),

    // Statistics errors
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Insufficient samples in {window} window: need {required}, have {actual}")]
    InsufficientSamples {
        window: String,
        required: usize,
        actual: usize,
    },

    #[error("Drift cycle already running")]
    CycleInProgress,

    // Collaborator errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServingError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServingError::SchemaMismatch(_) => "schema_mismatch",
            ServingError::InvalidRequest(_) => "invalid_request",
            ServingError::ComponentEvaluation { .. } => "component_evaluation_error",
            ServingError::InvalidWeights(_) => "invalid_weights",
            ServingError::IncompatibleSchema(_) => "incompatible_schema",
            ServingError::ValidationRejected(_) => "validation_rejected",
            ServingError::InsufficientData(_) => "insufficient_data",
            ServingError::InsufficientSamples { .. } => "insufficient_samples",
            ServingError::CycleInProgress => "cycle_in_progress",
            ServingError::ArtifactNotFound(_) => "artifact_not_found",
            ServingError::Artifact(_) => "artifact_error",
            ServingError::Sink(_) => "sink_error",
            ServingError::Io(_) => "io_error",
            ServingError::Serialization(_) => "serialization_error",
        }
    }

    /// True when the caller caused the failure and should fix the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServingError::SchemaMismatch(_)
                | ServingError::InvalidRequest(_)
                | ServingError::ArtifactNotFound(_)
        )
    }

    /// Convenience constructor for component failures.
    pub fn component(component: impl Into<String>, reason: impl Into<String>) -> Self {
        ServingError::ComponentEvaluation {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for serving operations.
pub type Result<T> = std::result::Result<T, ServingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(
            ServingError::SchemaMismatch("x".into()).kind(),
            "schema_mismatch"
        );
        assert_eq!(
            ServingError::component("rf", "boom").kind(),
            "component_evaluation_error"
        );
        assert_eq!(ServingError::CycleInProgress.kind(), "cycle_in_progress");
    }

    #[test]
    fn test_client_classification() {
        assert!(ServingError::SchemaMismatch("missing".into()).is_client_error());
        assert!(ServingError::InvalidRequest("eof".into()).is_client_error());
        assert!(!ServingError::component("gbm", "nan").is_client_error());
        assert!(!ServingError::IncompatibleSchema("count".into()).is_client_error());
    }

    #[test]
    fn test_insufficient_samples_message() {
        let err = ServingError::InsufficientSamples {
            window: "comparison".into(),
            required: 50,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient samples in comparison window: need 50, have 3"
        );
    }
}
