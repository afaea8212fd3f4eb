//! Serving service: the request paths tying the core components together.
//!
//! Prediction reads the active set once per request, scores, replies and
//! hands the record to the logger. Promotion fetches a candidate, validates
//! it, swaps it in and captures a fresh drift reference. The byte-level
//! handlers are what the NATS consumer calls; they never fail, errors are
//! encoded as [`ErrorReply`] payloads.

use crate::drift::detector::{DriftDetector, DriftState};
use crate::drift::window::FeatureWindow;
use crate::error::{Result, ServingError};
use crate::metrics::ServingMetrics;
use crate::models::loader::{ArtifactStore, ModelLoader, VersionMetadata};
use crate::models::model_set::ModelInfo;
use crate::prediction_log::logger::PredictionLogger;
use crate::reload::HotReloadManager;
use crate::types::record::{ErrorReply, PredictRequest, PredictionRecord, PredictionResponse};
use crate::types::report::{DriftReport, ValidationResult};
use crate::validation::{LabeledSample, ValidationGate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Promotion request: explicit version or alias
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadRequest {
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadStatus {
    Promoted,
    Rejected,
}

/// Outcome of a promotion attempt that reached the validation gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: ReloadStatus,
    pub previous_version: String,
    pub active_version: String,
    pub validation: ValidationResult,
}

/// Active model summary plus serving state
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    #[serde(flatten)]
    pub model: ModelInfo,
    pub swap_generation: u64,
    pub drift_state: DriftState,
}

pub struct ServingService {
    manager: Arc<HotReloadManager>,
    store: Arc<dyn ArtifactStore>,
    logger: PredictionLogger,
    drift: Arc<DriftDetector>,
    loader: ModelLoader,
    gate: ValidationGate,
    sample: Arc<LabeledSample>,
    metrics: Arc<ServingMetrics>,
    /// Serializes fetch, validate and swap
    promotion: tokio::sync::Mutex<()>,
}

impl ServingService {
    pub fn new(
        manager: Arc<HotReloadManager>,
        store: Arc<dyn ArtifactStore>,
        logger: PredictionLogger,
        drift: Arc<DriftDetector>,
    ) -> Self {
        Self {
            manager,
            store,
            logger,
            drift,
            loader: ModelLoader::new(),
            gate: ValidationGate::new(Default::default()),
            sample: Arc::new(LabeledSample::default()),
            metrics: Arc::new(ServingMetrics::new()),
            promotion: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_loader(mut self, loader: ModelLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Gate and labeled sample used for every promotion
    pub fn with_validation(mut self, gate: ValidationGate, sample: LabeledSample) -> Self {
        self.gate = gate;
        self.sample = Arc::new(sample);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ServingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn manager(&self) -> &Arc<HotReloadManager> {
        &self.manager
    }

    pub fn logger(&self) -> &PredictionLogger {
        &self.logger
    }

    pub fn drift(&self) -> &Arc<DriftDetector> {
        &self.drift
    }

    pub fn metrics(&self) -> &Arc<ServingMetrics> {
        &self.metrics
    }

    /// Score one request against the set active when the request starts
    pub async fn predict(&self, request: PredictRequest) -> Result<PredictionResponse> {
        let request_id = request
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let active = self.manager.get_active();

        let started = Instant::now();
        let prediction = match active.predictor().predict_detailed(&request.features) {
            Ok(prediction) => prediction,
            Err(e) => {
                self.metrics.record_error(e.kind());
                debug!(request_id = %request_id, error = %e, "Prediction failed");
                return Err(e);
            }
        };
        let latency = started.elapsed();

        self.metrics
            .record_prediction(latency, active.version(), &prediction.component_scores);

        let record = PredictionRecord::new(
            request_id.clone(),
            request.features,
            prediction.value,
            active.version().to_string(),
        )
        .with_latency_us(latency.as_micros() as u64);
        // Outcome is counted by the logger; serving never depends on it
        self.logger.log(record).await;

        Ok(PredictionResponse {
            request_id,
            predicted_value: prediction.value,
            model_version: active.version().to_string(),
        })
    }

    /// Fetch, validate and promote a candidate.
    ///
    /// A candidate failing the gate yields `ValidationRejected` carrying the
    /// full result; the active set is untouched.
    pub async fn reload(&self, version_or_alias: &str) -> Result<ReloadResponse> {
        let _promotion = self.promotion.lock().await;

        let candidate = self.loader.load(self.store.as_ref(), version_or_alias).await?;
        if let Err(e) = candidate.validate_structure() {
            self.metrics.record_rejected_promotion();
            return Err(e);
        }

        // The sample is operator-supplied, so a mismatch here is a promotion fault
        let validation = match self.gate.check(&candidate, &self.sample) {
            Ok(validation) => validation,
            Err(ServingError::SchemaMismatch(reason)) => {
                self.metrics.record_rejected_promotion();
                return Err(ServingError::IncompatibleSchema(format!(
                    "validation sample does not fit candidate {}: {}",
                    candidate.version(),
                    reason
                )));
            }
            Err(e) => return Err(e),
        };
        if !validation.passed {
            self.metrics.record_rejected_promotion();
            warn!(
                candidate = %candidate.version(),
                active = %self.manager.current_version(),
                reasons = ?validation.failure_reasons,
                "Promotion rejected"
            );
            return Err(ServingError::ValidationRejected(Box::new(validation)));
        }

        let reference =
            FeatureWindow::from_sample(candidate.version(), &self.sample, candidate.predictor())?;
        let previous = self.manager.swap(candidate)?;
        self.metrics.record_swap();
        self.drift.set_reference(reference);

        let active_version = self.manager.current_version();
        info!(
            previous = %previous.version(),
            active = %active_version,
            "Promotion complete"
        );

        Ok(ReloadResponse {
            status: ReloadStatus::Promoted,
            previous_version: previous.version().to_string(),
            active_version,
            validation,
        })
    }

    /// Capture a drift reference for the currently active set
    pub fn capture_reference(&self) -> Result<()> {
        if self.sample.is_empty() {
            return Err(ServingError::InsufficientData(
                "validation sample is empty".to_string(),
            ));
        }
        let active = self.manager.get_active();
        let reference = FeatureWindow::from_sample(active.version(), &self.sample, active.predictor())?;
        self.drift.set_reference(reference);
        Ok(())
    }

    /// Validate the active set against the configured gate
    pub fn validate_active(&self) -> Result<ValidationResult> {
        self.gate.check(&self.manager.get_active(), &self.sample)
    }

    pub fn model_status(&self) -> ModelStatus {
        ModelStatus {
            model: self.manager.get_active().info(),
            swap_generation: self.manager.generation(),
            drift_state: self.drift.acknowledge(),
        }
    }

    pub async fn list_versions(&self) -> Result<Vec<VersionMetadata>> {
        self.store.list_versions().await
    }

    /// Run one drift cycle over the logged predictions
    pub async fn trigger_drift(&self) -> Result<DriftReport> {
        let sink = self.logger.sink();
        let report = self.drift.trigger(sink.as_ref()).await?;
        self.metrics.record_drift(&report);
        Ok(report)
    }

    /// Run drift cycles on a fixed period. Ticks missed while a cycle runs
    /// are skipped, not queued.
    pub fn spawn_drift_schedule(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                match self.trigger_drift().await {
                    Ok(_) => {}
                    Err(ServingError::CycleInProgress) => {
                        debug!("Scheduled drift cycle skipped, previous still running")
                    }
                    Err(e @ ServingError::InsufficientSamples { .. }) => {
                        info!(error = %e, "Scheduled drift cycle skipped")
                    }
                    Err(e) => warn!(error = %e, "Scheduled drift cycle failed"),
                }
            }
        })
    }

    pub async fn handle_predict(&self, payload: &[u8]) -> Vec<u8> {
        let request: PredictRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                let err = ServingError::SchemaMismatch(format!("invalid request: {}", e));
                self.metrics.record_error(err.kind());
                return encode_error(&err);
            }
        };
        encode(self.predict(request).await)
    }

    pub async fn handle_reload(&self, payload: &[u8]) -> Vec<u8> {
        let request: ReloadRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                return encode_error(&ServingError::InvalidRequest(format!(
                    "invalid reload request: {}",
                    e
                )))
            }
        };

        match self.reload(&request.model).await {
            Err(ServingError::ValidationRejected(validation)) => {
                let active_version = self.manager.current_version();
                encode(Ok(ReloadResponse {
                    status: ReloadStatus::Rejected,
                    previous_version: active_version.clone(),
                    active_version,
                    validation: *validation,
                }))
            }
            other => encode(other),
        }
    }

    pub async fn handle_drift(&self) -> Vec<u8> {
        encode(self.trigger_drift().await)
    }

    pub fn handle_info(&self) -> Vec<u8> {
        encode(Ok(self.model_status()))
    }

    pub async fn handle_versions(&self) -> Vec<u8> {
        encode(self.list_versions().await)
    }
}

fn encode<T: Serialize>(result: Result<T>) -> Vec<u8> {
    match result {
        Ok(value) => serde_json::to_vec(&value).unwrap_or_else(|e| {
            encode_error(&ServingError::Serialization(e))
        }),
        Err(e) => encode_error(&e),
    }
}

fn encode_error(err: &ServingError) -> Vec<u8> {
    serde_json::to_vec(&ErrorReply::from(err)).unwrap_or_else(|_| {
        br#"{"kind":"serialization_error","message":"unencodable error","client_error":false}"#
            .to_vec()
    })
}
