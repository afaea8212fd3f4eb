//! Ensemble Serving Library
//!
//! Serves predictions from a weighted ensemble of regression models, swaps
//! the active model set at runtime without disturbing in-flight requests,
//! gates promotions on held-out accuracy, and watches logged predictions for
//! distribution drift.

pub mod config;
pub mod consumer;
pub mod drift;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod prediction_log;
pub mod producer;
pub mod reload;
pub mod service;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use consumer::{Endpoint, RequestConsumer};
pub use error::{Result, ServingError};
pub use feature_extractor::FeatureExtractor;
pub use models::{EnsemblePredictor, ModelSet};
pub use producer::ReplyPublisher;
pub use reload::HotReloadManager;
pub use service::ServingService;
pub use types::{FeatureVector, PredictRequest, PredictionRecord, PredictionResponse};
