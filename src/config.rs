//! Configuration management for the ensemble serving pipeline

use crate::types::report::{DriftCutPoints, ValidationThresholds};
use anyhow::{Context, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// What the prediction logger does when its buffer is full
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Evict the oldest unwritten record - `log` never waits on the sink
    #[default]
    DropOldest,
    /// Write the record directly, bounded by `sync_write_timeout_ms`
    SyncFallback,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub validation: ValidationConfig,
    #[serde(default)]
    pub prediction_log: PredictionLogConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Request/reply subject for predictions
    pub predict_subject: String,
    /// Request/reply subject for reload (promotion) requests
    pub reload_subject: String,
    /// Request/reply subject for manual drift cycles
    pub drift_subject: String,
    /// Request/reply subject for active model info
    pub info_subject: String,
    /// Request/reply subject for listing stored versions
    pub versions_subject: String,
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Root directory of the filesystem artifact store
    pub artifact_dir: String,
    /// Version or alias loaded at startup
    #[serde(default = "default_initial_model")]
    pub initial_model: String,
    /// Per-component weights replacing the bundle's weights
    #[serde(default)]
    pub weight_overrides: HashMap<String, f64>,
}

fn default_initial_model() -> String {
    "production".to_string()
}

/// Validation gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub thresholds: ValidationThresholds,
    /// JSON-lines file of labeled rows
    pub sample_path: String,
    /// Validate the startup model too, refusing to start if it fails
    #[serde(default)]
    pub validate_initial: bool,
}

/// Prediction logger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PredictionLogConfig {
    /// JSON-lines file the records are appended to
    pub path: String,
    /// Buffered records before backpressure applies
    pub capacity: usize,
    /// Maximum records per sink write
    pub batch_size: usize,
    /// Idle wake-up interval of the drain task
    pub flush_interval_ms: u64,
    /// Retries after the first failed write of a batch
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub policy: BackpressurePolicy,
    /// Ceiling for a `sync_fallback` write
    pub sync_write_timeout_ms: u64,
}

impl Default for PredictionLogConfig {
    fn default() -> Self {
        Self {
            path: "logs/predictions.jsonl".to_string(),
            capacity: 10_000,
            batch_size: 256,
            flush_interval_ms: 100,
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            policy: BackpressurePolicy::DropOldest,
            sync_write_timeout_ms: 20,
        }
    }
}

/// Drift detector configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Minimum rows required in each window
    pub min_samples: usize,
    /// Histogram bins per feature
    pub bins: usize,
    /// Smoothing added to empty bin proportions
    pub epsilon: f64,
    pub cut_points: DriftCutPoints,
    /// Most recent logged predictions forming the comparison window
    pub comparison_window_size: usize,
    /// Scheduled cycle period, 0 disables the schedule
    pub interval_secs: u64,
    /// Directory receiving `drift_report_<timestamp>.json` files
    pub reports_dir: String,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            bins: 10,
            epsilon: 1e-4,
            cut_points: DriftCutPoints::default(),
            comparison_window_size: 5_000,
            interval_secs: 3_600,
            reports_dir: "reports".to_string(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrently handled requests
    pub workers: usize,
    /// Metrics summary period in seconds
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_report_interval() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                predict_subject: "serving.predict".to_string(),
                reload_subject: "serving.reload".to_string(),
                drift_subject: "serving.drift".to_string(),
                info_subject: "serving.model.info".to_string(),
                versions_subject: "serving.model.versions".to_string(),
            },
            models: ModelsConfig {
                artifact_dir: "models".to_string(),
                initial_model: default_initial_model(),
                weight_overrides: HashMap::new(),
            },
            validation: ValidationConfig {
                thresholds: ValidationThresholds::default(),
                sample_path: "data/validation.jsonl".to_string(),
                validate_initial: false,
            },
            prediction_log: PredictionLogConfig::default(),
            drift: DriftConfig::default(),
            pipeline: PipelineConfig {
                workers: 64,
                report_interval_secs: default_report_interval(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}
