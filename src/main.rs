//! Ensemble Serving - Main Entry Point
//!
//! Loads the initial model set, then answers prediction, reload, drift and
//! model info requests arriving over NATS. Requests are handled in parallel,
//! bounded by the configured worker count.

use anyhow::{bail, Context, Result};
use ensemble_serving::{
    config::{AppConfig, LoggingConfig},
    consumer::RequestConsumer,
    drift::{DriftDetector, JsonDriftReportSink},
    metrics::{MetricsReporter, ServingMetrics},
    models::{ArtifactStore, FsArtifactStore, ModelLoader},
    prediction_log::{JsonlPredictionSink, PredictionLogger},
    producer::ReplyPublisher,
    reload::HotReloadManager,
    service::ServingService,
    validation::{LabeledSample, ValidationGate},
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("ensemble_serving={}", logging.level)))
        .context("Invalid log level")?;

    match logging.format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().pretty().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Ensemble Serving");

    // Load the initial model set
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.models.artifact_dir));
    let overrides = &config.models.weight_overrides;
    let loader = ModelLoader::with_weight_overrides((!overrides.is_empty()).then(|| overrides.clone()));
    let initial = loader
        .load(store.as_ref(), &config.models.initial_model)
        .await
        .with_context(|| format!("Failed to load initial model '{}'", config.models.initial_model))?;

    let sample = match LabeledSample::load_jsonl(&config.validation.sample_path) {
        Ok(sample) => {
            info!(rows = sample.len(), path = %config.validation.sample_path, "Validation sample loaded");
            sample
        }
        Err(e) => {
            warn!(
                path = %config.validation.sample_path,
                error = %e,
                "No validation sample, promotions will be rejected"
            );
            LabeledSample::default()
        }
    };
    let gate = ValidationGate::new(config.validation.thresholds);

    if config.validation.validate_initial {
        let result = gate.check(&initial, &sample)?;
        if !result.passed {
            bail!(
                "Initial model {} failed validation: {}",
                initial.version(),
                result.failure_reasons.join("; ")
            );
        }
    }

    let manager = Arc::new(HotReloadManager::new(initial)?);
    info!(
        version = %manager.current_version(),
        components = ?manager.get_active().predictor().component_ids(),
        "Serving model set"
    );

    // Prediction logging and drift detection
    let sink = Arc::new(JsonlPredictionSink::new(&config.prediction_log.path));
    let (logger, drain) = PredictionLogger::spawn(sink, config.prediction_log.clone());
    let drift = Arc::new(DriftDetector::new(
        config.drift.clone(),
        Arc::new(JsonDriftReportSink::new(&config.drift.reports_dir)),
    ));

    let metrics = Arc::new(ServingMetrics::new());
    let service = Arc::new(
        ServingService::new(manager, store, logger.clone(), drift)
            .with_loader(loader)
            .with_validation(gate, sample)
            .with_metrics(metrics.clone()),
    );

    if let Err(e) = service.capture_reference() {
        warn!(error = %e, "No drift reference for the initial model");
    }
    if config.drift.interval_secs > 0 {
        service
            .clone()
            .spawn_drift_schedule(Duration::from_secs(config.drift.interval_secs));
        info!(interval_secs = config.drift.interval_secs, "Drift schedule started");
    }

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.report_interval_secs)
        .with_logger(logger.clone());
    tokio::spawn(reporter.start());

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RequestConsumer::new(client.clone(), &config.nats);
    let publisher = ReplyPublisher::new(client);
    let mut requests = consumer.subscribe().await?;

    info!(
        workers = config.pipeline.workers,
        "Serving requests"
    );

    // Semaphore to limit concurrent handling
    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers.max(1)));

    loop {
        let (endpoint, message) = tokio::select! {
            next = requests.next() => match next {
                Some(request) => request,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        };

        let permit = semaphore.clone().acquire_owned().await?;
        let service = service.clone();
        let publisher = publisher.clone();

        tokio::spawn(async move {
            let reply = endpoint.handle(&service, &message.payload).await;
            if let Err(e) = publisher.reply(&message, reply).await {
                error!(subject = %message.subject, error = %e, "Failed to publish reply");
            }
            drop(permit);
        });
    }

    info!("Ensemble Serving shutting down...");
    logger.shutdown(drain).await;
    metrics.print_summary(Some(&logger));

    Ok(())
}
