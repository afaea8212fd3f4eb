//! Serving metrics and statistics tracking.

use crate::models::aggregator::score_spread;
use crate::prediction_log::logger::PredictionLogger;
use crate::types::report::DriftReport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the serving pipeline
pub struct ServingMetrics {
    /// Total predictions served
    pub predictions_served: AtomicU64,
    /// Total failed prediction requests
    pub prediction_errors: AtomicU64,
    /// Successful model set swaps
    pub swaps: AtomicU64,
    /// Candidates rejected at promotion
    pub promotions_rejected: AtomicU64,
    errors_by_kind: RwLock<HashMap<String, u64>>,
    predictions_by_version: RwLock<HashMap<String, u64>>,
    /// Evaluation latencies (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Population std dev of component scores per prediction
    component_spreads: RwLock<Vec<f64>>,
    /// Drift cycle outcomes by overall flag
    drift_flags: RwLock<HashMap<String, u64>>,
    start_time: Instant,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            prediction_errors: AtomicU64::new(0),
            swaps: AtomicU64::new(0),
            promotions_rejected: AtomicU64::new(0),
            errors_by_kind: RwLock::new(HashMap::new()),
            predictions_by_version: RwLock::new(HashMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            component_spreads: RwLock::new(Vec::with_capacity(1000)),
            drift_flags: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a served prediction
    pub fn record_prediction(
        &self,
        latency: Duration,
        model_version: &str,
        component_scores: &[(String, f64)],
    ) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.latencies.write() {
            times.push(latency.as_micros() as u64);
            // Keep only the last 10000
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        if let Ok(mut by_version) = self.predictions_by_version.write() {
            *by_version.entry(model_version.to_string()).or_insert(0) += 1;
        }

        if component_scores.len() >= 2 {
            if let Ok(mut spreads) = self.component_spreads.write() {
                spreads.push(score_spread(component_scores));
                if spreads.len() > 1000 {
                    spreads.drain(0..500);
                }
            }
        }
    }

    /// Record a failed request by error kind
    pub fn record_error(&self, kind: &str) {
        self.prediction_errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.errors_by_kind.write() {
            *by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_swap(&self) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_promotion(&self) {
        self.promotions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drift(&self, report: &DriftReport) {
        if let Ok(mut flags) = self.drift_flags.write() {
            *flags.entry(format!("{:?}", report.overall_flag).to_lowercase()).or_insert(0) += 1;
        }
    }

    /// Get latency statistics
    pub fn get_latency_stats(&self) -> LatencyStats {
        let times = self.latencies.read().unwrap_or_else(PoisonError::into_inner);
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Average component score spread, 0 when nothing was recorded
    pub fn get_avg_spread(&self) -> f64 {
        let spreads = self
            .component_spreads
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if spreads.is_empty() {
            return 0.0;
        }
        spreads.iter().sum::<f64>() / spreads.len() as f64
    }

    /// Current throughput (predictions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_errors_by_kind(&self) -> HashMap<String, u64> {
        self.errors_by_kind
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_predictions_by_version(&self) -> HashMap<String, u64> {
        self.predictions_by_version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_drift_flags(&self) -> HashMap<String, u64> {
        self.drift_flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Print summary statistics
    pub fn print_summary(&self, logger: Option<&PredictionLogger>) {
        let served = self.predictions_served.load(Ordering::Relaxed);
        let errors = self.prediction_errors.load(Ordering::Relaxed);
        let error_rate = if served + errors > 0 {
            (errors as f64 / (served + errors) as f64) * 100.0
        } else {
            0.0
        };
        let latency = self.get_latency_stats();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            ENSEMBLE SERVING - METRICS SUMMARY                ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions Served: {:>10}  │  Throughput: {:>7.1} req/s ║",
            served,
            self.get_throughput()
        );
        info!(
            "║ Errors:             {:>10}  │  Error Rate: {:>7.2}%     ║",
            errors, error_rate
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Latency (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}       ║",
            latency.mean_us, latency.p50_us, latency.p95_us, latency.p99_us
        );
        info!(
            "║ Component Score Spread (std dev): {:>10.3}                 ║",
            self.get_avg_spread()
        );
        info!(
            "║ Swaps: {:>6}  │  Rejected Promotions: {:>6}                 ║",
            self.swaps.load(Ordering::Relaxed),
            self.promotions_rejected.load(Ordering::Relaxed)
        );

        let by_version = self.get_predictions_by_version();
        if !by_version.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Predictions by Model Version:                                ║");
            for (version, count) in &by_version {
                info!("║   v{:<10}: {:>8}                                       ║", version, count);
            }
        }

        let by_kind = self.get_errors_by_kind();
        if !by_kind.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Errors by Kind:                                              ║");
            for (kind, count) in &by_kind {
                info!("║   {:28}: {:>8}                         ║", kind, count);
            }
        }

        if let Some(logger) = logger {
            let stats = logger.stats();
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!(
                "║ Prediction Log: written={} pending={} dropped={} lost={} retries={}",
                stats.written, stats.pending, stats.dropped, stats.lost, stats.retries
            );
        }

        let drift = self.get_drift_flags();
        if !drift.is_empty() {
            info!("║ Drift Cycles: {:?}", drift);
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluation latency statistics
#[derive(Debug, Default)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints periodic metric summaries
pub struct MetricsReporter {
    metrics: Arc<ServingMetrics>,
    logger: Option<PredictionLogger>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServingMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            logger: None,
            interval_secs,
        }
    }

    /// Include prediction logger counters in each summary
    pub fn with_logger(mut self, logger: PredictionLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        loop {
            interval.tick().await;
            self.metrics.print_summary(self.logger.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServingMetrics::new();

        metrics.record_prediction(Duration::from_micros(100), "1", &[]);
        metrics.record_prediction(Duration::from_micros(300), "2", &[]);
        metrics.record_error("schema_mismatch");

        assert_eq!(metrics.predictions_served.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.prediction_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_errors_by_kind().get("schema_mismatch"), Some(&1));
        assert_eq!(metrics.get_predictions_by_version().get("2"), Some(&1));

        let latency = metrics.get_latency_stats();
        assert_eq!(latency.count, 2);
        assert_eq!(latency.mean_us, 200);
        assert_eq!(latency.max_us, 300);
    }

    #[test]
    fn test_component_spread() {
        let metrics = ServingMetrics::new();
        let scores = vec![("a".to_string(), 1.0), ("b".to_string(), 3.0)];
        metrics.record_prediction(Duration::from_micros(10), "1", &scores);

        assert!((metrics.get_avg_spread() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_latency_stats() {
        let metrics = ServingMetrics::new();
        assert_eq!(metrics.get_latency_stats().count, 0);
        assert_eq!(metrics.get_avg_spread(), 0.0);
    }
}
