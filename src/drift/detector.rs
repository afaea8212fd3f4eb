//! Drift detector cycle and state machine.
//!
//! States move `Idle -> Running -> {ReportReady | Failed} -> Idle`. A finished
//! state returns to `Idle` once it has been observed through
//! [`DriftDetector::acknowledge`]; a trigger may also start a new cycle
//! straight from a finished state.
//! Only one cycle runs at a time; a trigger arriving while one is running is
//! rejected with `CycleInProgress` rather than queued. Dropping a running
//! cycle (task cancellation) leaves the detector `Failed` without a report.

use crate::config::DriftConfig;
use crate::drift::psi::population_stability_index;
use crate::drift::sink::DriftReportSink;
use crate::drift::window::FeatureWindow;
use crate::error::{Result, ServingError};
use crate::prediction_log::sink::PredictionSink;
use crate::types::report::{DriftFlag, DriftReport};
use arc_swap::ArcSwapOption;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DriftState {
    Idle = 0,
    Running = 1,
    ReportReady = 2,
    Failed = 3,
}

impl DriftState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DriftState::Running,
            2 => DriftState::ReportReady,
            3 => DriftState::Failed,
            _ => DriftState::Idle,
        }
    }
}

/// Marks the detector `Failed` unless the cycle finishes
struct CycleGuard<'a> {
    detector: &'a DriftDetector,
    finished: bool,
}

impl CycleGuard<'_> {
    fn finish(mut self) {
        self.finished = true;
        self.detector
            .state
            .store(DriftState::ReportReady as u8, Ordering::Release);
        self.detector.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.detector
                .state
                .store(DriftState::Failed as u8, Ordering::Release);
            self.detector.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct DriftDetector {
    config: DriftConfig,
    state: AtomicU8,
    reference: ArcSwapOption<FeatureWindow>,
    last_report: ArcSwapOption<DriftReport>,
    report_sink: Arc<dyn DriftReportSink>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl DriftDetector {
    pub fn new(config: DriftConfig, report_sink: Arc<dyn DriftReportSink>) -> Self {
        Self {
            config,
            state: AtomicU8::new(DriftState::Idle as u8),
            reference: ArcSwapOption::empty(),
            last_report: ArcSwapOption::empty(),
            report_sink,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn state(&self) -> DriftState {
        DriftState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Read the state, moving a finished cycle back to `Idle`.
    ///
    /// Returns the state as it was before the reset, so each `ReportReady`
    /// or `Failed` outcome is reported once.
    pub fn acknowledge(&self) -> DriftState {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                matches!(
                    DriftState::from_u8(current),
                    DriftState::ReportReady | DriftState::Failed
                )
                .then_some(DriftState::Idle as u8)
            })
            .unwrap_or_else(|current| current);
        DriftState::from_u8(previous)
    }

    /// Replace the reference baseline, normally at promotion time
    pub fn set_reference(&self, window: FeatureWindow) {
        info!(
            window = %window.id(),
            model_version = ?window.model_version(),
            samples = window.len(),
            "Drift reference updated"
        );
        self.reference.store(Some(Arc::new(window)));
    }

    pub fn reference(&self) -> Option<Arc<FeatureWindow>> {
        self.reference.load_full()
    }

    pub fn last_report(&self) -> Option<Arc<DriftReport>> {
        self.last_report.load_full()
    }

    /// (completed, failed) cycle counts
    pub fn cycle_counts(&self) -> (u64, u64) {
        (
            self.completed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }

    fn begin(&self) -> Result<CycleGuard<'_>> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != DriftState::Running as u8).then_some(DriftState::Running as u8)
            })
            .map_err(|_| ServingError::CycleInProgress)?;

        Ok(CycleGuard {
            detector: self,
            finished: false,
        })
    }

    /// Compare two explicit windows and persist the report
    pub async fn run_cycle(
        &self,
        reference: &FeatureWindow,
        comparison: &FeatureWindow,
    ) -> Result<DriftReport> {
        let guard = self.begin()?;
        self.execute(guard, reference, comparison).await
    }

    /// Compare the stored reference against the most recent logged predictions
    /// served by the reference's model version.
    pub async fn trigger(&self, predictions: &dyn PredictionSink) -> Result<DriftReport> {
        let guard = self.begin()?;

        let reference = self.reference.load_full().ok_or_else(|| {
            ServingError::InsufficientData("no drift reference window captured".to_string())
        })?;
        let records = predictions
            .recent(self.config.comparison_window_size)
            .await?;
        let comparison = FeatureWindow::from_records(&records, reference.model_version());

        self.execute(guard, &reference, &comparison).await
    }

    async fn execute(
        &self,
        guard: CycleGuard<'_>,
        reference: &FeatureWindow,
        comparison: &FeatureWindow,
    ) -> Result<DriftReport> {
        for window in [reference, comparison] {
            if window.len() < self.config.min_samples {
                warn!(
                    window = %window.id(),
                    required = self.config.min_samples,
                    actual = window.len(),
                    "Drift cycle aborted: insufficient samples"
                );
                return Err(ServingError::InsufficientSamples {
                    window: window.id().to_string(),
                    required: self.config.min_samples,
                    actual: window.len(),
                });
            }
        }

        let report = self.compare(reference, comparison)?;
        self.report_sink.store(&report).await?;
        self.last_report.store(Some(Arc::new(report.clone())));
        guard.finish();

        if report.overall_flag == DriftFlag::Drift {
            warn!(
                reference = %report.reference_window_id,
                comparison = %report.comparison_window_id,
                features = ?report.drifted_features(),
                "Drift detected"
            );
        } else {
            info!(
                reference = %report.reference_window_id,
                comparison = %report.comparison_window_id,
                overall = ?report.overall_flag,
                "Drift cycle complete"
            );
        }

        Ok(report)
    }

    fn compare(&self, reference: &FeatureWindow, comparison: &FeatureWindow) -> Result<DriftReport> {
        let mut per_feature_scores = BTreeMap::new();
        let mut feature_flags = BTreeMap::new();

        for name in reference.column_names() {
            let (Some(expected), Some(actual)) = (reference.column(name), comparison.column(name))
            else {
                warn!(feature = %name, "Feature missing from comparison window, skipped");
                continue;
            };

            let score = population_stability_index(
                expected,
                actual,
                self.config.bins,
                self.config.epsilon,
            );
            feature_flags.insert(
                name.to_string(),
                DriftFlag::from_score(score, &self.config.cut_points),
            );
            per_feature_scores.insert(name.to_string(), score);
        }

        if per_feature_scores.is_empty() {
            return Err(ServingError::InsufficientData(
                "reference and comparison windows share no features".to_string(),
            ));
        }

        let overall_flag = feature_flags
            .values()
            .copied()
            .max()
            .unwrap_or(DriftFlag::Stable);

        Ok(DriftReport {
            reference_window_id: reference.id().to_string(),
            comparison_window_id: comparison.id().to_string(),
            per_feature_scores,
            feature_flags,
            overall_flag,
            reference_samples: reference.len(),
            comparison_samples: comparison.len(),
            generated_at: Utc::now(),
        })
    }
}
