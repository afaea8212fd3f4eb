//! Destinations for drift reports

use crate::error::{Result, ServingError};
use crate::types::report::DriftReport;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

#[async_trait]
pub trait DriftReportSink: Send + Sync {
    async fn store(&self, report: &DriftReport) -> Result<()>;
}

/// Writes each report to `<dir>/drift_report_<timestamp>.json`
pub struct JsonDriftReportSink {
    dir: PathBuf,
}

impl JsonDriftReportSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn report_path(&self, report: &DriftReport) -> PathBuf {
        self.dir.join(format!(
            "drift_report_{}.json",
            report.generated_at.format("%Y%m%d_%H%M%S%.3f")
        ))
    }
}

#[async_trait]
impl DriftReportSink for JsonDriftReportSink {
    async fn store(&self, report: &DriftReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.report_path(report);
        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, body).await?;
        info!(path = %path.display(), overall = ?report.overall_flag, "Drift report saved");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDriftReportSink {
    reports: Mutex<Vec<DriftReport>>,
}

impl MemoryDriftReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<DriftReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DriftReportSink for MemoryDriftReportSink {
    async fn store(&self, report: &DriftReport) -> Result<()> {
        self.reports
            .lock()
            .map_err(|e| ServingError::Sink(format!("Lock error: {}", e)))?
            .push(report.clone());
        Ok(())
    }
}
