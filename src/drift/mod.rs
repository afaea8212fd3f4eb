//! Distribution drift detection between a promotion-time reference window and
//! recently served predictions

pub mod detector;
pub mod psi;
pub mod sink;
pub mod window;

pub use detector::{DriftDetector, DriftState};
pub use psi::population_stability_index;
pub use sink::{DriftReportSink, JsonDriftReportSink, MemoryDriftReportSink};
pub use window::{FeatureWindow, PREDICTION_COLUMN};
