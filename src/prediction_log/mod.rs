//! Prediction logging: bounded asynchronous buffer plus durable sinks

pub mod logger;
pub mod sink;

pub use logger::{LogOutcome, LoggerStatsSnapshot, PredictionLogger};
pub use sink::{JsonlPredictionSink, MemoryPredictionSink, PredictionSink};
