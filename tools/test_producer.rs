//! Test Request Producer
//!
//! Sends synthetic flight price prediction requests to the serving pipeline
//! over NATS and reports the replies. Falls back to a dry run that only prints
//! sample requests when no broker is reachable.

use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Request structure matching the pipeline's expected format
#[derive(Debug, Clone, Serialize)]
struct PredictRequest {
    request_id: String,
    features: Map<String, Value>,
}

/// Request generator for testing
struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
    request_counter: u64,
}

impl RequestGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            request_counter: 0,
        }
    }

    /// Generate a request resembling the training data
    fn generate(&mut self, shifted: bool) -> PredictRequest {
        self.request_counter += 1;

        // Shifted requests model a change in booking behaviour
        let (duration, days_left): (f64, f64) = if shifted {
            (self.rng.gen_range(20.0..40.0), self.rng.gen_range(1.0..5.0))
        } else {
            (self.rng.gen_range(1.0..20.0), self.rng.gen_range(1.0..50.0))
        };

        let mut features = Map::new();
        features.insert("duration".to_string(), Value::from(round2(duration)));
        features.insert("days_left".to_string(), Value::from(days_left.floor()));
        features.insert(
            "stops".to_string(),
            Value::from(self.rng.gen_range(0..3) as f64),
        );
        features.insert(
            "class".to_string(),
            Value::from(if self.rng.gen_bool(0.3) { 1.0 } else { 0.0 }),
        );

        PredictRequest {
            request_id: format!("req_{:012}", self.request_counter),
            features,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Request Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("serving.predict");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let shift_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        shift_rate = shift_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, shift_rate, delay_ms).await;
        }
    };

    let mut generator = RequestGenerator::new();
    let mut rng = rand::thread_rng();
    let mut answered = 0u64;
    let mut failed = 0u64;
    let mut total_latency = Duration::ZERO;

    info!("Starting to send {} requests...", count);

    for i in 0..count {
        let request = generator.generate(rng.gen_bool(shift_rate));
        let payload = serde_json::to_vec(&request)?;

        let started = Instant::now();
        match client.request(subject.to_string(), payload.into()).await {
            Ok(reply) => {
                total_latency += started.elapsed();
                let body: Value = serde_json::from_slice(&reply.payload)?;
                if body.get("kind").is_some() {
                    failed += 1;
                    warn!(request_id = %request.request_id, reply = %body, "Error reply");
                } else {
                    answered += 1;
                }
            }
            Err(e) => {
                failed += 1;
                warn!(request_id = %request.request_id, error = %e, "Request failed");
            }
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} requests ({} answered, {} failed)",
                i + 1,
                count,
                answered,
                failed
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let mean_latency_us = if answered > 0 {
        total_latency.as_micros() as u64 / answered
    } else {
        0
    };
    info!(
        "Completed! Sent {} requests ({} answered, {} failed, mean round trip {} us)",
        count, answered, failed, mean_latency_us
    );

    Ok(())
}

async fn run_dry_mode(count: u64, shift_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RequestGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let request = generator.generate(rng.gen_bool(shift_rate));
        let json = serde_json::to_string_pretty(&request)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
