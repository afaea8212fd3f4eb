//! Asynchronous, non-blocking prediction logger.
//!
//! `log` pushes a record into a bounded in-memory buffer and returns. A single
//! background drain task takes records out in enqueue order, writes them to the
//! sink in batches, and retries failed writes with bounded exponential backoff.
//! A record taken out of the buffer is never put back, so no record is handed
//! to the sink by two different drains.
//!
//! When the buffer is full, the configured [`BackpressurePolicy`] decides:
//! - `DropOldest`: evict the oldest unwritten record. `log` only ever holds
//!   the buffer mutex for a push/pop, so its latency is independent of the sink.
//! - `SyncFallback`: write the record directly, bounded by
//!   `sync_write_timeout_ms`. A timeout or failure counts the record as lost.
//!   Such records may reach the sink ahead of older buffered ones.

use crate::config::{BackpressurePolicy, PredictionLogConfig};
use crate::prediction_log::sink::PredictionSink;
use crate::types::record::PredictionRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What happened to a record handed to [`PredictionLogger::log`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// Buffered for the background drain
    Enqueued,
    /// Buffered after evicting the oldest unwritten record
    EnqueuedDroppedOldest,
    /// Buffer full; written synchronously
    WrittenSync,
    /// Buffer full and the synchronous write failed, or the logger is closed
    Lost,
}

/// Logger counters
#[derive(Debug, Default)]
struct LoggerStats {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    lost: AtomicU64,
    retries: AtomicU64,
    sync_writes: AtomicU64,
}

/// Point-in-time copy of the logger counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStatsSnapshot {
    pub enqueued: u64,
    pub written: u64,
    pub dropped: u64,
    pub lost: u64,
    pub retries: u64,
    pub sync_writes: u64,
    pub pending: usize,
}

enum Admission {
    Queued,
    Evicted,
    Full(PredictionRecord),
    Closed(PredictionRecord),
}

struct Shared {
    queue: Mutex<VecDeque<PredictionRecord>>,
    notify: Notify,
    sink: Arc<dyn PredictionSink>,
    config: PredictionLogConfig,
    stats: LoggerStats,
    closed: AtomicBool,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<PredictionRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_batch(&self) -> Vec<PredictionRecord> {
        let mut queue = self.lock_queue();
        let n = queue.len().min(self.config.batch_size.max(1));
        queue.drain(..n).collect()
    }

    async fn write_with_retry(&self, batch: Vec<PredictionRecord>) {
        let count = batch.len() as u64;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);

        for attempt in 0..=self.config.max_retries {
            match self.sink.append_batch(&batch).await {
                Ok(()) => {
                    self.stats.written.fetch_add(count, Ordering::Relaxed);
                    debug!(records = count, attempt = attempt, "Prediction batch written");
                    return;
                }
                Err(e) if attempt < self.config.max_retries => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        records = count,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Prediction sink write failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => {
                    let total = self.stats.lost.fetch_add(count, Ordering::Relaxed) + count;
                    error!(
                        records = count,
                        total_lost = total,
                        retries = self.config.max_retries,
                        error = %e,
                        "ALERT: prediction records lost after exhausting retries"
                    );
                    return;
                }
            }
        }
    }
}

/// Handle to the bounded prediction buffer. Cheap to clone.
#[derive(Clone)]
pub struct PredictionLogger {
    shared: Arc<Shared>,
}

impl PredictionLogger {
    /// Create a logger without starting its drain task
    pub fn new(sink: Arc<dyn PredictionSink>, config: PredictionLogConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
                notify: Notify::new(),
                sink,
                config,
                stats: LoggerStats::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a logger and start its background drain task
    pub fn spawn(sink: Arc<dyn PredictionSink>, config: PredictionLogConfig) -> (Self, JoinHandle<()>) {
        let logger = Self::new(sink, config);
        let handle = logger.start_drain();
        (logger, handle)
    }

    /// Start the drain task. Call at most once per logger.
    pub fn start_drain(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        info!(
            capacity = shared.config.capacity,
            batch_size = shared.config.batch_size,
            policy = ?shared.config.policy,
            "Prediction logger started"
        );

        tokio::spawn(async move {
            let idle_wait = Duration::from_millis(shared.config.flush_interval_ms.max(1));
            loop {
                let batch = shared.take_batch();
                if batch.is_empty() {
                    if shared.closed.load(Ordering::Acquire) {
                        break;
                    }
                    tokio::select! {
                        _ = shared.notify.notified() => {}
                        _ = tokio::time::sleep(idle_wait) => {}
                    }
                    continue;
                }
                shared.write_with_retry(batch).await;
            }
            info!("Prediction logger drained");
        })
    }

    /// Record a served prediction without waiting for persistence
    pub async fn log(&self, record: PredictionRecord) -> LogOutcome {
        let admission = {
            let mut queue = self.shared.lock_queue();
            if self.shared.closed.load(Ordering::Acquire) {
                Admission::Closed(record)
            } else if queue.len() < self.shared.config.capacity {
                queue.push_back(record);
                Admission::Queued
            } else {
                match self.shared.config.policy {
                    BackpressurePolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(record);
                        Admission::Evicted
                    }
                    BackpressurePolicy::SyncFallback => Admission::Full(record),
                }
            }
        };

        match admission {
            Admission::Queued => {
                self.shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                self.shared.notify.notify_one();
                LogOutcome::Enqueued
            }
            Admission::Evicted => {
                self.shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                let dropped = self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(total_dropped = dropped, "Prediction log buffer full, dropping oldest records");
                }
                self.shared.notify.notify_one();
                LogOutcome::EnqueuedDroppedOldest
            }
            Admission::Full(record) => self.write_sync(record).await,
            Admission::Closed(record) => {
                self.shared.stats.lost.fetch_add(1, Ordering::Relaxed);
                warn!(request_id = %record.request_id, "Prediction logged after shutdown, discarding");
                LogOutcome::Lost
            }
        }
    }

    async fn write_sync(&self, record: PredictionRecord) -> LogOutcome {
        let ceiling = Duration::from_millis(self.shared.config.sync_write_timeout_ms);
        let batch = [record];

        match tokio::time::timeout(ceiling, self.shared.sink.append_batch(&batch)).await {
            Ok(Ok(())) => {
                self.shared.stats.sync_writes.fetch_add(1, Ordering::Relaxed);
                self.shared.stats.written.fetch_add(1, Ordering::Relaxed);
                LogOutcome::WrittenSync
            }
            Ok(Err(e)) => {
                self.shared.stats.lost.fetch_add(1, Ordering::Relaxed);
                error!(request_id = %batch[0].request_id, error = %e, "Synchronous prediction write failed, record lost");
                LogOutcome::Lost
            }
            Err(_) => {
                self.shared.stats.lost.fetch_add(1, Ordering::Relaxed);
                error!(
                    request_id = %batch[0].request_id,
                    ceiling_ms = ceiling.as_millis() as u64,
                    "Synchronous prediction write timed out, record lost"
                );
                LogOutcome::Lost
            }
        }
    }

    pub fn stats(&self) -> LoggerStatsSnapshot {
        let stats = &self.shared.stats;
        LoggerStatsSnapshot {
            enqueued: stats.enqueued.load(Ordering::Relaxed),
            written: stats.written.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            lost: stats.lost.load(Ordering::Relaxed),
            retries: stats.retries.load(Ordering::Relaxed),
            sync_writes: stats.sync_writes.load(Ordering::Relaxed),
            pending: self.shared.lock_queue().len(),
        }
    }

    pub fn sink(&self) -> Arc<dyn PredictionSink> {
        self.shared.sink.clone()
    }

    /// Stop accepting records, flush what is buffered and wait for the drain task
    pub async fn shutdown(&self, drain: JoinHandle<()>) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        if let Err(e) = drain.await {
            error!(error = %e, "Prediction logger drain task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, ServingError};
    use crate::prediction_log::sink::MemoryPredictionSink;
    use crate::types::features::FeatureVector;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn record(i: usize) -> PredictionRecord {
        PredictionRecord::new(
            format!("req-{}", i),
            FeatureVector::new().with("duration", i as f64),
            i as f64,
            "1".to_string(),
        )
    }

    fn config(capacity: usize, policy: BackpressurePolicy) -> PredictionLogConfig {
        PredictionLogConfig {
            capacity,
            batch_size: 16,
            flush_interval_ms: 5,
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            policy,
            sync_write_timeout_ms: 50,
            ..PredictionLogConfig::default()
        }
    }

    /// Sink that is down: every write fails
    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PredictionSink for FailingSink {
        async fn append_batch(&self, _records: &[PredictionRecord]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(ServingError::Sink("connection refused".into()))
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<PredictionRecord>> {
            Ok(Vec::new())
        }
    }

    /// Sink that never answers
    struct HangingSink;

    #[async_trait]
    impl PredictionSink for HangingSink {
        async fn append_batch(&self, _records: &[PredictionRecord]) -> Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<PredictionRecord>> {
            Ok(Vec::new())
        }
    }

    /// Sink failing the first `failures` writes, then delegating to memory
    struct FlakySink {
        failures: AtomicUsize,
        inner: MemoryPredictionSink,
    }

    #[async_trait]
    impl PredictionSink for FlakySink {
        async fn append_batch(&self, records: &[PredictionRecord]) -> Result<()> {
            let remaining = self.failures.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::Relaxed);
                return Err(ServingError::Sink("timeout".into()));
            }
            self.inner.append_batch(records).await
        }

        async fn recent(&self, limit: usize) -> Result<Vec<PredictionRecord>> {
            self.inner.recent(limit).await
        }
    }

    #[tokio::test]
    async fn test_records_written_in_enqueue_order() {
        let sink = Arc::new(MemoryPredictionSink::new());
        let (logger, drain) =
            PredictionLogger::spawn(sink.clone(), config(64, BackpressurePolicy::DropOldest));

        for i in 0..40 {
            assert_eq!(logger.log(record(i)).await, LogOutcome::Enqueued);
        }
        logger.shutdown(drain).await;

        let ids: Vec<String> = sink.records().into_iter().map(|r| r.request_id).collect();
        let expected: Vec<String> = (0..40).map(|i| format!("req-{}", i)).collect();
        assert_eq!(ids, expected);

        let stats = logger.stats();
        assert_eq!(stats.written, 40);
        assert_eq!(stats.lost, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_when_full() {
        let sink = Arc::new(MemoryPredictionSink::new());
        let logger = PredictionLogger::new(sink.clone(), config(2, BackpressurePolicy::DropOldest));

        assert_eq!(logger.log(record(1)).await, LogOutcome::Enqueued);
        assert_eq!(logger.log(record(2)).await, LogOutcome::Enqueued);
        assert_eq!(
            logger.log(record(3)).await,
            LogOutcome::EnqueuedDroppedOldest
        );

        let drain = logger.start_drain();
        logger.shutdown(drain).await;

        let ids: Vec<String> = sink.records().into_iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec!["req-2".to_string(), "req-3".to_string()]);
        assert_eq!(logger.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_sync_fallback_when_full() {
        let sink = Arc::new(MemoryPredictionSink::new());
        let logger =
            PredictionLogger::new(sink.clone(), config(1, BackpressurePolicy::SyncFallback));

        assert_eq!(logger.log(record(1)).await, LogOutcome::Enqueued);
        assert_eq!(logger.log(record(2)).await, LogOutcome::WrittenSync);

        // Only the synchronous write has reached the sink so far
        assert_eq!(sink.records()[0].request_id, "req-2");
        assert_eq!(logger.stats().sync_writes, 1);
    }

    #[tokio::test]
    async fn test_sync_fallback_bounded_by_ceiling() {
        let logger =
            PredictionLogger::new(Arc::new(HangingSink), config(1, BackpressurePolicy::SyncFallback));
        logger.log(record(1)).await;

        let started = Instant::now();
        let outcome = logger.log(record(2)).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome, LogOutcome::Lost);
        assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
        assert_eq!(logger.stats().lost, 1);
    }

    #[tokio::test]
    async fn test_saturation_with_unavailable_sink_keeps_log_fast() {
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let (logger, drain) =
            PredictionLogger::spawn(sink.clone(), config(8, BackpressurePolicy::DropOldest));

        let ceiling = Duration::from_millis(50);
        let mut slowest = Duration::ZERO;
        for i in 0..1000 {
            let started = Instant::now();
            logger.log(record(i)).await;
            slowest = slowest.max(started.elapsed());
        }
        assert!(slowest < ceiling, "slowest log call took {:?}", slowest);

        logger.shutdown(drain).await;

        let stats = logger.stats();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.enqueued, 1000);
        assert_eq!(stats.lost + stats.dropped, 1000);
        assert!(sink.calls.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(2),
            inner: MemoryPredictionSink::new(),
        });
        let (logger, drain) =
            PredictionLogger::spawn(sink.clone(), config(16, BackpressurePolicy::DropOldest));

        logger.log(record(1)).await;
        logger.shutdown(drain).await;

        let stats = logger.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.lost, 0);
        assert_eq!(sink.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_after_exhausting_retries() {
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let (logger, drain) =
            PredictionLogger::spawn(sink.clone(), config(16, BackpressurePolicy::DropOldest));

        logger.log(record(1)).await;
        logger.log(record(2)).await;
        logger.shutdown(drain).await;

        let stats = logger.stats();
        assert_eq!(stats.lost, 2);
        assert_eq!(stats.written, 0);
        // First attempt plus two retries per batch
        assert_eq!(sink.calls.load(Ordering::Relaxed) % 3, 0);
    }

    #[tokio::test]
    async fn test_log_after_shutdown_is_lost() {
        let sink = Arc::new(MemoryPredictionSink::new());
        let (logger, drain) =
            PredictionLogger::spawn(sink.clone(), config(4, BackpressurePolicy::DropOldest));
        logger.shutdown(drain).await;

        assert_eq!(logger.log(record(1)).await, LogOutcome::Lost);
        assert!(sink.is_empty());
    }
}
