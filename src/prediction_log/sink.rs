//! Durable destinations for prediction records

use crate::error::{Result, ServingError};
use crate::types::record::PredictionRecord;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

/// Bytes read per step when scanning the log backwards
const TAIL_CHUNK: u64 = 64 * 1024;

/// Durable store for served predictions
#[async_trait]
pub trait PredictionSink: Send + Sync {
    /// Persist a batch, in order
    async fn append_batch(&self, records: &[PredictionRecord]) -> Result<()>;

    /// Read back up to `limit` of the most recently written records, oldest first
    async fn recent(&self, limit: usize) -> Result<Vec<PredictionRecord>>;
}

/// Append-only JSON-lines file sink
///
/// `recent` reads the file backwards from the end, so its cost follows
/// `limit` rather than the size of the log. Lines that fail to parse, such
/// as one torn by a crash mid-append, are skipped and counted.
pub struct JsonlPredictionSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    skipped_lines: AtomicU64,
}

impl JsonlPredictionSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
            skipped_lines: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unparseable lines skipped by `recent` since startup
    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines.load(Ordering::Relaxed)
    }
}

/// True when the file is non-empty and its last byte is not a newline
async fn has_unterminated_tail(file: &mut tokio::fs::File) -> Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

fn parse_line(line: &[u8]) -> Option<std::result::Result<PredictionRecord, ()>> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(_) => return Some(Err(())),
    };
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).map_err(|_| ()))
}

#[async_trait]
impl PredictionSink for JsonlPredictionSink {
    async fn append_batch(&self, records: &[PredictionRecord]) -> Result<()> {
        let mut buffer = Vec::with_capacity(records.len() * 256);
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        // Terminate a torn line so this batch starts on a fresh one
        if has_unterminated_tail(&mut file).await? {
            buffer.insert(0, b'\n');
        }
        file.write_all(&buffer).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PredictionRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut pos = file.metadata().await?.len();
        // Start of a line that began before `pos`, not yet complete
        let mut carry: Vec<u8> = Vec::new();
        let mut newest_first = Vec::with_capacity(limit.min(4096));
        let mut skipped = 0u64;

        while pos > 0 && newest_first.len() < limit {
            let step = TAIL_CHUNK.min(pos);
            pos -= step;
            file.seek(SeekFrom::Start(pos)).await?;
            let mut chunk = vec![0u8; step as usize];
            file.read_exact(&mut chunk).await?;
            chunk.extend_from_slice(&carry);

            let split = if pos == 0 {
                0
            } else {
                match chunk.iter().position(|b| *b == b'\n') {
                    Some(i) => i + 1,
                    None => {
                        carry = chunk;
                        continue;
                    }
                }
            };

            for line in chunk[split..].split(|b| *b == b'\n').rev() {
                if newest_first.len() == limit {
                    break;
                }
                match parse_line(line) {
                    Some(Ok(record)) => newest_first.push(record),
                    Some(Err(())) => skipped += 1,
                    None => {}
                }
            }
            chunk.truncate(split);
            carry = chunk;
        }

        if skipped > 0 {
            self.skipped_lines.fetch_add(skipped, Ordering::Relaxed);
            warn!(
                path = %self.path.display(),
                skipped = skipped,
                "Skipped unreadable prediction log lines"
            );
        }

        newest_first.reverse();
        Ok(newest_first)
    }
}

/// In-memory sink, used for embedding and tests
#[derive(Default)]
pub struct MemoryPredictionSink {
    records: Mutex<Vec<PredictionRecord>>,
}

impl MemoryPredictionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn records(&self) -> Vec<PredictionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PredictionSink for MemoryPredictionSink {
    async fn append_batch(&self, records: &[PredictionRecord]) -> Result<()> {
        let mut stored = self
            .records
            .lock()
            .map_err(|e| ServingError::Sink(format!("Lock error: {}", e)))?;
        stored.extend_from_slice(records);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PredictionRecord>> {
        let stored = self
            .records
            .lock()
            .map_err(|e| ServingError::Sink(format!("Lock error: {}", e)))?;
        let start = stored.len().saturating_sub(limit);
        Ok(stored[start..].to_vec())
    }
}
