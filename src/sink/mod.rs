//! Session log writer
//!
//! One writer task per session owns the log file. Capture sources push into
//! an unbounded queue; the writer appends one JSON line per event in the
//! order it dequeues them, preceded by the metadata line. Lines are buffered
//! and flushed on a timer or once a batch fills up. On close the queue is
//! drained completely before the file is shut.

mod reorder;

pub use reorder::ReorderBuffer;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::data::{NormalizedEvent, SessionMetadata, SourceKind};
use crate::error::SyncError;

/// Base delay between write attempts
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Messages accepted by the writer task
#[derive(Debug)]
pub enum SinkMessage {
    Event(NormalizedEvent),
    /// Drain everything queued so far and close the file
    Close,
}

/// Reported to the controller when the writer gives up on a log
#[derive(Debug, Clone)]
pub struct SinkFault {
    pub path: PathBuf,
    pub message: String,
}

/// What a closed writer produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub events_written: u64,
    pub per_source: BTreeMap<SourceKind, u64>,
    pub bytes_written: u64,
}

/// Handle to a running writer task
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkMessage>,
    task: JoinHandle<Result<SinkSummary, SyncError>>,
    path: PathBuf,
}

impl SinkHandle {
    /// Producer side of the queue, one clone per capture source
    pub fn sender(&self) -> mpsc::UnboundedSender<SinkMessage> {
        self.tx.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain the queue, flush and close the log
    pub async fn close(self) -> Result<SinkSummary> {
        // The writer may already have stopped after a write failure
        let _ = self.tx.send(SinkMessage::Close);
        let summary = self
            .task
            .await
            .context("Input log writer task panicked")??;
        Ok(summary)
    }
}

pub struct EventSink;

impl EventSink {
    /// Create the log file and start its writer.
    ///
    /// Never truncates: an existing file at `path` is an error.
    pub fn create(
        path: &Path,
        metadata: &SessionMetadata,
        config: &SinkConfig,
        faults: Option<mpsc::UnboundedSender<SinkFault>>,
    ) -> Result<SinkHandle, SyncError> {
        let open_error = |source| SyncError::LogOpen {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(open_error)?;
        }
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(open_error)?;

        info!("Opened input log {:?}", path);
        Self::spawn_with_writer(
            tokio::fs::File::from_std(file),
            path.to_path_buf(),
            metadata,
            config,
            faults,
        )
    }

    /// Start a writer task over any async writer
    pub fn spawn_with_writer<W>(
        writer: W,
        path: PathBuf,
        metadata: &SessionMetadata,
        config: &SinkConfig,
        faults: Option<mpsc::UnboundedSender<SinkFault>>,
    ) -> Result<SinkHandle, SyncError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut metadata_line = serde_json::to_string(metadata)?;
        metadata_line.push('\n');

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = LogWriter::new(writer, config);
        let task_path = path.clone();
        let task = tokio::spawn(async move {
            let result = writer.run(rx, metadata_line).await;
            match &result {
                Ok(summary) => info!(
                    "Closed input log {:?} ({} events)",
                    task_path, summary.events_written
                ),
                Err(e) => {
                    error!("Input log {:?} failed: {}", task_path, e);
                    if let Some(faults) = faults {
                        let _ = faults.send(SinkFault {
                            path: task_path.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            result
        });

        Ok(SinkHandle { tx, task, path })
    }
}

struct LogWriter<W> {
    writer: W,
    buffer: String,
    buffered_records: usize,
    flush_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    reorder: Option<ReorderBuffer>,
    summary: SinkSummary,
}

impl<W: AsyncWrite + Unpin> LogWriter<W> {
    fn new(writer: W, config: &SinkConfig) -> Self {
        Self {
            writer,
            buffer: String::new(),
            buffered_records: 0,
            flush_interval: config.flush_interval(),
            batch_size: config.flush_batch_size.max(1),
            max_attempts: config.write_retries.max(1),
            reorder: config.reorder_window_ms.map(ReorderBuffer::new),
            summary: SinkSummary::default(),
        }
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SinkMessage>,
        metadata_line: String,
    ) -> Result<SinkSummary, SyncError> {
        // Metadata goes out on its own so the file is identifiable immediately
        self.buffer.push_str(&metadata_line);
        self.flush().await?;

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(SinkMessage::Event(event)) => {
                        self.accept(event)?;
                        if self.buffered_records >= self.batch_size {
                            self.flush().await?;
                        }
                    }
                    Some(SinkMessage::Close) | None => break,
                },
                _ = ticker.tick() => {
                    self.flush().await?;
                }
            }
        }

        // Late producers see a closed queue; everything already queued is kept
        rx.close();
        while let Ok(message) = rx.try_recv() {
            if let SinkMessage::Event(event) = message {
                self.accept(event)?;
            }
        }
        if let Some(reorder) = self.reorder.as_mut() {
            for event in reorder.drain() {
                Self::append(&mut self.buffer, &mut self.buffered_records, &mut self.summary, &event)?;
            }
        }
        self.flush().await?;

        if let Err(e) = self.writer.shutdown().await {
            warn!("Failed to close input log cleanly: {}", e);
        }
        Ok(self.summary)
    }

    fn accept(&mut self, event: NormalizedEvent) -> Result<(), SyncError> {
        match self.reorder.as_mut() {
            Some(reorder) => {
                reorder.push(event);
                for ready in reorder.pop_ready() {
                    Self::append(
                        &mut self.buffer,
                        &mut self.buffered_records,
                        &mut self.summary,
                        &ready,
                    )?;
                }
                Ok(())
            }
            None => Self::append(
                &mut self.buffer,
                &mut self.buffered_records,
                &mut self.summary,
                &event,
            ),
        }
    }

    fn append(
        buffer: &mut String,
        buffered_records: &mut usize,
        summary: &mut SinkSummary,
        event: &NormalizedEvent,
    ) -> Result<(), SyncError> {
        let line = serde_json::to_string(event)?;
        buffer.push_str(&line);
        buffer.push('\n');
        *buffered_records += 1;
        summary.events_written += 1;
        *summary.per_source.entry(event.source()).or_insert(0) += 1;
        Ok(())
    }

    /// Write out everything buffered, retrying a bounded number of times
    async fn flush(&mut self) -> Result<(), SyncError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        // Bytes already accepted by the writer; a retry resumes after them
        let mut written = 0;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match write_from(&mut self.writer, self.buffer.as_bytes(), &mut written).await {
                Ok(()) => break,
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "Input log write failed (attempt {}/{}): {}",
                        attempt, self.max_attempts, e
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(source) => {
                    return Err(SyncError::LogWriteFailure {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }

        debug!("Flushed {} records", self.buffered_records);
        self.summary.bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        self.buffered_records = 0;
        Ok(())
    }
}

/// Write `bytes[*written..]` and flush, advancing `written` as the writer
/// accepts data so a failed attempt never repeats a prefix
async fn write_from<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
    written: &mut usize,
) -> std::io::Result<()> {
    while *written < bytes.len() {
        let n = writer.write(&bytes[*written..]).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        *written += n;
    }
    writer.flush().await
}
