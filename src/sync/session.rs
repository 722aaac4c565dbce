//! One recording session: its clock, log file and running sources

use chrono::{DateTime, Local, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, warn};

use super::SessionClock;
use crate::capture::SourceHandle;
use crate::data::SourceKind;
use crate::sink::SinkHandle;

/// Controller-owned state of an active recording
pub struct Session {
    pub id: String,
    pub clock: SessionClock,
    pub log_path: PathBuf,
    pub video_path: Option<PathBuf>,
    sink: SinkHandle,
    sources: Vec<SourceHandle>,
}

impl Session {
    pub fn new(
        id: String,
        clock: SessionClock,
        video_path: Option<PathBuf>,
        sink: SinkHandle,
        sources: Vec<SourceHandle>,
    ) -> Self {
        Self {
            id,
            clock,
            log_path: sink.path().to_path_buf(),
            video_path,
            sink,
            sources,
        }
    }

    pub fn sources(&self) -> &[SourceHandle] {
        &self.sources
    }

    /// Stop every source, then drain and close the log.
    ///
    /// Sources are stopped before the sink is closed so that nothing they
    /// captured before the stop is lost.
    pub async fn finish(mut self, drain_timeout: Duration) -> SessionSummary {
        let duration_ms = self.clock.align(std::time::Instant::now());

        for source in &self.sources {
            source.stop();
        }
        for source in &mut self.sources {
            if !source.join(drain_timeout).await {
                warn!(
                    "{} capture did not stop within {:?}; later events are discarded",
                    source.kind(),
                    drain_timeout
                );
            }
        }

        let (events_written, per_source, write_error) = match self.sink.close().await {
            Ok(summary) => (summary.events_written, summary.per_source, None),
            Err(e) => {
                error!("Input log {:?} was not closed cleanly: {:#}", self.log_path, e);
                (0, BTreeMap::new(), Some(format!("{:#}", e)))
            }
        };

        SessionSummary {
            session_id: self.id,
            log_path: self.log_path,
            duration_ms,
            events_written,
            per_source,
            write_error,
        }
    }
}

/// Logged and broadcast when a session ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub log_path: PathBuf,
    pub duration_ms: u64,
    pub events_written: u64,
    pub per_source: BTreeMap<SourceKind, u64>,
    pub write_error: Option<String>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} finished after {:.1}s: {} events",
            self.session_id,
            self.duration_ms as f64 / 1000.0,
            self.events_written
        )?;
        for (source, count) in &self.per_source {
            write!(f, ", {} {}", source, count)?;
        }
        write!(f, " -> {}", self.log_path.display())?;
        if let Some(e) = &self.write_error {
            write!(f, " (write error: {})", e)?;
        }
        Ok(())
    }
}

/// Where the log for a recording goes.
///
/// Named after the video when the recorder reported one, otherwise after the
/// session start time. Placed in `save_dir`, else beside the video, else in
/// the recorder's output directory, else the temp directory.
pub fn log_path_for(
    video: Option<&Path>,
    save_dir: Option<&Path>,
    record_dir: Option<&Path>,
    started_at: DateTime<Utc>,
) -> PathBuf {
    let file_name = match video.and_then(|v| v.file_stem()) {
        Some(stem) => format!("{}.jsonl", stem.to_string_lossy()),
        None => format!(
            "input_log_{}.jsonl",
            started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S")
        ),
    };

    let dir = save_dir
        .map(Path::to_path_buf)
        .or_else(|| video.and_then(Path::parent).map(Path::to_path_buf))
        .or_else(|| record_dir.map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir);

    dir.join(file_name)
}

/// `path`, or `path` with `_1`, `_2`, ... before the extension if taken
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = path.with_file_name(format!("{}_{}{}", stem, n, extension));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
