//! Session log format: one metadata record followed by JSONL events

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::{NormalizedEvent, SourceKind};

/// Version of the log layout written by this agent
pub const META_VERSION: &str = "2.0";

/// First line of every session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Log layout version
    pub meta_version: String,

    /// Session identifier (UUID v4)
    pub session_id: String,

    /// Devices taking part in the session
    pub device_info: DeviceInfo,

    /// Version of this agent
    pub recorder_version: String,

    /// OBS version reported over the control channel, if known
    pub obs_version: Option<String>,

    /// Gamepad sampling cadence
    pub sampling_rate_hz: u32,

    /// Wall-clock instant of the recording anchor (RFC 3339)
    pub session_start_iso: String,

    /// File name of the video this log belongs to, if known
    pub output_video_file: Option<String>,

    /// Platform (windows, macos, linux)
    pub platform: String,
}

/// Device list recorded in the metadata line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Sources started for this session
    pub sources: Vec<SourceKind>,

    /// Backend used for keyboard and mouse hooks
    pub keyboard_mouse_backend: String,

    /// The polled gamepad, if one was opened
    pub gamepad: Option<GamepadInfo>,

    /// Number of gamepads detected at session start
    pub gamepad_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadInfo {
    pub index: usize,
    pub name: String,
}

/// A session log read back from disk
#[derive(Debug, Clone)]
pub struct InputLog {
    pub metadata: SessionMetadata,
    pub events: Vec<NormalizedEvent>,
}

impl InputLog {
    /// Read and validate a session log. Fails on the first malformed line.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input log: {:?}", path))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = contents.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

        let Some((_, first)) = lines.next() else {
            bail!("Input log is empty");
        };
        let metadata: SessionMetadata =
            serde_json::from_str(first).context("Line 1 is not a metadata record")?;

        let mut events = Vec::new();
        for (index, line) in lines {
            let event: NormalizedEvent = serde_json::from_str(line)
                .with_context(|| format!("Line {} is not a valid event", index + 1))?;
            events.push(event);
        }

        Ok(Self { metadata, events })
    }

    /// True when events appear in non-decreasing timestamp order across all sources
    pub fn is_time_ordered(&self) -> bool {
        self.events
            .windows(2)
            .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms)
    }

    /// True when each source's own stream is non-decreasing
    pub fn is_ordered_per_source(&self) -> bool {
        let mut last: BTreeMap<SourceKind, u64> = BTreeMap::new();
        for event in &self.events {
            let previous = last.entry(event.source()).or_insert(0);
            if event.timestamp_ms < *previous {
                return false;
            }
            *previous = event.timestamp_ms;
        }
        true
    }

    /// Events sorted by timestamp; ties keep their log order
    pub fn sorted_events(&self) -> Vec<NormalizedEvent> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.timestamp_ms);
        events
    }

    pub fn report(&self, fps: f64) -> LogReport {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.source()).or_insert(0u64) += 1;
        }
        let last = self.sorted_events().pop();

        LogReport {
            session_id: self.metadata.session_id.clone(),
            session_start_iso: self.metadata.session_start_iso.clone(),
            total_events: self.events.len(),
            counts,
            time_ordered: self.is_time_ordered(),
            source_ordered: self.is_ordered_per_source(),
            last_timestamp_ms: last.as_ref().map_or(0, |e| e.timestamp_ms),
            fps,
            last_frame: last.as_ref().map_or(0, |e| e.frame_index(fps)),
        }
    }
}

/// Human-readable summary printed by `--inspect`
#[derive(Debug, Clone)]
pub struct LogReport {
    pub session_id: String,
    pub session_start_iso: String,
    pub total_events: usize,
    pub counts: BTreeMap<SourceKind, u64>,
    pub time_ordered: bool,
    pub source_ordered: bool,
    pub last_timestamp_ms: u64,
    pub fps: f64,
    pub last_frame: u64,
}

impl fmt::Display for LogReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "session:        {}", self.session_id)?;
        writeln!(f, "started:        {}", self.session_start_iso)?;
        writeln!(f, "events:         {}", self.total_events)?;
        for (source, count) in &self.counts {
            writeln!(f, "  {:<12}  {}", source, count)?;
        }
        writeln!(f, "time ordered:   {}", self.time_ordered)?;
        writeln!(f, "source ordered: {}", self.source_ordered)?;
        writeln!(f, "duration:       {} ms", self.last_timestamp_ms)?;
        write!(f, "last frame:     {} @ {} fps", self.last_frame, self.fps)
    }
}
