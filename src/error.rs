//! Error types shared by the capture, sink and sync layers

use std::path::PathBuf;
use thiserror::Error;

use crate::data::SourceKind;

/// Errors surfaced by the synchronization core
#[derive(Debug, Error)]
pub enum SyncError {
    /// A timestamp was requested while no recording session exists
    #[error("no active recording session")]
    NoActiveSession,

    /// A capture device went away mid-session
    #[error("{source_kind} device disconnected: {reason}")]
    DeviceDisconnected {
        source_kind: SourceKind,
        reason: String,
    },

    /// The session log could not be created
    #[error("failed to open input log {path:?}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appending to the session log kept failing
    #[error("failed to write input log after {attempts} attempts: {source}")]
    LogWriteFailure {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialized
    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Configuration values that cannot work together
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A raw device event that could not be mapped to a normalized event.
///
/// Never leaves the normalizer: capture loops log it and move on.
#[derive(Debug, Error)]
#[error("malformed {source_kind} event: {reason}")]
pub struct MalformedEvent {
    pub source_kind: SourceKind,
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(source_kind: SourceKind, reason: impl Into<String>) -> Self {
        Self {
            source_kind,
            reason: reason.into(),
        }
    }
}
