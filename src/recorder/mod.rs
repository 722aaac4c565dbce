//! External recorder notifications
//!
//! The recorder client turns whatever the recorder reports (pushed events,
//! polled status) into a stream of [`RecorderEvent`]s. Only edges are
//! forwarded: a start is never sent twice without a stop in between.

mod obs;

pub use obs::ObsClient;

use std::path::PathBuf;

use crate::sync::SessionClock;

/// Notifications consumed by the synchronization controller
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// Control channel established
    Connected {
        obs_version: Option<String>,
        record_directory: Option<PathBuf>,
    },
    /// Control channel lost
    Disconnected,
    /// Recording began. `clock` is anchored at the moment the notification
    /// was received.
    RecordingStarted {
        output_path: Option<PathBuf>,
        clock: SessionClock,
    },
    RecordingStopped { output_path: Option<PathBuf> },
}

/// Collapses repeated recording-state reports into start/stop edges
#[derive(Debug, Default)]
pub struct EdgeDetector {
    recording: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Feed one observation of the recorder's state
    pub fn observe(&mut self, active: bool, output_path: Option<PathBuf>) -> Option<RecorderEvent> {
        if active == self.recording {
            return None;
        }
        self.recording = active;

        if active {
            Some(RecorderEvent::RecordingStarted {
                output_path,
                clock: SessionClock::now(),
            })
        } else {
            Some(RecorderEvent::RecordingStopped { output_path })
        }
    }
}
