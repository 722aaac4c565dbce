//! Synchronization controller - ties input capture to the recorder's sessions

mod clock;
mod engine;
mod session;

pub use clock::{align, SessionClock};
pub use engine::{create_engine_channels, ControllerState, SyncController};
pub use session::{log_path_for, unique_path, Session, SessionSummary};

use std::path::PathBuf;

/// Commands that can be sent to the controller
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// End the current capture session (the recorder keeps recording)
    StopRecording,
    /// Stop any session and exit
    Shutdown,
}

/// Status updates from the controller
#[derive(Debug, Clone)]
pub enum EngineStatus {
    /// No control channel to the recorder
    Disconnected,
    /// Connected, not recording
    Idle,
    /// Capturing into `log_path`
    Recording { log_path: PathBuf },
    /// A session was closed
    SessionFinished(SessionSummary),
    /// An error occurred
    Error(String),
}
