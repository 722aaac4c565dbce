//! Synchronization controller
//!
//! Reacts to recorder start/stop notifications. A start anchors a new
//! [`SessionClock`], opens the session log, writes its metadata line and
//! launches the enabled capture sources. A stop (or a lost recorder
//! connection) stops the sources, drains the sink and closes the log.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::session::{log_path_for, unique_path, Session, SessionSummary};
use super::{clock, EngineCommand, EngineStatus, SessionClock};
use crate::capture::{self, CaptureSource, GamepadSource, KeyboardSource, MouseSource, SourceState};
use crate::config::{ActiveSessionPolicy, Config};
use crate::data::{DeviceInfo, GamepadInfo, SessionMetadata, SourceKind, META_VERSION};
use crate::error::SyncError;
use crate::input::{GamepadProvider, InputHook};
use crate::recorder::RecorderEvent;
use crate::sink::{EventSink, SinkFault};

/// Name recorded for the keyboard/mouse hook in the metadata line
const KEYBOARD_MOUSE_BACKEND: &str = "rdev";

/// Controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    ConnectedIdle,
    Recording,
}

/// Owns the active session and everything that feeds it
pub struct SyncController {
    config: Config,
    hook: Arc<dyn InputHook>,
    gamepads: Arc<dyn GamepadProvider>,
    state: ControllerState,
    /// Recorder details from the last connect
    obs_version: Option<String>,
    record_directory: Option<PathBuf>,
    session: Option<Session>,
    status_tx: broadcast::Sender<EngineStatus>,
    fault_tx: mpsc::UnboundedSender<SinkFault>,
    /// Sink fault receiver (taken once when run() starts)
    fault_rx: Option<mpsc::UnboundedReceiver<SinkFault>>,
}

impl SyncController {
    pub fn new(
        config: Config,
        hook: Arc<dyn InputHook>,
        gamepads: Arc<dyn GamepadProvider>,
        status_tx: broadcast::Sender<EngineStatus>,
    ) -> Self {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Self {
            config,
            hook,
            gamepads,
            state: ControllerState::Disconnected,
            obs_version: None,
            record_directory: None,
            session: None,
            status_tx,
            fault_tx,
            fault_rx: Some(fault_rx),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Recording-relative timestamp for a capture instant
    pub fn align(&self, captured_at: Instant) -> Result<u64, SyncError> {
        clock::align(self.session.as_ref().map(|s| &s.clock), captured_at)
    }

    /// State of every source in the active session
    pub fn source_states(&self) -> Vec<(SourceKind, SourceState)> {
        self.session
            .as_ref()
            .map(|s| s.sources().iter().map(|h| (h.kind(), h.state())).collect())
            .unwrap_or_default()
    }

    /// Run until shutdown
    pub async fn run(
        &mut self,
        mut recorder_rx: mpsc::Receiver<RecorderEvent>,
        mut cmd_rx: mpsc::Receiver<EngineCommand>,
    ) -> Result<()> {
        info!("Sync controller starting");

        let mut fault_rx = match self.fault_rx.take() {
            Some(rx) => rx,
            None => anyhow::bail!("Sync controller is already running"),
        };

        let _ = self.status_tx.send(EngineStatus::Disconnected);

        loop {
            tokio::select! {
                Some(event) = recorder_rx.recv() => {
                    self.handle_recorder_event(event).await;
                }

                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        EngineCommand::StopRecording => {
                            match self.align(Instant::now()) {
                                Ok(at_ms) => info!("Manual stop at {} ms", at_ms),
                                Err(e) => info!("Manual stop ignored: {}", e),
                            }
                            self.on_recording_stop(None).await;
                        }
                        EngineCommand::Shutdown => {
                            info!("Shutdown command received");
                            self.on_recording_stop(None).await;
                            break;
                        }
                    }
                }

                Some(fault) = fault_rx.recv() => {
                    self.handle_sink_fault(fault).await;
                }

                else => break,
            }
        }

        info!("Sync controller stopped");
        Ok(())
    }

    async fn handle_recorder_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Connected {
                obs_version,
                record_directory,
            } => self.on_connected(obs_version, record_directory),
            RecorderEvent::Disconnected => self.on_disconnected().await,
            RecorderEvent::RecordingStarted { output_path, clock } => {
                if let Err(e) = self.on_recording_start(output_path, clock).await {
                    error!("Failed to start capture session: {:#}", e);
                    let _ = self
                        .status_tx
                        .send(EngineStatus::Error(format!("Failed to start session: {:#}", e)));
                }
            }
            RecorderEvent::RecordingStopped { output_path } => {
                self.on_recording_stop(output_path).await;
            }
        }
    }

    pub fn on_connected(&mut self, obs_version: Option<String>, record_directory: Option<PathBuf>) {
        info!(
            "Recorder connected (OBS {})",
            obs_version.as_deref().unwrap_or("unknown")
        );
        self.obs_version = obs_version;
        self.record_directory = record_directory;
        if self.state == ControllerState::Disconnected {
            self.state = ControllerState::ConnectedIdle;
            let _ = self.status_tx.send(EngineStatus::Idle);
        }
    }

    /// Losing the recorder ends the session as if it had stopped
    pub async fn on_disconnected(&mut self) {
        if self.session.is_some() {
            warn!("Recorder disconnected during a session; closing it");
            self.on_recording_stop(None).await;
        }
        self.state = ControllerState::Disconnected;
        let _ = self.status_tx.send(EngineStatus::Disconnected);
    }

    /// Open a session anchored at `clock`
    pub async fn on_recording_start(
        &mut self,
        output_path: Option<PathBuf>,
        clock: SessionClock,
    ) -> Result<()> {
        if self.session.is_some() {
            match self.config.recording.active_session_policy {
                ActiveSessionPolicy::Ignore => {
                    info!("Recording start received while already recording; keeping current session");
                    return Ok(());
                }
                ActiveSessionPolicy::Restart => {
                    info!("Recording start received while already recording; restarting session");
                    self.on_recording_stop(None).await;
                }
            }
        }

        let session = self.open_session(output_path, clock)?;
        info!("Session {} recording to {:?}", session.id, session.log_path);
        let _ = self.status_tx.send(EngineStatus::Recording {
            log_path: session.log_path.clone(),
        });
        self.session = Some(session);
        self.state = ControllerState::Recording;
        Ok(())
    }

    /// Close the active session. Without one this is a no-op.
    pub async fn on_recording_stop(&mut self, output_path: Option<PathBuf>) -> Option<SessionSummary> {
        if self.session.is_none() {
            debug!("Recording stop with no active session");
            return None;
        }
        debug!("Stopping sources: {:?}", self.source_states());
        let session = self.session.take()?;

        if let (Some(reported), Some(expected)) = (&output_path, &session.video_path) {
            if reported != expected {
                warn!(
                    "Recorder stopped {:?} but the session was for {:?}",
                    reported, expected
                );
            }
        }

        let summary = session.finish(self.config.sink.drain_timeout()).await;
        info!("{}", summary);
        if let Some(e) = &summary.write_error {
            let _ = self.status_tx.send(EngineStatus::Error(e.clone()));
        }
        let _ = self.status_tx.send(EngineStatus::SessionFinished(summary.clone()));

        if self.state == ControllerState::Recording {
            self.state = ControllerState::ConnectedIdle;
            let _ = self.status_tx.send(EngineStatus::Idle);
        }
        Some(summary)
    }

    async fn handle_sink_fault(&mut self, fault: SinkFault) {
        let current = self
            .session()
            .map_or(false, |s| s.log_path == fault.path);
        if !current {
            debug!("Ignoring fault from a closed log {:?}", fault.path);
            return;
        }

        error!("Input log {:?} failed; ending session: {}", fault.path, fault.message);
        let _ = self.status_tx.send(EngineStatus::Error(fault.message));
        self.on_recording_stop(None).await;
    }

    fn open_session(&self, output_path: Option<PathBuf>, clock: SessionClock) -> Result<Session> {
        let input = &self.config.input;
        let session_id = uuid::Uuid::new_v4().to_string();

        let log_path = unique_path(&log_path_for(
            output_path.as_deref(),
            self.config.recording.save_directory.as_deref(),
            self.record_directory.as_deref(),
            clock.started_at(),
        ));

        // Subscribe before the log is opened so nothing after the anchor is missed
        let mut sources: Vec<Box<dyn CaptureSource>> = Vec::new();
        if input.capture_keyboard {
            sources.push(Box::new(KeyboardSource::new(self.hook.as_ref())));
        }
        if input.capture_mouse {
            sources.push(Box::new(MouseSource::new(self.hook.as_ref())));
        }

        let mut gamepad = None;
        let mut gamepad_count = 0;
        if input.capture_gamepad {
            gamepad_count = self.gamepads.count();
            if gamepad_count > 1 {
                info!(
                    "{} gamepads detected; only index {} is captured",
                    gamepad_count, input.gamepad_index
                );
            }
            match self.gamepads.open(input.gamepad_index) {
                Ok(Some(device)) => {
                    gamepad = Some(GamepadInfo {
                        index: input.gamepad_index,
                        name: device.name().to_string(),
                    });
                    sources.push(Box::new(GamepadSource::new(
                        device,
                        input.sampling_rate_hz,
                        input.stick_noise_gate,
                    )));
                }
                Ok(None) => info!("No gamepad at index {}", input.gamepad_index),
                Err(e) => warn!("Failed to open gamepad: {:#}", e),
            }
        }

        let metadata = SessionMetadata {
            meta_version: META_VERSION.to_string(),
            session_id: session_id.clone(),
            device_info: DeviceInfo {
                sources: sources.iter().map(|s| s.kind()).collect(),
                keyboard_mouse_backend: KEYBOARD_MOUSE_BACKEND.to_string(),
                gamepad,
                gamepad_count,
            },
            recorder_version: env!("CARGO_PKG_VERSION").to_string(),
            obs_version: self.obs_version.clone(),
            sampling_rate_hz: input.sampling_rate_hz,
            session_start_iso: clock.started_at().to_rfc3339(),
            output_video_file: output_path
                .as_deref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
            platform: std::env::consts::OS.to_string(),
        };

        let sink = EventSink::create(
            &log_path,
            &metadata,
            &self.config.sink,
            Some(self.fault_tx.clone()),
        )?;

        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let kind = source.kind();
            match capture::launch(source, clock, sink.sender()) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("Failed to start {} capture: {:#}", kind, e),
            }
        }

        Ok(Session::new(session_id, clock, output_path, sink, handles))
    }
}

/// Create channels for controller communication
pub fn create_engine_channels() -> (
    mpsc::Sender<EngineCommand>,
    mpsc::Receiver<EngineCommand>,
    broadcast::Sender<EngineStatus>,
    broadcast::Receiver<EngineStatus>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (status_tx, status_rx) = broadcast::channel(16);
    (cmd_tx, cmd_rx, status_tx, status_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EventPayload, InputLog, KeyPress};
    use crate::input::gamepad::testing::{left_stick, ScriptedGamepad, ScriptedProvider};
    use crate::input::gamepad::NoGamepads;
    use crate::input::{HookRouter, RawInput};
    use std::path::Path;
    use std::time::Duration;

    struct Fixture {
        dir: PathBuf,
        router: Arc<HookRouter>,
        controller: SyncController,
    }

    impl Fixture {
        fn new(gamepads: Arc<dyn GamepadProvider>, policy: ActiveSessionPolicy) -> Self {
            let dir = std::env::temp_dir().join(format!("input-sync-engine-{}", uuid::Uuid::new_v4()));
            let mut config = Config::default();
            config.recording.save_directory = Some(dir.clone());
            config.recording.active_session_policy = policy;
            config.input.sampling_rate_hz = 200;

            let router = HookRouter::new();
            let (_, _, status_tx, _) = create_engine_channels();
            let controller = SyncController::new(config, router.clone(), gamepads, status_tx);
            Self {
                dir,
                router,
                controller,
            }
        }

        fn key_at(&self, clock: &SessionClock, offset_ms: u64, key: rdev::Key) {
            self.router.dispatch(RawInput {
                captured_at: clock.anchor() + Duration::from_millis(offset_ms),
                event: rdev::EventType::KeyPress(key),
            });
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn log_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_key_down_is_stamped_from_recording_start() {
        let mut fx = Fixture::new(Arc::new(NoGamepads), ActiveSessionPolicy::Ignore);
        fx.controller.on_connected(Some("30.1.2".to_string()), None);
        assert_eq!(fx.controller.state(), ControllerState::ConnectedIdle);

        let clock = SessionClock::now();
        let video = PathBuf::from("/videos/2026-01-01 10-00-00.mkv");
        fx.controller
            .on_recording_start(Some(video), clock)
            .await
            .unwrap();
        assert_eq!(fx.controller.state(), ControllerState::Recording);

        fx.key_at(&clock, 50, rdev::Key::KeyA);

        let summary = fx.controller.on_recording_stop(None).await.unwrap();
        assert_eq!(summary.events_written, 1);
        assert_eq!(summary.log_path, fx.dir.join("2026-01-01 10-00-00.jsonl"));
        assert_eq!(fx.controller.state(), ControllerState::ConnectedIdle);

        let log = InputLog::read(&summary.log_path).unwrap();
        assert_eq!(log.metadata.obs_version.as_deref(), Some("30.1.2"));
        assert_eq!(
            log.metadata.output_video_file.as_deref(),
            Some("2026-01-01 10-00-00.mkv")
        );
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.events[0].timestamp_ms, 50);
        assert_eq!(
            log.events[0].payload,
            EventPayload::KeyDown(KeyPress {
                key_code: "KeyA".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_gamepad_disconnect_leaves_other_sources_running() {
        let device = ScriptedGamepad::new(vec![left_stick(0), left_stick(20000)], true);
        let mut fx = Fixture::new(
            Arc::new(ScriptedProvider::new(device)),
            ActiveSessionPolicy::Ignore,
        );
        fx.controller.on_connected(None, None);

        let clock = SessionClock::now();
        fx.controller.on_recording_start(None, clock).await.unwrap();
        fx.key_at(&clock, 1, rdev::Key::KeyW);

        // Let the sampler hit the disconnect
        tokio::time::sleep(Duration::from_millis(200)).await;
        let states = fx.controller.source_states();
        assert!(states.contains(&(SourceKind::Gamepad, SourceState::Idle)));
        assert!(states.contains(&(SourceKind::Keyboard, SourceState::Running)));
        assert_eq!(fx.controller.state(), ControllerState::Recording);

        fx.key_at(&clock, 250, rdev::Key::KeyS);
        let summary = fx.controller.on_recording_stop(None).await.unwrap();

        let log = InputLog::read(&summary.log_path).unwrap();
        assert_eq!(log.metadata.device_info.gamepad_count, 1);
        assert_eq!(log.events.len(), 3);
        assert_eq!(summary.per_source.get(&SourceKind::Gamepad), Some(&1));
        assert_eq!(summary.per_source.get(&SourceKind::Keyboard), Some(&2));
        assert!(log.is_ordered_per_source());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut fx = Fixture::new(Arc::new(NoGamepads), ActiveSessionPolicy::Ignore);
        assert!(fx.controller.on_recording_stop(None).await.is_none());

        fx.controller.on_connected(None, None);
        fx.controller
            .on_recording_start(None, SessionClock::now())
            .await
            .unwrap();
        assert!(fx.controller.on_recording_stop(None).await.is_some());
        assert!(fx.controller.on_recording_stop(None).await.is_none());
        assert_eq!(fx.controller.state(), ControllerState::ConnectedIdle);
        assert_eq!(log_files(&fx.dir).len(), 1);
    }

    #[tokio::test]
    async fn test_align_requires_session() {
        let mut fx = Fixture::new(Arc::new(NoGamepads), ActiveSessionPolicy::Ignore);
        assert!(matches!(
            fx.controller.align(Instant::now()),
            Err(SyncError::NoActiveSession)
        ));

        let clock = SessionClock::now();
        fx.controller.on_recording_start(None, clock).await.unwrap();
        assert_eq!(
            fx.controller
                .align(clock.anchor() + Duration::from_millis(75))
                .unwrap(),
            75
        );

        fx.controller.on_recording_stop(None).await;
        assert!(fx.controller.align(Instant::now()).is_err());
    }

    #[tokio::test]
    async fn test_start_while_recording_is_ignored_by_default() {
        let mut fx = Fixture::new(Arc::new(NoGamepads), ActiveSessionPolicy::Ignore);
        fx.controller.on_connected(None, None);

        let first = SessionClock::now();
        fx.controller.on_recording_start(None, first).await.unwrap();
        let first_id = fx.controller.session().unwrap().id.clone();

        fx.controller
            .on_recording_start(None, SessionClock::now())
            .await
            .unwrap();
        assert_eq!(fx.controller.session().unwrap().id, first_id);

        fx.controller.on_recording_stop(None).await;
        assert_eq!(log_files(&fx.dir).len(), 1);
    }

    #[tokio::test]
    async fn test_restart_policy_closes_previous_session() {
        let mut fx = Fixture::new(Arc::new(NoGamepads), ActiveSessionPolicy::Restart);
        fx.controller.on_connected(None, None);

        let first = SessionClock::now();
        fx.controller.on_recording_start(None, first).await.unwrap();
        fx.key_at(&first, 5, rdev::Key::KeyA);

        let second = SessionClock::now();
        fx.controller.on_recording_start(None, second).await.unwrap();
        fx.key_at(&second, 7, rdev::Key::KeyB);
        fx.controller.on_recording_stop(None).await;

        let files = log_files(&fx.dir);
        assert_eq!(files.len(), 2);
        for file in files {
            let log = InputLog::read(&file).unwrap();
            assert_eq!(log.events.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_disconnect_closes_session() {
        let mut fx = Fixture::new(Arc::new(NoGamepads), ActiveSessionPolicy::Ignore);
        fx.controller.on_connected(None, None);
        fx.controller
            .on_recording_start(None, SessionClock::now())
            .await
            .unwrap();

        fx.controller.on_disconnected().await;
        assert_eq!(fx.controller.state(), ControllerState::Disconnected);
        assert!(fx.controller.session().is_none());
        assert_eq!(log_files(&fx.dir).len(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_follows_recorder_and_shuts_down() {
        let dir = std::env::temp_dir().join(format!("input-sync-engine-{}", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.recording.save_directory = Some(dir.clone());

        let (cmd_tx, cmd_rx, status_tx, mut status_rx) = create_engine_channels();
        let (recorder_tx, recorder_rx) = mpsc::channel(8);
        let mut controller =
            SyncController::new(config, HookRouter::new(), Arc::new(NoGamepads), status_tx);

        recorder_tx
            .send(RecorderEvent::Connected {
                obs_version: None,
                record_directory: None,
            })
            .await
            .unwrap();
        recorder_tx
            .send(RecorderEvent::RecordingStarted {
                output_path: None,
                clock: SessionClock::now(),
            })
            .await
            .unwrap();

        let run = tokio::spawn(async move {
            controller.run(recorder_rx, cmd_rx).await.unwrap();
            controller
        });

        // Shut down with the session still open
        loop {
            if let EngineStatus::Recording { .. } = status_rx.recv().await.unwrap() {
                break;
            }
        }
        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();

        let controller = run.await.unwrap();
        assert!(controller.session().is_none());

        let mut finished = None;
        while let Ok(status) = status_rx.try_recv() {
            if let EngineStatus::SessionFinished(summary) = status {
                finished = Some(summary);
            }
        }
        let summary = finished.expect("session was not finished on shutdown");
        assert!(InputLog::read(&summary.log_path).is_ok());

        drop(recorder_tx);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_log_write_failure_ends_session() {
        let dir = std::env::temp_dir().join(format!("input-sync-engine-{}", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.recording.save_directory = Some(dir.clone());

        let (cmd_tx, cmd_rx, status_tx, mut status_rx) = create_engine_channels();
        let (recorder_tx, recorder_rx) = mpsc::channel(8);
        let mut controller =
            SyncController::new(config, HookRouter::new(), Arc::new(NoGamepads), status_tx);
        let fault_tx = controller.fault_tx.clone();

        recorder_tx
            .send(RecorderEvent::Connected {
                obs_version: None,
                record_directory: None,
            })
            .await
            .unwrap();
        recorder_tx
            .send(RecorderEvent::RecordingStarted {
                output_path: None,
                clock: SessionClock::now(),
            })
            .await
            .unwrap();

        let run = tokio::spawn(async move {
            controller.run(recorder_rx, cmd_rx).await.unwrap();
            controller
        });

        let log_path = loop {
            if let EngineStatus::Recording { log_path } = status_rx.recv().await.unwrap() {
                break log_path;
            }
        };

        // A fault for some other file leaves the session alone
        fault_tx
            .send(SinkFault {
                path: dir.join("stale.jsonl"),
                message: "stale".to_string(),
            })
            .unwrap();
        fault_tx
            .send(SinkFault {
                path: log_path.clone(),
                message: "failed to write input log after 3 attempts: disk full".to_string(),
            })
            .unwrap();

        let mut saw_error = false;
        let mut finished = None;
        loop {
            match status_rx.recv().await.unwrap() {
                EngineStatus::Error(message) => {
                    assert!(message.contains("disk full"));
                    saw_error = true;
                }
                EngineStatus::SessionFinished(summary) => finished = Some(summary),
                EngineStatus::Idle if saw_error => break,
                _ => {}
            }
        }
        assert_eq!(finished.unwrap().log_path, log_path);

        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        let controller = run.await.unwrap();
        assert_eq!(controller.state(), ControllerState::ConnectedIdle);
        assert!(controller.session().is_none());

        drop(recorder_tx);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
