//! Capture sources
//!
//! Each source runs its own loop (a tokio task for the hook-driven keyboard
//! and mouse sources, a sampling thread for the gamepad), normalizes what it
//! sees, stamps it against the session clock and pushes it into the sink
//! queue. Sources never share state with each other; a failing source only
//! stops itself.

mod gamepad;
mod hook;

pub use gamepad::GamepadSource;
pub use hook::{KeyboardSource, MouseSource};

use anyhow::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::data::{EventPayload, NormalizedEvent, SourceKind};
use crate::sink::SinkMessage;
use crate::sync::SessionClock;

/// Lifecycle of a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl SourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SourceState::Running,
            2 => SourceState::Stopping,
            _ => SourceState::Idle,
        }
    }
}

/// Source state shared between the worker and its handle
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: SourceState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn get(&self) -> SourceState {
        SourceState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: SourceState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Running -> Stopping; any other state is left alone
    fn begin_stop(&self) {
        let _ = self.0.compare_exchange(
            SourceState::Running as u8,
            SourceState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Stamps normalized payloads and hands them to the sink
pub struct EventEmitter {
    kind: SourceKind,
    clock: SessionClock,
    tx: mpsc::UnboundedSender<SinkMessage>,
    state: StateCell,
    last_timestamp_ms: u64,
    emitted: u64,
}

impl EventEmitter {
    fn new(
        kind: SourceKind,
        clock: SessionClock,
        tx: mpsc::UnboundedSender<SinkMessage>,
        state: StateCell,
    ) -> Self {
        Self {
            kind,
            clock,
            tx,
            state,
            last_timestamp_ms: 0,
            emitted: 0,
        }
    }

    /// Align and enqueue one payload captured at `captured_at`.
    ///
    /// Returns false when the event was not enqueued (source idle or the
    /// sink already gone). Timestamps never go backwards within a source.
    pub fn emit(&mut self, captured_at: Instant, payload: EventPayload) -> bool {
        debug_assert_eq!(payload.source(), self.kind);

        if self.state.get() == SourceState::Idle {
            return false;
        }

        let timestamp_ms = self.clock.align(captured_at).max(self.last_timestamp_ms);
        self.last_timestamp_ms = timestamp_ms;

        let event = NormalizedEvent::new(timestamp_ms, payload);
        if self.tx.send(SinkMessage::Event(event)).is_err() {
            debug!("{} event dropped: sink closed", self.kind);
            return false;
        }
        self.emitted += 1;
        true
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Everything a running source needs; dropping it marks the source Idle
pub struct SourceContext {
    pub emitter: EventEmitter,
    pub cancel: CancellationToken,
    state: StateCell,
    done: Option<oneshot::Sender<()>>,
}

impl SourceContext {
    /// The source can no longer produce events (device lost, hook closed)
    pub fn mark_stopping(&self) {
        self.state.begin_stop();
    }
}

impl Drop for SourceContext {
    fn drop(&mut self) {
        self.state.set(SourceState::Idle);
        debug!(
            "{} capture finished after {} events",
            self.emitter.kind,
            self.emitter.emitted()
        );
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// A device event loop that feeds one session
pub trait CaptureSource: Send {
    fn kind(&self) -> SourceKind;

    /// Start the worker. The worker owns `ctx` and drops it on exit.
    fn start(self: Box<Self>, ctx: SourceContext) -> Result<()>;
}

/// Controller-side handle to a launched source
pub struct SourceHandle {
    kind: SourceKind,
    state: StateCell,
    cancel: CancellationToken,
    done: Option<oneshot::Receiver<()>>,
}

impl SourceHandle {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> SourceState {
        self.state.get()
    }

    /// Ask the worker to finish; events already captured are still emitted
    pub fn stop(&self) {
        self.state.begin_stop();
        self.cancel.cancel();
    }

    /// Wait for the worker to exit. Returns false on timeout.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        match self.done.take() {
            Some(done) => tokio::time::timeout(timeout, done).await.is_ok(),
            None => true,
        }
    }
}

/// Start `source` for a session anchored at `clock`
pub fn launch(
    source: Box<dyn CaptureSource>,
    clock: SessionClock,
    tx: mpsc::UnboundedSender<SinkMessage>,
) -> Result<SourceHandle> {
    let kind = source.kind();
    let state = StateCell::new(SourceState::Running);
    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = oneshot::channel();

    let ctx = SourceContext {
        emitter: EventEmitter::new(kind, clock, tx, state.clone()),
        cancel: cancel.clone(),
        state: state.clone(),
        done: Some(done_tx),
    };
    source.start(ctx)?;
    info!("{} capture started", kind);

    Ok(SourceHandle {
        kind,
        state,
        cancel,
        done: Some(done_rx),
    })
}
