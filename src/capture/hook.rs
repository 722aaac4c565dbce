//! Keyboard and mouse sources driven by the process-wide input hook

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::warn;

use super::{CaptureSource, SourceContext};
use crate::data::{EventPayload, SourceKind};
use crate::input::{normalize_key, HookFilter, InputHook, MouseNormalizer, RawInput};

/// Keyboard capture. Subscribes on construction so nothing typed between
/// session start and task start is missed.
pub struct KeyboardSource {
    rx: mpsc::UnboundedReceiver<RawInput>,
}

impl KeyboardSource {
    pub fn new(hook: &dyn InputHook) -> Self {
        Self {
            rx: hook.subscribe(HookFilter::Keyboard),
        }
    }
}

impl CaptureSource for KeyboardSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Keyboard
    }

    fn start(self: Box<Self>, ctx: SourceContext) -> Result<()> {
        tokio::spawn(run_hook_loop(ctx, self.rx, normalize_key));
        Ok(())
    }
}

/// Mouse capture (moves, clicks, wheel)
pub struct MouseSource {
    rx: mpsc::UnboundedReceiver<RawInput>,
}

impl MouseSource {
    pub fn new(hook: &dyn InputHook) -> Self {
        Self {
            rx: hook.subscribe(HookFilter::Mouse),
        }
    }
}

impl CaptureSource for MouseSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mouse
    }

    fn start(self: Box<Self>, ctx: SourceContext) -> Result<()> {
        let mut normalizer = MouseNormalizer::new();
        tokio::spawn(run_hook_loop(ctx, self.rx, move |event| {
            normalizer.normalize(event)
        }));
        Ok(())
    }
}

/// Wait for hook callbacks until cancelled, then flush whatever the hook had
/// already delivered.
async fn run_hook_loop<F>(
    mut ctx: SourceContext,
    mut rx: mpsc::UnboundedReceiver<RawInput>,
    mut normalize: F,
) where
    F: FnMut(&rdev::EventType) -> Option<EventPayload> + Send,
{
    loop {
        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => break,

            raw = rx.recv() => match raw {
                Some(raw) => {
                    if let Some(payload) = normalize(&raw.event) {
                        ctx.emitter.emit(raw.captured_at, payload);
                    }
                }
                None => {
                    warn!("Input hook closed; {} capture stopping", ctx.emitter.kind());
                    ctx.mark_stopping();
                    return;
                }
            },
        }
    }

    while let Ok(raw) = rx.try_recv() {
        if let Some(payload) = normalize(&raw.event) {
            ctx.emitter.emit(raw.captured_at, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{launch, SourceState};
    use crate::data::NormalizedEvent;
    use crate::input::HookRouter;
    use crate::sink::SinkMessage;
    use crate::sync::SessionClock;
    use std::time::Duration;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SinkMessage>) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let SinkMessage::Event(event) = message {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_keyboard_source_stamps_relative_to_session() {
        let router = HookRouter::new();
        let clock = SessionClock::now();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let source = KeyboardSource::new(router.as_ref());
        let mut handle = launch(Box::new(source), clock, tx).unwrap();

        router.dispatch(RawInput {
            captured_at: clock.anchor() + Duration::from_millis(50),
            event: rdev::EventType::KeyPress(rdev::Key::KeyA),
        });

        handle.stop();
        assert!(handle.join(Duration::from_secs(1)).await);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let line = serde_json::to_string(&events[0]).unwrap();
        assert_eq!(
            line,
            r#"{"source":"keyboard","subtype":"key_down","timestamp_ms":50,"payload":{"key_code":"KeyA"}}"#
        );
    }

    #[tokio::test]
    async fn test_mouse_source_ignores_keys_and_drops_after_stop() {
        let router = HookRouter::new();
        let clock = SessionClock::now();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handle = launch(Box::new(MouseSource::new(router.as_ref())), clock, tx).unwrap();

        router.dispatch(RawInput::now(rdev::EventType::KeyPress(rdev::Key::KeyA)));
        router.dispatch(RawInput::now(rdev::EventType::ButtonPress(rdev::Button::Left)));
        router.dispatch(RawInput::now(rdev::EventType::Wheel {
            delta_x: 0,
            delta_y: 2,
        }));

        handle.stop();
        assert!(handle.join(Duration::from_secs(1)).await);
        assert_eq!(handle.state(), SourceState::Idle);

        // After the worker exits its subscription is gone
        router.dispatch(RawInput::now(rdev::EventType::ButtonRelease(rdev::Button::Left)));

        let subtypes: Vec<&str> = drain(&mut rx).iter().map(|e| e.subtype()).collect();
        assert_eq!(subtypes, vec!["click", "scroll"]);
    }

    #[tokio::test]
    async fn test_source_stops_when_hook_dies() {
        let router = HookRouter::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = launch(
            Box::new(KeyboardSource::new(router.as_ref())),
            SessionClock::now(),
            tx,
        )
        .unwrap();
        assert_eq!(handle.state(), SourceState::Running);

        router.close();

        // The worker exits without being asked to stop
        assert!(handle.join(Duration::from_secs(1)).await);
        assert_eq!(handle.state(), SourceState::Idle);
    }
}
