//! Gamepad sampling source

use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{CaptureSource, SourceContext};
use crate::data::SourceKind;
use crate::input::{GamepadDevice, GamepadNormalizer};

/// Polls one gamepad at a fixed rate and emits state changes
pub struct GamepadSource {
    device: Box<dyn GamepadDevice>,
    period: Duration,
    normalizer: GamepadNormalizer,
}

impl GamepadSource {
    pub fn new(device: Box<dyn GamepadDevice>, sampling_rate_hz: u32, noise_gate: f64) -> Self {
        let hz = sampling_rate_hz.max(1);
        Self {
            device,
            period: Duration::from_secs_f64(1.0 / hz as f64),
            normalizer: GamepadNormalizer::new(noise_gate),
        }
    }

    fn run(mut self, mut ctx: SourceContext) {
        info!(
            "Sampling gamepad '{}' every {:?}",
            self.device.name(),
            self.period
        );

        let mut next_tick = Instant::now();
        while !ctx.cancel.is_cancelled() {
            let sampled_at = Instant::now();
            match self.device.poll() {
                Ok(snapshot) => {
                    for payload in self.normalizer.update(snapshot) {
                        ctx.emitter.emit(sampled_at, payload);
                    }
                }
                Err(e) => {
                    warn!("{}; gamepad capture stopping", e);
                    ctx.mark_stopping();
                    return;
                }
            }

            // Fixed cadence: sleep to the next tick, skip ticks we overran
            next_tick += self.period;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                next_tick = now;
            }
        }
    }
}

impl CaptureSource for GamepadSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Gamepad
    }

    fn start(self: Box<Self>, ctx: SourceContext) -> Result<()> {
        thread::Builder::new()
            .name("gamepad-sampler".to_string())
            .spawn(move || self.run(ctx))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{launch, SourceState};
    use crate::data::EventPayload;
    use crate::input::gamepad::testing::{left_stick, ScriptedGamepad};
    use crate::sink::SinkMessage;
    use crate::sync::SessionClock;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_constant_stick_logged_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let device = ScriptedGamepad::new(vec![left_stick(16384); 5], false);
        let source = GamepadSource::new(Box::new(device), 200, 0.1);
        let mut handle = launch(Box::new(source), SessionClock::now(), tx).unwrap();

        // 200 Hz for 100 ms is many more polls than script entries
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
        assert!(handle.join(Duration::from_secs(1)).await);

        let mut sticks = 0;
        while let Ok(SinkMessage::Event(event)) = rx.try_recv() {
            assert!(matches!(event.payload, EventPayload::GamepadStick(_)));
            sticks += 1;
        }
        assert_eq!(sticks, 1);
    }

    #[tokio::test]
    async fn test_disconnect_stops_source() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let device = ScriptedGamepad::new(vec![left_stick(0), left_stick(20000)], true);
        let source = GamepadSource::new(Box::new(device), 200, 0.1);
        let mut handle = launch(Box::new(source), SessionClock::now(), tx).unwrap();

        // Exits on its own, no stop needed
        assert!(handle.join(Duration::from_secs(1)).await);
        assert_eq!(handle.state(), SourceState::Idle);

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
