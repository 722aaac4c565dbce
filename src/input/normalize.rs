//! Raw device events to normalized payloads
//!
//! Everything here is a pure mapping. Samples that cannot be mapped are
//! reported with a warning and dropped; callers only ever see `Option`s or
//! empty vectors, so a capture loop cannot be taken down by one bad sample.

use tracing::warn;

use super::gamepad::{AxisReading, GamepadAxis, GamepadSnapshot};
use crate::data::{
    ButtonState, DpadDirection, EventPayload, GamepadButton, GamepadDpad, GamepadStick,
    GamepadTrigger, KeyPress, MouseClick, MouseMove, MouseScroll, Side, SourceKind, StickAxis,
};
use crate::error::MalformedEvent;

/// Default stick noise gate
pub const STICK_NOISE_GATE: f64 = 0.1;

/// Upper bound of trigger pressure
pub const TRIGGER_MAX: u16 = 1023;

// ============================================================================
// Keyboard
// ============================================================================

/// Map a key transition to a `key_down` / `key_up` payload
pub fn normalize_key(event: &rdev::EventType) -> Option<EventPayload> {
    match try_normalize_key(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("Dropping {}", e);
            None
        }
    }
}

fn try_normalize_key(event: &rdev::EventType) -> Result<EventPayload, MalformedEvent> {
    match event {
        rdev::EventType::KeyPress(key) => Ok(EventPayload::KeyDown(key_press(key)?)),
        rdev::EventType::KeyRelease(key) => Ok(EventPayload::KeyUp(key_press(key)?)),
        other => Err(MalformedEvent::new(
            SourceKind::Keyboard,
            format!("unexpected event {:?}", other),
        )),
    }
}

fn key_press(key: &rdev::Key) -> Result<KeyPress, MalformedEvent> {
    match key {
        rdev::Key::Unknown(code) => Err(MalformedEvent::new(
            SourceKind::Keyboard,
            format!("unrecognized key code {}", code),
        )),
        // rdev's variant names are already platform independent
        key => Ok(KeyPress {
            key_code: format!("{:?}", key),
        }),
    }
}

// ============================================================================
// Mouse
// ============================================================================

/// Stateful mouse mapping: tracks the last cursor position so moves carry a
/// delta and clicks carry a location.
#[derive(Debug, Default)]
pub struct MouseNormalizer {
    last_position: Option<(f64, f64)>,
}

impl MouseNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, event: &rdev::EventType) -> Option<EventPayload> {
        match self.try_normalize(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping {}", e);
                None
            }
        }
    }

    fn try_normalize(
        &mut self,
        event: &rdev::EventType,
    ) -> Result<Option<EventPayload>, MalformedEvent> {
        match event {
            rdev::EventType::MouseMove { x, y, .. } => self.moved(*x, *y),
            rdev::EventType::ButtonPress(button) => {
                Ok(Some(self.clicked(button, ButtonState::Pressed)))
            }
            rdev::EventType::ButtonRelease(button) => {
                Ok(Some(self.clicked(button, ButtonState::Released)))
            }
            rdev::EventType::Wheel { delta_x, delta_y } => Ok(self.scrolled(*delta_x, *delta_y)),
            other => Err(MalformedEvent::new(
                SourceKind::Mouse,
                format!("unexpected event {:?}", other),
            )),
        }
    }

    /// Absolute move. Repeats of the last position are suppressed.
    pub fn moved(&mut self, x: f64, y: f64) -> Result<Option<EventPayload>, MalformedEvent> {
        if !x.is_finite() || !y.is_finite() {
            return Err(MalformedEvent::new(
                SourceKind::Mouse,
                format!("non-finite cursor position ({}, {})", x, y),
            ));
        }

        let (dx, dy) = match self.last_position {
            Some((last_x, last_y)) => (x - last_x, y - last_y),
            None => (0.0, 0.0),
        };
        let first = self.last_position.is_none();
        self.last_position = Some((x, y));

        if !first && dx == 0.0 && dy == 0.0 {
            return Ok(None);
        }
        Ok(Some(EventPayload::MouseMove(MouseMove { x, y, dx, dy })))
    }

    pub fn clicked(&self, button: &rdev::Button, state: ButtonState) -> EventPayload {
        let (x, y) = self.last_position.unwrap_or((0.0, 0.0));
        EventPayload::MouseClick(MouseClick {
            button: button_name(button),
            state,
            x,
            y,
        })
    }

    pub fn scrolled(&self, delta_x: i64, delta_y: i64) -> Option<EventPayload> {
        if delta_x == 0 && delta_y == 0 {
            return None;
        }
        Some(EventPayload::MouseScroll(MouseScroll {
            delta: delta_y,
            delta_x,
        }))
    }
}

fn button_name(button: &rdev::Button) -> String {
    match button {
        rdev::Button::Left => "left".to_string(),
        rdev::Button::Right => "right".to_string(),
        rdev::Button::Middle => "middle".to_string(),
        rdev::Button::Unknown(n) => format!("other_{}", n),
    }
}

// ============================================================================
// Gamepad
// ============================================================================

/// Name for a raw gamepad button code (Linux input codes, Xbox layout)
pub fn gamepad_button_name(raw_code: u16) -> String {
    let name = match raw_code {
        0x130 => "a_button",
        0x131 => "b_button",
        0x133 => "y_button",
        0x134 => "x_button",
        0x136 => "lb_shoulder",
        0x137 => "rb_shoulder",
        0x13a => "back_button",
        0x13b => "start_button",
        0x13c => "guide_button",
        0x13d => "left_stick_press",
        0x13e => "right_stick_press",
        other => return format!("button_{}", other),
    };
    name.to_string()
}

/// Scale a stick reading to `(raw_value, normalized_value)`.
///
/// `raw_value` is in the signed 16-bit range regardless of the device's native
/// range, `normalized_value` in [-1.0, 1.0].
pub fn normalize_stick(reading: &AxisReading) -> Result<(i16, f64), MalformedEvent> {
    check_range(reading)?;

    let min = reading.minimum as f64;
    let max = reading.maximum as f64;
    let center = (min + max) / 2.0;
    let half = (max - min) / 2.0;
    let normalized = ((reading.value as f64 - center) / half).clamp(-1.0, 1.0);

    let raw_value = if reading.minimum == i16::MIN as i32 && reading.maximum == i16::MAX as i32 {
        reading.value as i16
    } else {
        (normalized * i16::MAX as f64).round() as i16
    };
    Ok((raw_value, normalized))
}

/// Scale a trigger reading to 0..=1023
pub fn normalize_trigger(reading: &AxisReading) -> Result<u16, MalformedEvent> {
    check_range(reading)?;
    let fraction = (reading.value - reading.minimum) as f64
        / (reading.maximum - reading.minimum) as f64;
    Ok((fraction * TRIGGER_MAX as f64).round() as u16)
}

fn check_range(reading: &AxisReading) -> Result<(), MalformedEvent> {
    if reading.maximum <= reading.minimum {
        return Err(MalformedEvent::new(
            SourceKind::Gamepad,
            format!(
                "degenerate axis range [{}, {}]",
                reading.minimum, reading.maximum
            ),
        ));
    }
    if reading.value < reading.minimum || reading.value > reading.maximum {
        return Err(MalformedEvent::new(
            SourceKind::Gamepad,
            format!(
                "axis value {} outside [{}, {}]",
                reading.value, reading.minimum, reading.maximum
            ),
        ));
    }
    Ok(())
}

fn hat_value(snapshot: &GamepadSnapshot, axis: GamepadAxis) -> i8 {
    snapshot
        .axes
        .get(&axis)
        .map(|r| r.value.signum() as i8)
        .unwrap_or(0)
}

/// Diffs consecutive gamepad snapshots into change events
#[derive(Debug)]
pub struct GamepadNormalizer {
    previous: Option<GamepadSnapshot>,
    noise_gate: f64,
}

impl GamepadNormalizer {
    pub fn new(noise_gate: f64) -> Self {
        Self {
            previous: None,
            noise_gate,
        }
    }

    /// Events for everything that changed since the last call
    pub fn update(&mut self, snapshot: GamepadSnapshot) -> Vec<EventPayload> {
        let events = diff_snapshots(self.previous.as_ref(), &snapshot, self.noise_gate);
        self.previous = Some(snapshot);
        events
    }
}

/// Change events between two samples.
///
/// With no previous sample, the current state is reported against a
/// released, centered controller.
pub fn diff_snapshots(
    prev: Option<&GamepadSnapshot>,
    next: &GamepadSnapshot,
    noise_gate: f64,
) -> Vec<EventPayload> {
    let mut events = Vec::new();

    // Buttons
    for code in &next.pressed {
        if prev.map_or(true, |p| !p.pressed.contains(code)) {
            events.push(button_event(*code, ButtonState::Pressed));
        }
    }
    if let Some(prev) = prev {
        for code in prev.pressed.difference(&next.pressed) {
            events.push(button_event(*code, ButtonState::Released));
        }
    }

    // Sticks and triggers
    for (axis, reading) in &next.axes {
        let previous = prev.and_then(|p| p.axes.get(axis));
        if previous == Some(reading) {
            continue;
        }

        let result = match axis {
            GamepadAxis::LeftStickX => stick_event(Side::Left, StickAxis::X, reading, noise_gate),
            GamepadAxis::LeftStickY => stick_event(Side::Left, StickAxis::Y, reading, noise_gate),
            GamepadAxis::RightStickX => {
                stick_event(Side::Right, StickAxis::X, reading, noise_gate)
            }
            GamepadAxis::RightStickY => {
                stick_event(Side::Right, StickAxis::Y, reading, noise_gate)
            }
            GamepadAxis::LeftTrigger => trigger_event(Side::Left, previous, reading),
            GamepadAxis::RightTrigger => trigger_event(Side::Right, previous, reading),
            GamepadAxis::DpadX | GamepadAxis::DpadY => Ok(None),
        };

        match result {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => warn!("Dropping {}", e),
        }
    }

    // D-pad
    let raw_x = hat_value(next, GamepadAxis::DpadX);
    let raw_y = hat_value(next, GamepadAxis::DpadY);
    let direction = DpadDirection::from_raw(raw_x as i32, raw_y as i32);
    let previous_direction = prev
        .map(|p| {
            DpadDirection::from_raw(
                hat_value(p, GamepadAxis::DpadX) as i32,
                hat_value(p, GamepadAxis::DpadY) as i32,
            )
        })
        .unwrap_or(DpadDirection::Neutral);
    if direction != previous_direction {
        events.push(EventPayload::GamepadDpad(GamepadDpad {
            id: "dpad_0".to_string(),
            direction,
            raw_x,
            raw_y,
        }));
    }

    events
}

fn button_event(raw_code: u16, state: ButtonState) -> EventPayload {
    EventPayload::GamepadButton(GamepadButton {
        button_name: gamepad_button_name(raw_code),
        raw_code,
        state,
    })
}

fn stick_event(
    stick: Side,
    axis: StickAxis,
    reading: &AxisReading,
    noise_gate: f64,
) -> Result<Option<EventPayload>, MalformedEvent> {
    let (raw_value, normalized_value) = normalize_stick(reading)?;
    if normalized_value.abs() <= noise_gate {
        return Ok(None);
    }
    Ok(Some(EventPayload::GamepadStick(GamepadStick {
        stick,
        axis,
        raw_value,
        normalized_value,
    })))
}

fn trigger_event(
    trigger: Side,
    previous: Option<&AxisReading>,
    reading: &AxisReading,
) -> Result<Option<EventPayload>, MalformedEvent> {
    let pressure = normalize_trigger(reading)?;
    let previous_pressure = match previous {
        Some(p) => normalize_trigger(p).unwrap_or(0),
        None => 0,
    };
    if pressure == previous_pressure {
        return Ok(None);
    }
    Ok(Some(EventPayload::GamepadTrigger(GamepadTrigger {
        trigger,
        pressure,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native_stick(value: i32) -> AxisReading {
        AxisReading::new(value, i16::MIN as i32, i16::MAX as i32)
    }

    fn snapshot_with(axis: GamepadAxis, reading: AxisReading) -> GamepadSnapshot {
        let mut snapshot = GamepadSnapshot::default();
        snapshot.axes.insert(axis, reading);
        snapshot
    }

    #[test]
    fn test_key_events() {
        let down = normalize_key(&rdev::EventType::KeyPress(rdev::Key::KeyA)).unwrap();
        assert_eq!(
            down,
            EventPayload::KeyDown(KeyPress {
                key_code: "KeyA".to_string()
            })
        );

        let up = normalize_key(&rdev::EventType::KeyRelease(rdev::Key::F10)).unwrap();
        assert_eq!(up.subtype(), "key_up");
    }

    #[test]
    fn test_unknown_key_is_dropped() {
        assert!(normalize_key(&rdev::EventType::KeyPress(rdev::Key::Unknown(999))).is_none());
        assert!(normalize_key(&rdev::EventType::ButtonPress(rdev::Button::Left)).is_none());
    }

    #[test]
    fn test_mouse_move_deltas() {
        let mut mouse = MouseNormalizer::new();

        let first = mouse.moved(100.0, 200.0).unwrap().unwrap();
        assert_eq!(
            first,
            EventPayload::MouseMove(MouseMove {
                x: 100.0,
                y: 200.0,
                dx: 0.0,
                dy: 0.0
            })
        );

        let second = mouse.moved(110.0, 195.0).unwrap().unwrap();
        assert_eq!(
            second,
            EventPayload::MouseMove(MouseMove {
                x: 110.0,
                y: 195.0,
                dx: 10.0,
                dy: -5.0
            })
        );

        // Same position again is not a move
        assert!(mouse.moved(110.0, 195.0).unwrap().is_none());
        assert!(mouse.moved(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_click_uses_last_position() {
        let mut mouse = MouseNormalizer::new();
        mouse.moved(5.0, 6.0).unwrap();

        let click = mouse
            .normalize(&rdev::EventType::ButtonPress(rdev::Button::Right))
            .unwrap();
        assert_eq!(
            click,
            EventPayload::MouseClick(MouseClick {
                button: "right".to_string(),
                state: ButtonState::Pressed,
                x: 5.0,
                y: 6.0
            })
        );

        let other = mouse.clicked(&rdev::Button::Unknown(4), ButtonState::Released);
        match other {
            EventPayload::MouseClick(c) => assert_eq!(c.button, "other_4"),
            p => panic!("unexpected payload {:?}", p),
        }
    }

    #[test]
    fn test_scroll() {
        let mut mouse = MouseNormalizer::new();
        let scroll = mouse
            .normalize(&rdev::EventType::Wheel {
                delta_x: 0,
                delta_y: -1,
            })
            .unwrap();
        assert_eq!(
            scroll,
            EventPayload::MouseScroll(MouseScroll {
                delta: -1,
                delta_x: 0
            })
        );
        assert!(mouse.scrolled(0, 0).is_none());
        assert!(mouse
            .normalize(&rdev::EventType::KeyPress(rdev::Key::KeyA))
            .is_none());
    }

    #[test]
    fn test_stick_normalization() {
        let (raw, norm) = normalize_stick(&native_stick(16384)).unwrap();
        assert_eq!(raw, 16384);
        assert!((norm - 0.5).abs() < 0.001);

        let (raw, norm) = normalize_stick(&native_stick(i16::MIN as i32)).unwrap();
        assert_eq!(raw, i16::MIN);
        assert_eq!(norm, -1.0);

        // Non-native range is rescaled
        let (raw, norm) = normalize_stick(&AxisReading::new(255, 0, 255)).unwrap();
        assert_eq!(raw, i16::MAX);
        assert_eq!(norm, 1.0);

        assert!(normalize_stick(&AxisReading::new(0, 10, 10)).is_err());
        assert!(normalize_stick(&AxisReading::new(300, 0, 255)).is_err());
    }

    #[test]
    fn test_trigger_pressure_range() {
        assert_eq!(normalize_trigger(&AxisReading::new(0, 0, 255)).unwrap(), 0);
        assert_eq!(normalize_trigger(&AxisReading::new(255, 0, 255)).unwrap(), 1023);
        assert_eq!(normalize_trigger(&AxisReading::new(512, 0, 1023)).unwrap(), 512);
    }

    #[test]
    fn test_noise_gate_suppresses_small_deflection() {
        let mut gamepad = GamepadNormalizer::new(STICK_NOISE_GATE);
        for value in [0, 1000, -3000, 3276, -3276] {
            let events = gamepad.update(snapshot_with(GamepadAxis::LeftStickX, native_stick(value)));
            assert!(events.is_empty(), "value {} leaked through the gate", value);
        }

        let events = gamepad.update(snapshot_with(GamepadAxis::LeftStickX, native_stick(8000)));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_held_stick_emits_once() {
        let mut gamepad = GamepadNormalizer::new(STICK_NOISE_GATE);
        let held = snapshot_with(GamepadAxis::LeftStickX, native_stick(16384));

        let mut emitted = Vec::new();
        for _ in 0..30 {
            emitted.extend(gamepad.update(held.clone()));
        }

        assert_eq!(emitted.len(), 1);
        match &emitted[0] {
            EventPayload::GamepadStick(stick) => {
                assert_eq!(stick.stick, Side::Left);
                assert_eq!(stick.axis, StickAxis::X);
                assert_eq!(stick.raw_value, 16384);
                assert!((stick.normalized_value - 0.5).abs() < 0.001);
            }
            p => panic!("unexpected payload {:?}", p),
        }
    }

    #[test]
    fn test_button_transitions() {
        let mut gamepad = GamepadNormalizer::new(STICK_NOISE_GATE);

        let mut pressed = GamepadSnapshot::default();
        pressed.pressed.insert(0x130);
        let events = gamepad.update(pressed.clone());
        assert_eq!(events, vec![button_event(0x130, ButtonState::Pressed)]);

        assert!(gamepad.update(pressed).is_empty());

        let events = gamepad.update(GamepadSnapshot::default());
        assert_eq!(events, vec![button_event(0x130, ButtonState::Released)]);

        match button_event(0x2c0, ButtonState::Pressed) {
            EventPayload::GamepadButton(b) => assert_eq!(b.button_name, "button_704"),
            p => panic!("unexpected payload {:?}", p),
        }
    }

    #[test]
    fn test_trigger_and_dpad_changes() {
        let mut gamepad = GamepadNormalizer::new(STICK_NOISE_GATE);

        // Released trigger and centered hat on the first sample emit nothing
        let mut idle = snapshot_with(GamepadAxis::RightTrigger, AxisReading::new(0, 0, 255));
        idle.axes.insert(GamepadAxis::DpadX, AxisReading::new(0, -1, 1));
        idle.axes.insert(GamepadAxis::DpadY, AxisReading::new(0, -1, 1));
        assert!(gamepad.update(idle.clone()).is_empty());

        let mut active = idle.clone();
        active
            .axes
            .insert(GamepadAxis::RightTrigger, AxisReading::new(255, 0, 255));
        active.axes.insert(GamepadAxis::DpadX, AxisReading::new(-1, -1, 1));
        active.axes.insert(GamepadAxis::DpadY, AxisReading::new(1, -1, 1));

        let events = gamepad.update(active);
        assert_eq!(
            events,
            vec![
                EventPayload::GamepadTrigger(GamepadTrigger {
                    trigger: Side::Right,
                    pressure: 1023
                }),
                EventPayload::GamepadDpad(GamepadDpad {
                    id: "dpad_0".to_string(),
                    direction: DpadDirection::UpLeft,
                    raw_x: -1,
                    raw_y: 1
                }),
            ]
        );

        let events = gamepad.update(idle);
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(
            e,
            EventPayload::GamepadDpad(GamepadDpad {
                direction: DpadDirection::Neutral,
                ..
            })
        )));
    }
}
