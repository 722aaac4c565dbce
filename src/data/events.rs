//! Normalized input event data structures
//!
//! Every line after the metadata record in a session log is one
//! [`NormalizedEvent`]. On the wire it is a flat object
//! `{source, subtype, timestamp_ms, payload}`; in memory the payload is a
//! sum type keyed by `(source, subtype)` so each variant carries a fixed,
//! validated field set.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Device family an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Mouse,
    Keyboard,
    Gamepad,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Mouse => "mouse",
            SourceKind::Keyboard => "keyboard",
            SourceKind::Gamepad => "gamepad",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Press state shared by mouse and gamepad buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonState {
    Pressed,
    Released,
}

/// Left or right stick / trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Stick axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickAxis {
    X,
    Y,
}

/// Eight-way d-pad direction plus neutral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DpadDirection {
    Neutral,
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl DpadDirection {
    /// Direction for a hat position. Positive y is up, positive x is right.
    ///
    /// Only the sign of each coordinate matters, so this is total over all
    /// integer pairs.
    pub fn from_raw(raw_x: i32, raw_y: i32) -> Self {
        match (raw_x.signum(), raw_y.signum()) {
            (0, 0) => DpadDirection::Neutral,
            (0, 1) => DpadDirection::Up,
            (0, _) => DpadDirection::Down,
            (1, 0) => DpadDirection::Right,
            (_, 0) => DpadDirection::Left,
            (1, 1) => DpadDirection::UpRight,
            (_, 1) => DpadDirection::UpLeft,
            (1, _) => DpadDirection::DownRight,
            (_, _) => DpadDirection::DownLeft,
        }
    }
}

/// Absolute cursor position plus delta from the previous move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseMove {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
}

/// Mouse button transition at the last known cursor position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseClick {
    /// left, right, middle or other_N
    pub button: String,
    pub state: ButtonState,
    pub x: f64,
    pub y: f64,
}

/// Wheel movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseScroll {
    /// Vertical wheel delta (positive = away from the user)
    pub delta: i64,
    /// Horizontal wheel delta
    pub delta_x: i64,
}

/// Key transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPress {
    /// Platform-independent key name, e.g. "KeyA", "F10", "ShiftLeft"
    pub key_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadButton {
    pub button_name: String,
    pub raw_code: u16,
    pub state: ButtonState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadStick {
    pub stick: Side,
    pub axis: StickAxis,
    pub raw_value: i16,
    pub normalized_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadTrigger {
    pub trigger: Side,
    /// 0 (released) ..= 1023 (fully pressed)
    pub pressure: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadDpad {
    pub id: String,
    pub direction: DpadDirection,
    pub raw_x: i8,
    pub raw_y: i8,
}

/// Subtype-specific payload. The variant determines both `source` and `subtype`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    MouseMove(MouseMove),
    MouseClick(MouseClick),
    MouseScroll(MouseScroll),
    KeyDown(KeyPress),
    KeyUp(KeyPress),
    GamepadButton(GamepadButton),
    GamepadStick(GamepadStick),
    GamepadTrigger(GamepadTrigger),
    GamepadDpad(GamepadDpad),
}

impl EventPayload {
    pub fn source(&self) -> SourceKind {
        match self {
            EventPayload::MouseMove(_)
            | EventPayload::MouseClick(_)
            | EventPayload::MouseScroll(_) => SourceKind::Mouse,
            EventPayload::KeyDown(_) | EventPayload::KeyUp(_) => SourceKind::Keyboard,
            EventPayload::GamepadButton(_)
            | EventPayload::GamepadStick(_)
            | EventPayload::GamepadTrigger(_)
            | EventPayload::GamepadDpad(_) => SourceKind::Gamepad,
        }
    }

    pub fn subtype(&self) -> &'static str {
        match self {
            EventPayload::MouseMove(_) => "move",
            EventPayload::MouseClick(_) => "click",
            EventPayload::MouseScroll(_) => "scroll",
            EventPayload::KeyDown(_) => "key_down",
            EventPayload::KeyUp(_) => "key_up",
            EventPayload::GamepadButton(_) => "button",
            EventPayload::GamepadStick(_) => "stick",
            EventPayload::GamepadTrigger(_) => "trigger",
            EventPayload::GamepadDpad(_) => "dpad",
        }
    }
}

/// One aligned input occurrence, as written to the session log
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "EventRecord")]
pub struct NormalizedEvent {
    /// Milliseconds since the recording session started
    pub timestamp_ms: u64,

    pub payload: EventPayload,
}

impl NormalizedEvent {
    pub fn new(timestamp_ms: u64, payload: EventPayload) -> Self {
        Self {
            timestamp_ms,
            payload,
        }
    }

    pub fn source(&self) -> SourceKind {
        self.payload.source()
    }

    pub fn subtype(&self) -> &'static str {
        self.payload.subtype()
    }

    /// Index of the video frame this event falls into at the given frame rate
    pub fn frame_index(&self, fps: f64) -> u64 {
        if fps <= 0.0 {
            return 0;
        }
        (self.timestamp_ms as f64 * fps / 1000.0).floor() as u64
    }
}

impl Serialize for NormalizedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("NormalizedEvent", 4)?;
        record.serialize_field("source", &self.source())?;
        record.serialize_field("subtype", self.subtype())?;
        record.serialize_field("timestamp_ms", &self.timestamp_ms)?;
        match &self.payload {
            EventPayload::MouseMove(p) => record.serialize_field("payload", p)?,
            EventPayload::MouseClick(p) => record.serialize_field("payload", p)?,
            EventPayload::MouseScroll(p) => record.serialize_field("payload", p)?,
            EventPayload::KeyDown(p) | EventPayload::KeyUp(p) => {
                record.serialize_field("payload", p)?
            }
            EventPayload::GamepadButton(p) => record.serialize_field("payload", p)?,
            EventPayload::GamepadStick(p) => record.serialize_field("payload", p)?,
            EventPayload::GamepadTrigger(p) => record.serialize_field("payload", p)?,
            EventPayload::GamepadDpad(p) => record.serialize_field("payload", p)?,
        }
        record.end()
    }
}

/// Loosely-typed wire form, validated into a [`NormalizedEvent`] on read
#[derive(Debug, Deserialize)]
pub struct EventRecord {
    source: SourceKind,
    subtype: String,
    timestamp_ms: u64,
    payload: serde_json::Value,
}

impl TryFrom<EventRecord> for NormalizedEvent {
    type Error = String;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        fn parse<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, String> {
            serde_json::from_value(value).map_err(|e| e.to_string())
        }

        let payload = match (record.source, record.subtype.as_str()) {
            (SourceKind::Mouse, "move") => EventPayload::MouseMove(parse(record.payload)?),
            (SourceKind::Mouse, "click") => EventPayload::MouseClick(parse(record.payload)?),
            (SourceKind::Mouse, "scroll") => EventPayload::MouseScroll(parse(record.payload)?),
            (SourceKind::Keyboard, "key_down") => EventPayload::KeyDown(parse(record.payload)?),
            (SourceKind::Keyboard, "key_up") => EventPayload::KeyUp(parse(record.payload)?),
            (SourceKind::Gamepad, "button") => EventPayload::GamepadButton(parse(record.payload)?),
            (SourceKind::Gamepad, "stick") => EventPayload::GamepadStick(parse(record.payload)?),
            (SourceKind::Gamepad, "trigger") => {
                EventPayload::GamepadTrigger(parse(record.payload)?)
            }
            (SourceKind::Gamepad, "dpad") => EventPayload::GamepadDpad(parse(record.payload)?),
            (source, subtype) => {
                return Err(format!("unknown subtype '{}' for source '{}'", subtype, source))
            }
        };

        Ok(NormalizedEvent {
            timestamp_ms: record.timestamp_ms,
            payload,
        })
    }
}
