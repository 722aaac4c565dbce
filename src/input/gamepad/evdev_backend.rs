//! evdev-based gamepad sampling for Linux
//! Requires read access to /dev/input (usually the 'input' group)

use anyhow::Result;
use evdev::{AbsoluteAxisType, Device, Key};
use std::path::PathBuf;
use tracing::{debug, info};

use super::{AxisReading, GamepadAxis, GamepadDevice, GamepadProvider, GamepadSnapshot};
use crate::data::SourceKind;
use crate::error::SyncError;

/// Buttons read on every poll
const GAMEPAD_BUTTONS: [Key; 11] = [
    Key::BTN_SOUTH,
    Key::BTN_EAST,
    Key::BTN_NORTH,
    Key::BTN_WEST,
    Key::BTN_TL,
    Key::BTN_TR,
    Key::BTN_SELECT,
    Key::BTN_START,
    Key::BTN_MODE,
    Key::BTN_THUMBL,
    Key::BTN_THUMBR,
];

const GAMEPAD_AXES: [(GamepadAxis, AbsoluteAxisType); 8] = [
    (GamepadAxis::LeftStickX, AbsoluteAxisType::ABS_X),
    (GamepadAxis::LeftStickY, AbsoluteAxisType::ABS_Y),
    (GamepadAxis::RightStickX, AbsoluteAxisType::ABS_RX),
    (GamepadAxis::RightStickY, AbsoluteAxisType::ABS_RY),
    (GamepadAxis::LeftTrigger, AbsoluteAxisType::ABS_Z),
    (GamepadAxis::RightTrigger, AbsoluteAxisType::ABS_RZ),
    (GamepadAxis::DpadX, AbsoluteAxisType::ABS_HAT0X),
    (GamepadAxis::DpadY, AbsoluteAxisType::ABS_HAT0Y),
];

pub struct EvdevGamepads;

impl GamepadProvider for EvdevGamepads {
    fn count(&self) -> usize {
        enumerate_gamepads().len()
    }

    fn open(&self, index: usize) -> Result<Option<Box<dyn GamepadDevice>>> {
        let mut pads = enumerate_gamepads();
        if index >= pads.len() {
            return Ok(None);
        }
        let (path, device) = pads.swap_remove(index);
        let gamepad = EvdevGamepad::new(path, device);
        info!("Opened gamepad {}: {}", index, gamepad.name);
        Ok(Some(Box::new(gamepad)))
    }
}

/// Gamepads sorted by device path so indices are stable between calls
fn enumerate_gamepads() -> Vec<(PathBuf, Device)> {
    let mut pads: Vec<(PathBuf, Device)> = evdev::enumerate()
        .filter(|(path, device)| {
            let is_pad = device
                .supported_keys()
                .map_or(false, |keys| keys.contains(Key::BTN_SOUTH));
            if !is_pad {
                debug!("Skipping non-gamepad input device {:?}", path);
            }
            is_pad
        })
        .collect();
    pads.sort_by(|a, b| a.0.cmp(&b.0));
    pads
}

struct EvdevGamepad {
    device: Device,
    path: PathBuf,
    name: String,
    axes: Vec<(GamepadAxis, AbsoluteAxisType)>,
}

impl EvdevGamepad {
    fn new(path: PathBuf, device: Device) -> Self {
        let name = device.name().unwrap_or("Unknown Gamepad").to_string();
        let axes = GAMEPAD_AXES
            .iter()
            .copied()
            .filter(|(_, abs)| {
                device
                    .supported_absolute_axes()
                    .map_or(false, |supported| supported.contains(*abs))
            })
            .collect();
        Self {
            device,
            path,
            name,
            axes,
        }
    }

    fn disconnected(&self, e: std::io::Error) -> SyncError {
        SyncError::DeviceDisconnected {
            source_kind: SourceKind::Gamepad,
            reason: format!("{:?}: {}", self.path, e),
        }
    }
}

impl GamepadDevice for EvdevGamepad {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self) -> Result<GamepadSnapshot, SyncError> {
        let keys = self.device.get_key_state().map_err(|e| self.disconnected(e))?;
        let abs = self.device.get_abs_state().map_err(|e| self.disconnected(e))?;

        let mut snapshot = GamepadSnapshot::default();
        for key in GAMEPAD_BUTTONS {
            if keys.contains(key) {
                snapshot.pressed.insert(key.code());
            }
        }

        for (axis, abs_type) in &self.axes {
            let info = abs[abs_type.0 as usize];
            let reading = if *axis == GamepadAxis::DpadY {
                // evdev reports hat "up" as negative
                AxisReading::new(-info.value, -info.maximum, -info.minimum)
            } else {
                AxisReading::new(info.value, info.minimum, info.maximum)
            };
            snapshot.axes.insert(*axis, reading);
        }

        Ok(snapshot)
    }
}
