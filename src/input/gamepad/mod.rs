//! Gamepad device abstraction
//!
//! Gamepads are sampled rather than hooked: a [`GamepadDevice`] returns a
//! full [`GamepadSnapshot`] of buttons and axes on every poll, and the
//! capture loop diffs consecutive snapshots.

#[cfg(target_os = "linux")]
mod evdev_backend;

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::SyncError;

/// Logical gamepad axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GamepadAxis {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftTrigger,
    RightTrigger,
    DpadX,
    DpadY,
}

/// One axis value with the device-reported range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisReading {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
}

impl AxisReading {
    pub fn new(value: i32, minimum: i32, maximum: i32) -> Self {
        Self {
            value,
            minimum,
            maximum,
        }
    }
}

/// Full controller state at one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GamepadSnapshot {
    /// Raw codes of the buttons currently held
    pub pressed: BTreeSet<u16>,

    /// Axes the device reported
    pub axes: BTreeMap<GamepadAxis, AxisReading>,
}

/// A single opened gamepad
pub trait GamepadDevice: Send {
    fn name(&self) -> &str;

    /// Read the current state. Fails with `DeviceDisconnected` once the
    /// device is gone.
    fn poll(&mut self) -> Result<GamepadSnapshot, SyncError>;
}

/// Enumerates and opens gamepads
pub trait GamepadProvider: Send + Sync {
    fn count(&self) -> usize;

    /// Open the gamepad at `index`, or `None` if there is no such device
    fn open(&self, index: usize) -> Result<Option<Box<dyn GamepadDevice>>>;
}

/// Provider for platforms without a gamepad backend
pub struct NoGamepads;

impl GamepadProvider for NoGamepads {
    fn count(&self) -> usize {
        0
    }

    fn open(&self, _index: usize) -> Result<Option<Box<dyn GamepadDevice>>> {
        Ok(None)
    }
}

/// Create the gamepad provider for the current platform
pub fn create_gamepad_provider() -> Arc<dyn GamepadProvider> {
    #[cfg(target_os = "linux")]
    {
        tracing::info!("Using evdev backend for gamepad capture");
        return Arc::new(evdev_backend::EvdevGamepads);
    }

    #[cfg(not(target_os = "linux"))]
    {
        tracing::warn!("Gamepad capture is not supported on this platform");
        Arc::new(NoGamepads)
    }
}
