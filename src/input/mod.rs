//! Input devices: the keyboard/mouse hook, gamepad sampling and normalization

mod backend;
pub mod gamepad;
pub mod hotkey;
pub mod normalize;
pub(crate) mod rdev_backend;

pub use backend::*;
pub use gamepad::{create_gamepad_provider, GamepadDevice, GamepadProvider, GamepadSnapshot};
pub use normalize::{normalize_key, GamepadNormalizer, MouseNormalizer};
pub use rdev_backend::RdevHook;
