//! Manual stop hotkey

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{HookFilter, InputHook};
use crate::sync::EngineCommand;

/// Parse a hotkey name such as "F10" or "Escape"
pub fn parse_hotkey(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    let key = match name.trim().to_ascii_lowercase().as_str() {
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "escape" | "esc" => Key::Escape,
        "pause" => Key::Pause,
        "scrolllock" => Key::ScrollLock,
        "printscreen" => Key::PrintScreen,
        "insert" => Key::Insert,
        "end" => Key::End,
        "home" => Key::Home,
        _ => return None,
    };
    Some(key)
}

/// Send `StopRecording` whenever `key` is pressed.
///
/// The watcher has its own hook subscription, so the hotkey press is still
/// logged as a normal keyboard event.
pub fn spawn_hotkey_watcher(
    hook: &dyn InputHook,
    key: rdev::Key,
    cmd_tx: mpsc::Sender<EngineCommand>,
) -> JoinHandle<()> {
    let mut rx = hook.subscribe(HookFilter::Keyboard);
    info!("Manual stop hotkey: {:?}", key);

    tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            if matches!(raw.event, rdev::EventType::KeyPress(k) if k == key) {
                debug!("Stop hotkey pressed");
                if cmd_tx.send(EngineCommand::StopRecording).await.is_err() {
                    break;
                }
            }
        }
    })
}
