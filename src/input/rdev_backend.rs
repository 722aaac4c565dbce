//! rdev-based keyboard/mouse hook
//! Works on Windows, macOS, and Linux (X11)

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::{HookFilter, HookRouter, InputHook, RawInput};

/// Process-wide rdev listener feeding a [`HookRouter`]
pub struct RdevHook {
    router: Arc<HookRouter>,
    listening: AtomicBool,
}

impl RdevHook {
    pub fn new() -> Self {
        Self {
            router: HookRouter::new(),
            listening: AtomicBool::new(false),
        }
    }

    /// Install the platform hook on a dedicated thread.
    ///
    /// `rdev::listen` never returns while the hook is healthy, so the thread
    /// lives until the process exits.
    pub fn start(&self) -> Result<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let router = self.router.clone();
        let hook_router = self.router.clone();
        thread::Builder::new()
            .name("rdev-hook".to_string())
            .spawn(move || {
                // Tell rdev we're NOT on the main thread so it dispatches TSM
                // calls to the main thread via GCD (macOS)
                rdev::set_is_main_thread(false);

                info!("rdev input hook started");

                let callback = move |event: rdev::Event| {
                    hook_router.dispatch(RawInput::now(event.event_type));
                };

                if let Err(e) = rdev::listen(callback) {
                    error!("rdev listen error: {:?}", e);
                }

                // Let subscribed sources see the end of their streams
                router.close();
                info!("rdev input hook stopped");
            })?;

        Ok(())
    }
}

impl Default for RdevHook {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHook for RdevHook {
    fn subscribe(&self, filter: HookFilter) -> mpsc::UnboundedReceiver<RawInput> {
        self.router.subscribe(filter)
    }
}
