//! Input hook trait and subscriber routing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

/// A raw keyboard or mouse event as delivered by the platform hook
#[derive(Debug, Clone)]
pub struct RawInput {
    /// Instant the hook callback fired
    pub captured_at: Instant,

    pub event: rdev::EventType,
}

impl RawInput {
    pub fn now(event: rdev::EventType) -> Self {
        Self {
            captured_at: Instant::now(),
            event,
        }
    }
}

/// Which raw events a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFilter {
    Keyboard,
    Mouse,
}

impl HookFilter {
    pub fn accepts(&self, event: &rdev::EventType) -> bool {
        let is_keyboard = matches!(
            event,
            rdev::EventType::KeyPress(_) | rdev::EventType::KeyRelease(_)
        );
        match self {
            HookFilter::Keyboard => is_keyboard,
            HookFilter::Mouse => !is_keyboard,
        }
    }
}

/// Trait for process-wide keyboard/mouse hooks.
///
/// Platform hooks cannot be torn down and re-installed cheaply, so the hook
/// stays up for the life of the process and capture sources subscribe to it
/// for the duration of a session. Dropping the receiver unsubscribes.
pub trait InputHook: Send + Sync {
    fn subscribe(&self, filter: HookFilter) -> mpsc::UnboundedReceiver<RawInput>;
}

/// Fans raw events out to the current subscribers
#[derive(Default)]
pub struct HookRouter {
    subscribers: Mutex<Vec<(HookFilter, mpsc::UnboundedSender<RawInput>)>>,
    closed: AtomicBool,
}

impl HookRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver one raw event; subscribers whose receiver is gone are pruned
    pub fn dispatch(&self, raw: RawInput) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|(filter, tx)| {
            if !filter.accepts(&raw.event) {
                return !tx.is_closed();
            }
            tx.send(raw.clone()).is_ok()
        });
    }

    /// The hook is gone for good: end every subscription, current and future
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.clear();
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl InputHook for HookRouter {
    fn subscribe(&self, filter: HookFilter) -> mpsc::UnboundedReceiver<RawInput> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.closed.load(Ordering::SeqCst) {
            return rx;
        }
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push((filter, tx));
        rx
    }
}
