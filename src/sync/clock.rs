//! Recording-relative clock
//!
//! A [`SessionClock`] is created once per recording session from the start
//! notification and maps monotonic capture instants to milliseconds since
//! that anchor. It is `Copy`, so every capture source carries its own handle
//! and no source has to lock anything to stamp an event.

use chrono::{DateTime, Utc};
use std::time::Instant;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    anchor: Instant,
    started_at: DateTime<Utc>,
}

impl SessionClock {
    pub fn new(anchor: Instant, started_at: DateTime<Utc>) -> Self {
        Self { anchor, started_at }
    }

    /// Anchor the clock at the current instant
    pub fn now() -> Self {
        Self::new(Instant::now(), Utc::now())
    }

    pub fn anchor(&self) -> Instant {
        self.anchor
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds between the anchor and `captured_at`, floored.
    ///
    /// Captures that predate the anchor map to 0.
    pub fn align(&self, captured_at: Instant) -> u64 {
        captured_at.saturating_duration_since(self.anchor).as_millis() as u64
    }
}

/// Align against an optional session clock
pub fn align(clock: Option<&SessionClock>, captured_at: Instant) -> Result<u64, SyncError> {
    clock
        .map(|c| c.align(captured_at))
        .ok_or(SyncError::NoActiveSession)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_align_floors_to_millis() {
        let anchor = Instant::now();
        let clock = SessionClock::new(anchor, Utc::now());
        assert_eq!(clock.align(anchor), 0);
        assert_eq!(clock.align(anchor + Duration::from_micros(49_999)), 49);
        assert_eq!(clock.align(anchor + Duration::from_millis(50)), 50);
    }

    #[test]
    fn test_align_is_monotonic() {
        let anchor = Instant::now();
        let clock = SessionClock::new(anchor, Utc::now());
        let mut previous = 0;
        for step in 0..2_000u64 {
            let t = anchor + Duration::from_micros(step * 377);
            let ms = clock.align(t);
            assert!(ms >= previous);
            previous = ms;
        }
    }

    #[test]
    fn test_capture_before_anchor_clamps_to_zero() {
        let earlier = Instant::now();
        let clock = SessionClock::new(earlier + Duration::from_millis(10), Utc::now());
        assert_eq!(clock.align(earlier), 0);
    }

    #[test]
    fn test_align_without_session_fails() {
        let err = align(None, Instant::now()).unwrap_err();
        assert!(matches!(err, SyncError::NoActiveSession));

        let clock = SessionClock::now();
        let at = clock.anchor() + Duration::from_millis(5);
        assert_eq!(align(Some(&clock), at).unwrap(), 5);
    }
}
