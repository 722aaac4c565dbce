//! Bounded reordering of events across sources

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::data::NormalizedEvent;

#[derive(Debug)]
struct PendingEvent {
    timestamp_ms: u64,
    sequence: u64,
    event: NormalizedEvent,
}

impl Ord for PendingEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior.
        other
            .timestamp_ms
            .cmp(&self.timestamp_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingEvent {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp_ms == other.timestamp_ms && self.sequence == other.sequence
    }
}

impl Eq for PendingEvent {}

/// Holds events until nothing older can still arrive within `window_ms`.
///
/// Events leave in `(timestamp_ms, arrival)` order, so equal timestamps keep
/// the order they were queued in. An event that arrives later than the
/// window allows is released as soon as possible; it is never dropped.
#[derive(Debug)]
pub struct ReorderBuffer {
    window_ms: u64,
    heap: BinaryHeap<PendingEvent>,
    next_sequence: u64,
    newest_ms: u64,
}

impl ReorderBuffer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            heap: BinaryHeap::new(),
            next_sequence: 0,
            newest_ms: 0,
        }
    }

    pub fn push(&mut self, event: NormalizedEvent) {
        self.newest_ms = self.newest_ms.max(event.timestamp_ms);
        self.heap.push(PendingEvent {
            timestamp_ms: event.timestamp_ms,
            sequence: self.next_sequence,
            event,
        });
        self.next_sequence += 1;
    }

    /// Events older than the newest timestamp minus the window
    pub fn pop_ready(&mut self) -> Vec<NormalizedEvent> {
        let mut ready = Vec::new();
        while self.heap.peek().map_or(false, |top| {
            top.timestamp_ms.saturating_add(self.window_ms) <= self.newest_ms
        }) {
            if let Some(pending) = self.heap.pop() {
                ready.push(pending.event);
            }
        }
        ready
    }

    /// Everything still held, in order
    pub fn drain(&mut self) -> Vec<NormalizedEvent> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(pending) = self.heap.pop() {
            all.push(pending.event);
        }
        all
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
