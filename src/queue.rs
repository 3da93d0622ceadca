//! The dispatcher's event queue: a min-heap ordered by `(priority, sequence)`
//! so higher-priority events are popped first and equal-priority events stay
//! FIFO. Grounded on circuits' `heapq`-backed `_queue` in `manager.py`
//! (`heappush(self._queue, (-priority, next(self._counter), event, channel,
//! handler_errors))` — negated because `heapq` is a min-heap and circuits
//! wants higher priority first).

use crate::events::EventHandle;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry {
    priority: i32,
    sequence: u64,
    channels: Vec<String>,
    event: EventHandle,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; higher priority and a lower sequence
        // number (arrived earlier) should sort "greater" so they pop first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Entry>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, event: EventHandle, channels: Vec<String>, priority: i32, sequence: u64) {
        self.heap.push(Entry {
            priority,
            sequence,
            channels,
            event,
        });
    }

    pub fn pop(&mut self) -> Option<(EventHandle, Vec<String>)> {
        self.heap.pop().map(|e| (e.event, e.channels))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
