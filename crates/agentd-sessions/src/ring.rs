use std::collections::VecDeque;

use agentd_domain::model::DebugEvent;

/// Bounded ring buffer for a session's debug events.
///
/// Capped by *both* event count and total byte size; eviction is FIFO
/// from the front until both bounds are satisfied. `seq` is a
/// monotonic counter that keeps advancing even as older events are
/// evicted, so a reader can tell how much it missed.
pub struct DebugRing {
    events: VecDeque<DebugEvent>,
    total_bytes: usize,
    max_events: usize,
    max_bytes: usize,
    next_seq: u64,
}

impl DebugRing {
    pub fn new(max_events: usize, max_bytes: usize) -> Self {
        Self {
            events: VecDeque::new(),
            total_bytes: 0,
            max_events,
            max_bytes,
            next_seq: 0,
        }
    }

    /// Assign the next sequence number and push. Returns the stamped event.
    pub fn push(&mut self, mut event: DebugEvent) -> DebugEvent {
        event.seq = self.next_seq;
        self.next_seq += 1;
        self.total_bytes += event.byte_len();
        self.events.push_back(event.clone());

        while (self.events.len() > self.max_events || self.total_bytes > self.max_bytes)
            && !self.events.is_empty()
        {
            if let Some(evicted) = self.events.pop_front() {
                self.total_bytes = self.total_bytes.saturating_sub(evicted.byte_len());
            }
        }
        event
    }

    /// Tail of the ring (oldest-first within the returned window).
    pub fn tail(&self, lines: usize) -> Vec<DebugEvent> {
        let start = self.events.len().saturating_sub(lines);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}
