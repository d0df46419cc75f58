//! Deferred dispatch queue
//!
//! Messages from bundles whose timetag lies in the future wait here, sorted
//! by timetag. Entries with equal timetags keep their arrival order.

use crate::protocol::Message;
use crate::types::Timetag;

/// Delay reported when nothing is queued, and the upper bound of any delay
pub const MAX_EVENT_DELAY: f64 = 100.0;

/// A message waiting for its timetag
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub timetag: Timetag,
    pub path: String,
    pub message: Message,
}

#[derive(Debug, Default)]
pub struct DispatchQueue {
    entries: Vec<QueuedMessage>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after every entry due at or before `timetag`
    pub fn push(&mut self, timetag: Timetag, path: String, message: Message) {
        let at = self.entries.partition_point(|q| q.timetag <= timetag);
        self.entries.insert(
            at,
            QueuedMessage {
                timetag,
                path,
                message,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timetag of the earliest entry
    pub fn next_timetag(&self) -> Option<Timetag> {
        self.entries.first().map(|q| q.timetag)
    }

    /// Seconds until the earliest entry is due, clamped to
    /// `[0, MAX_EVENT_DELAY]`
    pub fn next_event_delay(&self, now: Timetag) -> f64 {
        match self.next_timetag() {
            Some(ts) => ts.diff(&now).clamp(0.0, MAX_EVENT_DELAY),
            None => MAX_EVENT_DELAY,
        }
    }

    /// Removes the earliest entry together with every entry simultaneous
    /// with it, or the whole queue when `all` is set.
    pub fn pop_batch(&mut self, all: bool) -> Vec<QueuedMessage> {
        let Some(head) = self.next_timetag() else {
            return Vec::new();
        };
        let count = if all {
            self.entries.len()
        } else {
            self.entries
                .partition_point(|q| q.timetag.diff(&head) < f32::EPSILON as f64)
        };
        self.entries.drain(..count).collect()
    }
}
