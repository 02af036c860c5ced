use std::num::NonZeroUsize;
use std::sync::Mutex;

use metrics::gauge;

use crate::event::LogEvent;

/// In-memory staging area for events awaiting a flush.
///
/// A single lock covers append and drain, so a fully appended event
/// lands in exactly one drained batch: either the one being taken or
/// the next one. The lock is synchronous and never held across an
/// await.
pub struct EventBuffer {
    events: Mutex<Vec<LogEvent>>,
    batch_size: usize,
}

impl EventBuffer {
    pub fn new(batch_size: NonZeroUsize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            batch_size: batch_size.get(),
        }
    }

    /// Appends one event at the tail. Returns true when the buffer has
    /// reached the configured batch size and the caller should flush.
    pub fn append(&self, event: LogEvent) -> bool {
        let mut events = self.events.lock().expect("poisoned EventBuffer lock");
        events.push(event);
        gauge!("audit_log_buffered_events").set(events.len() as f64);
        events.len() >= self.batch_size
    }

    /// Takes the whole pending sequence in submission order, leaving the
    /// buffer empty. Returns an empty batch when there is nothing to
    /// flush.
    pub fn drain(&self) -> Vec<LogEvent> {
        let mut events = self.events.lock().expect("poisoned EventBuffer lock");
        let batch = std::mem::take(&mut *events);
        gauge!("audit_log_buffered_events").set(0.0);
        batch
    }
}
