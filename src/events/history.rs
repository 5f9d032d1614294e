//! Append-only record of every event published on a bus.
//!
//! The recorder sits beside the delivery path, never inside it: a bus built
//! without history routes events exactly the same way.

use super::Event;
use parking_lot::Mutex;
use std::sync::Arc;

/// Unbounded, ordered event log.
///
/// Cloning yields another handle onto the same log.
#[derive(Clone, Default)]
pub struct EventHistory {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn record(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }

    /// All recorded events in publish order.
    pub fn all(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Number of recorded events equal to `event`.
    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Total number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
