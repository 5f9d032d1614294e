//! Event values exchanged between watches and their consumers.

use std::fmt;

/// Classification of events carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// A watch's poll timer fired; addressed to `<watch-name>.poll`.
    TimerExpired,
    /// The observed upstream state differs from the previous snapshot.
    StatusChanged,
    /// The last check succeeded.
    StatusHealthy,
    /// The last check failed.
    StatusUnhealthy,
    /// Stop processing. Delivered to every subscriber regardless of source.
    Quit,
}

impl EventCode {
    /// Control codes ignore subscriber filters.
    pub fn is_broadcast(self) -> bool {
        matches!(self, EventCode::Quit)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventCode::TimerExpired => "TimerExpired",
            EventCode::StatusChanged => "StatusChanged",
            EventCode::StatusHealthy => "StatusHealthy",
            EventCode::StatusUnhealthy => "StatusUnhealthy",
            EventCode::Quit => "Quit",
        };
        f.write_str(name)
    }
}

/// An immutable `{code, source}` pair.
///
/// `source` is a correlation key: the watch name for status events and
/// `<watch-name>.poll` for a watch's own timer events. Equality is value
/// equality of the pair, so events can be counted in a `HashMap`.
///
/// # Examples
///
/// ```rust
/// use watchkeeper::events::{Event, EventCode};
///
/// let ev = Event::new(EventCode::StatusChanged, "watch.upstream");
/// assert_eq!(ev, Event::new(EventCode::StatusChanged, "watch.upstream"));
/// assert_eq!(ev.to_string(), "StatusChanged:watch.upstream");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    /// What happened
    pub code: EventCode,
    /// Who it is about
    pub source: String,
}

impl Event {
    /// Create an event.
    pub fn new(code: EventCode, source: impl Into<String>) -> Self {
        Self {
            code,
            source: source.into(),
        }
    }

    /// Timer event addressed to the given poll source.
    pub fn timer_expired(poll_source: impl Into<String>) -> Self {
        Self::new(EventCode::TimerExpired, poll_source)
    }

    /// Quit event; `source` names the requester.
    pub fn quit(source: impl Into<String>) -> Self {
        Self::new(EventCode::Quit, source)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_value_equality() {
        let a = Event::new(EventCode::StatusHealthy, "watch.a");
        let b = Event::new(EventCode::StatusHealthy, "watch.a");
        let c = Event::new(EventCode::StatusHealthy, "watch.b");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut counts = HashMap::new();
        *counts.entry(a).or_insert(0) += 1;
        *counts.entry(b).or_insert(0) += 1;
        assert_eq!(counts.len(), 1);
    }

    #[test]
    fn test_only_quit_is_broadcast() {
        assert!(EventCode::Quit.is_broadcast());
        assert!(!EventCode::TimerExpired.is_broadcast());
        assert!(!EventCode::StatusChanged.is_broadcast());
    }
}
