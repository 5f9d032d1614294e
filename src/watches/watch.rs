//! The watch actor: one timer, one serial inbox, one backend.

use super::WatchConfig;
use crate::events::{Event, EventBus, EventCode, SubscriberFilter};
use parking_lot::RwLock;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

// Stand-in deadline for intervals too long to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Timer expiry `interval` from now.
fn next_deadline(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Lifecycle of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Waiting for the next timer expiry
    Idle,
    /// A backend check is in flight
    Polling,
    /// Terminal; no more checks
    Stopped,
}

/// Periodically checks one backend for one target and publishes the result.
///
/// Each poll publishes `TimerExpired` to `<name>.poll`; the watch handles it
/// from its own inbox, runs one check, publishes status events under `<name>`
/// and only then re-arms the timer. At most one check is ever in flight.
pub struct Watch {
    config: WatchConfig,
    fields: Vec<String>,
    poll_source: String,
    state: Arc<RwLock<WatchState>>,
}

impl Watch {
    /// Create a watch for a validated config.
    pub fn new(config: WatchConfig) -> Self {
        Self {
            fields: config.request_fields(),
            poll_source: config.poll_source(),
            config,
            state: Arc::new(RwLock::new(WatchState::Idle)),
        }
    }

    /// Event source of this watch.
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Attach to `bus` and start polling on the bus's task tracker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(self, bus: &EventBus) -> WatchHandle {
        let subscription = bus.subscribe(SubscriberFilter::source(self.poll_source.clone()));
        let (inbox, direct) = mpsc::unbounded_channel();
        let handle_state = Arc::clone(&self.state);
        let name = self.config.name().to_string();

        let task_bus = bus.clone();
        let task = bus.spawn(async move {
            let (_registration, from_bus) = subscription.into_parts();
            self.run_loop(&task_bus, from_bus, direct).await;
        });

        WatchHandle {
            name,
            inbox,
            state: handle_state,
            task,
        }
    }

    async fn run_loop(
        self,
        bus: &EventBus,
        mut from_bus: mpsc::UnboundedReceiver<Event>,
        mut direct: mpsc::UnboundedReceiver<Event>,
    ) {
        let shutdown = bus.shutdown_token();
        let interval = self.config.poll_interval();
        let mut deadline = Some(next_deadline(interval));
        let mut direct_open = true;

        info!(watch = %self.name(), ?interval, "watch started");
        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                received = direct.recv(), if direct_open => match received {
                    Some(event) => event,
                    None => {
                        direct_open = false;
                        continue;
                    }
                },
                received = from_bus.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    bus.publish(Event::timer_expired(self.poll_source.clone()));
                    continue;
                }
            };

            match self.handle(bus, &event).await {
                ControlFlow::Break(()) => break,
                ControlFlow::Continue(rearm) => {
                    if rearm {
                        deadline = Some(next_deadline(interval));
                    }
                }
            }
        }

        *self.state.write() = WatchState::Stopped;
        info!(watch = %self.name(), "watch stopped");
    }

    /// React to one inbox event. `Continue(true)` re-arms the timer.
    async fn handle(&self, bus: &EventBus, event: &Event) -> ControlFlow<(), bool> {
        match event.code {
            EventCode::Quit => ControlFlow::Break(()),
            EventCode::TimerExpired if event.source == self.poll_source => {
                self.check(bus).await;
                ControlFlow::Continue(true)
            }
            _ => ControlFlow::Continue(false),
        }
    }

    async fn check(&self, bus: &EventBus) {
        *self.state.write() = WatchState::Polling;
        let result = self
            .config
            .backend()
            .check_for_upstream_changes(&self.fields)
            .await;
        debug!(
            watch = %self.name(),
            has_changed = result.has_changed,
            is_healthy = result.is_healthy,
            "watch checked"
        );

        let name = self.name();
        if !result.is_healthy {
            bus.publish(Event::new(EventCode::StatusUnhealthy, name));
        } else {
            if result.has_changed {
                bus.publish(Event::new(EventCode::StatusChanged, name));
            }
            bus.publish(Event::new(EventCode::StatusHealthy, name));
        }
        *self.state.write() = WatchState::Idle;
    }
}

/// Handle to a running watch.
pub struct WatchHandle {
    name: String,
    inbox: mpsc::UnboundedSender<Event>,
    state: Arc<RwLock<WatchState>>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Event source of the watch.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver an event straight to the watch's inbox, bypassing the bus.
    ///
    /// Events sent after the watch stopped are dropped.
    pub fn receive(&self, event: Event) {
        let _ = self.inbox.send(event);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatchState {
        *self.state.read()
    }

    /// Check whether the watch task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start one watch per config on `bus`.
pub fn start_watches(configs: Vec<WatchConfig>, bus: &EventBus) -> Vec<WatchHandle> {
    configs
        .into_iter()
        .map(|config| Watch::new(config).run(bus))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surveillee::{Backend, BackendKind, CheckResult, Surveillees};
    use crate::watches::WatchDefinition;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Reports a fixed change flag on every check, always healthy.
    struct NoopDiscovery {
        val: bool,
    }

    #[async_trait]
    impl Backend for NoopDiscovery {
        async fn check_for_upstream_changes(&self, _fields: &[String]) -> CheckResult {
            CheckResult::healthy(self.val)
        }

        fn kind(&self) -> BackendKind {
            BackendKind::Discovery
        }
    }

    fn config(name: &str, val: bool) -> WatchConfig {
        config_every(name, val, 1)
    }

    fn config_every(name: &str, val: bool, interval: i64) -> WatchConfig {
        let backends = Surveillees::new(Some(Arc::new(NoopDiscovery { val })), None, None);
        WatchDefinition::new(name, "", interval)
            .validate(&backends)
            .unwrap()
    }

    async fn run_watch_test(config: WatchConfig) -> HashMap<Event, usize> {
        let bus = EventBus::new();
        let poll_source = config.poll_source();
        let handle = Watch::new(config).run(&bus);

        handle.receive(Event::timer_expired(poll_source.clone()));
        // a non-timer event on the poll source is not a check
        handle.receive(Event::new(EventCode::StatusChanged, poll_source));
        handle.receive(Event::quit("test"));
        bus.wait().await;
        assert_eq!(handle.state(), WatchState::Stopped);

        let mut got = HashMap::new();
        for event in bus.history() {
            *got.entry(event).or_insert(0) += 1;
        }
        got
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_poll_ok() {
        let got = run_watch_test(config("my-watch-ok", true)).await;
        let changed = Event::new(EventCode::StatusChanged, "watch.my-watch-ok");
        let healthy = Event::new(EventCode::StatusHealthy, "watch.my-watch-ok");
        assert_eq!(got.get(&changed), Some(&1), "{got:?}");
        assert_eq!(got.get(&healthy), Some(&1), "{got:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_poll_no_change() {
        let got = run_watch_test(config("my-watch-quiet", false)).await;
        let changed = Event::new(EventCode::StatusChanged, "watch.my-watch-quiet");
        let unhealthy = Event::new(EventCode::StatusUnhealthy, "watch.my-watch-quiet");
        let healthy = Event::new(EventCode::StatusHealthy, "watch.my-watch-quiet");
        assert_eq!(got.get(&changed), None, "{got:?}");
        assert_eq!(got.get(&unhealthy), None, "{got:?}");
        assert_eq!(got.get(&healthy), Some(&1), "{got:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_precedes_healthy() {
        let bus = EventBus::new();
        let config = config("ordered", true);
        let handle = Watch::new(config).run(&bus);
        let mut sub = bus.subscribe(SubscriberFilter::source("watch.ordered"));

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        handle.receive(Event::quit("test"));
        bus.wait().await;

        assert_eq!(sub.try_recv().map(|e| e.code), Some(EventCode::StatusChanged));
        assert_eq!(sub.try_recv().map(|e| e.code), Some(EventCode::StatusHealthy));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_every_watch() {
        let bus = EventBus::without_history();
        let handles = start_watches(vec![config("alpha", false), config("beta", false)], &bus);
        assert_eq!(bus.subscriber_count(), 2);

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        bus.shutdown();
        bus.wait().await;

        for handle in &handles {
            assert_eq!(handle.state(), WatchState::Stopped, "{}", handle.name());
        }
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_timer_is_ignored() {
        let bus = EventBus::new();
        let handle = Watch::new(config("mine", true)).run(&bus);

        handle.receive(Event::timer_expired("watch.other.poll"));
        handle.receive(Event::quit("test"));
        bus.wait().await;

        assert!(
            bus.history()
                .iter()
                .all(|e| e.source != "watch.mine"),
            "{:?}",
            bus.history()
        );
    }

    #[test]
    fn test_next_deadline_saturates() {
        let before = Instant::now();
        assert!(next_deadline(Duration::MAX) >= before + FAR_FUTURE);
        assert!(next_deadline(Duration::from_secs(5)) >= before + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_huge_interval_still_stops() {
        let bus = EventBus::new();
        let handle = Watch::new(config_every("forever", true, i64::MAX)).run(&bus);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        assert_eq!(handle.state(), WatchState::Idle);

        handle.receive(Event::quit("test"));
        bus.wait().await;
        assert_eq!(handle.state(), WatchState::Stopped);
        assert!(bus.history().is_empty(), "{:?}", bus.history());
    }
}
