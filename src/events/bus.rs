//! Process-wide publish/subscribe bus.
//!
//! ## Architecture
//! ```text
//! Publishers (many):              Subscribers (many):
//!   Watch timer ──┐                ┌──► Watch inbox   (filter: "<name>.poll")
//!   Watch check ──┼──► EventBus ───┼──► Watch inbox   (filter: "<other>.poll")
//!   Supervisor  ──┘       │        └──► Supervisor    (filter: all)
//!                         ▼
//!                   EventHistory (optional)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: every subscriber owns an unbounded inbox.
//! - **Routing by source**: a subscriber sees events whose `source` it asked
//!   for; `Quit` reaches every subscriber.
//! - **Lock-free fan-out**: the subscriber list is an `ArcSwap` snapshot, so
//!   publishing never contends with subscribe/unsubscribe.
//! - **Orderly shutdown**: watches run on the bus's task tracker;
//!   [`EventBus::wait`] returns once every one of them has stopped.

use super::{Event, EventCode, EventHistory};
use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Which events a subscriber wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberFilter {
    /// Every published event.
    All,
    /// Only events whose source is in the list (plus broadcast control events).
    Sources(Vec<String>),
}

impl SubscriberFilter {
    /// Filter for a single source.
    pub fn source(source: impl Into<String>) -> Self {
        Self::Sources(vec![source.into()])
    }

    fn accepts(&self, event: &Event) -> bool {
        if event.code.is_broadcast() {
            return true;
        }
        match self {
            Self::All => true,
            Self::Sources(sources) => sources.iter().any(|s| *s == event.source),
        }
    }
}

struct Subscriber {
    id: usize,
    filter: SubscriberFilter,
    tx: mpsc::UnboundedSender<Event>,
}

struct BusInner {
    subscribers: ArcSwap<Vec<Arc<Subscriber>>>,
    next_id: AtomicUsize,
    history: Option<EventHistory>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl BusInner {
    fn remove(&self, id: usize) {
        self.subscribers.rcu(|subs| {
            subs.iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// Handle for a subscription that can be dropped to unsubscribe.
///
/// When the handle is dropped, the subscription is removed from the bus and
/// no further events are routed to its inbox.
pub struct SubscriptionHandle {
    id: usize,
    bus: Arc<BusInner>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.bus.remove(self.id);
    }
}

/// A live subscription: the inbox plus the handle keeping it registered.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Wait for the next routed event.
    ///
    /// Returns `None` once the bus side has gone away.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next routed event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Split into the registration handle and the raw inbox.
    pub fn into_parts(self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        (self.handle, self.rx)
    }
}

/// Publish/subscribe bus connecting watches to their consumers.
///
/// Cheap to clone; clones share subscribers, history and shutdown state.
///
/// # Examples
///
/// ```rust
/// use watchkeeper::events::{Event, EventBus, EventCode, SubscriberFilter};
///
/// # async fn example() {
/// let bus = EventBus::new();
/// let mut sub = bus.subscribe(SubscriberFilter::source("watch.db"));
///
/// bus.publish(Event::new(EventCode::StatusChanged, "watch.db"));
/// bus.publish(Event::new(EventCode::StatusChanged, "watch.cache"));
///
/// assert_eq!(sub.recv().await.unwrap().source, "watch.db");
/// assert!(sub.try_recv().is_none());
/// assert_eq!(bus.history().len(), 2);
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus that records every published event.
    pub fn new() -> Self {
        Self::build(Some(EventHistory::new()))
    }

    /// Create a bus with no history recorder.
    pub fn without_history() -> Self {
        Self::build(None)
    }

    fn build(history: Option<EventHistory>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicUsize::new(0),
                history,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Deliver an event to every subscriber whose filter accepts it.
    ///
    /// Never blocks. Subscribers whose inbox is gone are skipped.
    pub fn publish(&self, event: Event) {
        if let Some(history) = &self.inner.history {
            history.record(&event);
        }
        let subscribers = self.inner.subscribers.load();
        for sub in subscribers.iter() {
            if sub.filter.accepts(&event) {
                let _ = sub.tx.send(event.clone());
            }
        }
    }

    /// Register a new subscriber.
    ///
    /// The subscriber only sees events published after this call.
    pub fn subscribe(&self, filter: SubscriberFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscriber { id, filter, tx });
        self.inner.subscribers.rcu(|subs| {
            let mut next = Vec::with_capacity(subs.len() + 1);
            next.extend(subs.iter().cloned());
            next.push(Arc::clone(&sub));
            next
        });

        Subscription {
            handle: SubscriptionHandle {
                id,
                bus: Arc::clone(&self.inner),
            },
            rx,
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load().len()
    }

    /// Ordered copy of every event published so far.
    ///
    /// Empty when the bus was built without history.
    pub fn history(&self) -> Vec<Event> {
        self.inner
            .history
            .as_ref()
            .map(EventHistory::all)
            .unwrap_or_default()
    }

    /// Shared handle to the history recorder, if enabled.
    pub fn recorder(&self) -> Option<&EventHistory> {
        self.inner.history.as_ref()
    }

    /// Root shutdown token; watches stop when it is cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Broadcast `Quit` and cancel the root token.
    pub fn shutdown(&self) {
        tracing::info!("event bus shutting down");
        self.publish(Event::new(EventCode::Quit, "shutdown"));
        self.inner.shutdown.cancel();
    }

    /// Run a task whose completion [`wait`](Self::wait) should observe.
    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(task)
    }

    /// Block until every tracked watch has stopped.
    ///
    /// Call after `Quit` has been delivered (or [`shutdown`](Self::shutdown));
    /// watches that are never told to stop keep this pending.
    pub async fn wait(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
