//! Event data model and the bus that carries it.
//!
//! - [`Event`], [`EventCode`]: immutable `{code, source}` values
//! - [`EventBus`]: subscriber routing, shutdown, and drain
//! - [`EventHistory`]: optional append-only recorder for introspection

mod bus;
mod event;
mod history;

pub use bus::{EventBus, SubscriberFilter, Subscription, SubscriptionHandle};
pub use event::{Event, EventCode};
pub use history::EventHistory;
