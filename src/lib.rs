//! # watchkeeper
//!
//! Change detection for container sidecars: poll service discovery, a secret
//! store and local files, and publish typed events when something changes.
//!
//! ## Overview
//!
//! `watchkeeper` is built from three layers:
//! - **Backends** ([`surveillee`]): answer "has this changed since I last
//!   looked, and could I look at all?" for one kind of external state
//! - **Watches** ([`watches`]): one actor per target, polling its backend on a
//!   fixed interval with at most one check in flight
//! - **Event bus** ([`events`]): routes timer and status events between
//!   watches and whoever supervises the process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use watchkeeper::prelude::*;
//!
//! # async fn example() -> watchkeeper::error::Result<()> {
//! let settings = SidecarSettings::load("config/sidecar.yaml")?;
//! let (_backends, configs) = settings.resolve()?;
//!
//! let bus = EventBus::new();
//! let mut changes = bus.subscribe(SubscriberFilter::All);
//! let _watches = start_watches(configs, &bus);
//!
//! while let Some(event) = changes.recv().await {
//!     if event.code == EventCode::StatusChanged {
//!         println!("{} changed, reloading", event.source);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `http-transport` (default): HTTP clients for the discovery agent and the
//!   secret store, and [`SidecarSettings::resolve`](settings::SidecarSettings::resolve)

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod error;
pub mod events;
pub mod settings;
pub mod surveillee;
pub mod watches;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{BackendError, ConfigError, Result};
    pub use crate::events::{Event, EventBus, EventCode, SubscriberFilter};
    pub use crate::settings::SidecarSettings;
    pub use crate::surveillee::{Backend, BackendKind, CheckResult, Surveillees};
    pub use crate::watches::{Watch, WatchConfig, WatchHandle, start_watches};
}
