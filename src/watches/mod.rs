//! Watch definitions, validation and the polling actor.
//!
//! A watch binds one target (a service, a secret path or a file) to the
//! backend serving its source, and polls it on a fixed interval:
//!
//! ```text
//! raw records ──► new_configs ──► WatchConfig ──► Watch::run ──► EventBus
//!                    │                                 │
//!               validate_name                  Backend::check_for_upstream_changes
//! ```

mod config;
mod names;
mod watch;

pub use config::{WATCH_PREFIX, WatchConfig, WatchDefinition, new_configs};
pub use names::validate_name;
pub use watch::{Watch, WatchHandle, WatchState, start_watches};
