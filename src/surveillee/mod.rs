//! Observed-state backends.
//!
//! Every backend answers one question, "has this key changed since I last
//! looked, and could I look at all?", through [`Backend::check_for_upstream_changes`].
//! The set of backends is closed: service discovery ([`Discovery`]), the
//! secret store ([`SecretReader`]) and local files ([`FileHasher`]). Each owns
//! its own [`SnapshotTable`] and applies its own comparison policy.
//!
//! All backends share the same contract:
//! - failures never escape; they become an unhealthy result
//! - a failed read reports `(false, false)` and leaves the snapshot untouched
//! - a successful read always replaces the snapshot, and `has_changed`
//!   compares against the previous one
//! - the first successful read for a key is a baseline and never a change

mod consul;
mod file_watcher;
mod snapshot;
mod transport;
mod vault;

pub use consul::{ConsulConfig, Discovery, HealthClient, ServiceInstance};
pub use file_watcher::FileHasher;
pub use snapshot::SnapshotTable;
pub use transport::{TlsSettings, parse_raw_uri};
pub use vault::{Secret, SecretData, SecretReader, SecretStore, VaultConfig, secret_changed};

#[cfg(feature = "http-transport")]
pub use consul::HttpHealthClient;
#[cfg(feature = "http-transport")]
pub use vault::HttpSecretStore;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Outcome of one upstream check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckResult {
    /// The observed value differs from the previous snapshot.
    pub has_changed: bool,
    /// The observation itself succeeded.
    pub is_healthy: bool,
}

impl CheckResult {
    /// A failed check. Never carries a change.
    pub const fn unhealthy() -> Self {
        Self {
            has_changed: false,
            is_healthy: false,
        }
    }

    /// A successful check.
    pub const fn healthy(has_changed: bool) -> Self {
        Self {
            has_changed,
            is_healthy: true,
        }
    }
}

/// The three kinds of observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Service discovery health lookups
    Discovery,
    /// Structured secret reads
    SecretReader,
    /// Local file content hashes
    FileHasher,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Discovery => "consul",
            BackendKind::SecretReader => "vault",
            BackendKind::FileHasher => "file",
        };
        f.write_str(name)
    }
}

/// Change-detection capability shared by every observed-state backend.
///
/// `fields` carries backend-specific addressing:
/// - files: `[path]`
/// - secrets: `[path, field]`, an empty field meaning the whole value
/// - discovery: `[service, tag, datacenter]`, trailing entries optional
#[async_trait]
pub trait Backend: Send + Sync {
    /// Check the upstream for changes since the last successful check.
    async fn check_for_upstream_changes(&self, fields: &[String]) -> CheckResult;

    /// Which kind of state this backend observes.
    fn kind(&self) -> BackendKind;
}

/// All backends available to watch resolution.
///
/// Backends are shared: every watch of the same source type holds a clone of
/// the same `Arc`, and therefore the same snapshot table.
#[derive(Clone, Default)]
pub struct Surveillees {
    /// Service discovery backend
    pub discovery: Option<Arc<dyn Backend>>,
    /// Local file backend
    pub file_watcher: Option<Arc<dyn Backend>>,
    /// Secret store backend
    pub secret_storage: Option<Arc<dyn Backend>>,
}

impl Surveillees {
    /// Bundle the given backends.
    pub fn new(
        discovery: Option<Arc<dyn Backend>>,
        file_watcher: Option<Arc<dyn Backend>>,
        secret_storage: Option<Arc<dyn Backend>>,
    ) -> Self {
        Self {
            discovery,
            file_watcher,
            secret_storage,
        }
    }

    /// Backend serving the given kind, if configured.
    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn Backend>> {
        match kind {
            BackendKind::Discovery => self.discovery.clone(),
            BackendKind::SecretReader => self.secret_storage.clone(),
            BackendKind::FileHasher => self.file_watcher.clone(),
        }
    }
}

impl fmt::Debug for Surveillees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surveillees")
            .field("discovery", &self.discovery.is_some())
            .field("file_watcher", &self.file_watcher.is_some())
            .field("secret_storage", &self.secret_storage.is_some())
            .finish()
    }
}
