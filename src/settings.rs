//! Sidecar settings: which backends exist and what to watch.
//!
//! Settings come from one file (YAML, TOML or JSON, chosen by extension)
//! with environment overrides layered on top:
//!
//! ```yaml
//! consul: "consul:8500"
//! vault:
//!   address: "vault:8200"
//!   scheme: https
//!   token: "file:///var/run/secrets/vault-token"
//! watches:
//!   - name: upstream-a
//!     interval: 10
//!     tag: primary
//!   - name: /etc/app/config.json
//!     source: file
//!     interval: 5
//! ```
//!
//! `WATCHKEEPER_CONSUL=https://consul:8501` replaces the `consul` section;
//! `WATCHKEEPER_VAULT__TOKEN=...` sets a nested key.

use crate::error::{ConfigError, Result};
use crate::surveillee::{ConsulConfig, FileHasher, Surveillees, VaultConfig};
use crate::watches::{WatchConfig, new_configs};
use config::{Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Environment prefix used by [`SidecarSettings::load`].
pub const DEFAULT_ENV_PREFIX: &str = "WATCHKEEPER";

/// A backend connection: either a bare URI or the structured form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Endpoint<T> {
    /// `scheme://host:port` or a bare `host:port`
    Uri(String),
    /// Structured settings
    Detailed(T),
}

impl Endpoint<ConsulConfig> {
    /// Structured settings for this endpoint.
    pub fn resolve(&self) -> ConsulConfig {
        match self {
            Endpoint::Uri(uri) => ConsulConfig::from_uri(uri),
            Endpoint::Detailed(cfg) => cfg.clone(),
        }
    }
}

impl Endpoint<VaultConfig> {
    /// Structured settings for this endpoint.
    pub fn resolve(&self) -> VaultConfig {
        match self {
            Endpoint::Uri(uri) => VaultConfig::from_uri(uri),
            Endpoint::Detailed(cfg) => cfg.clone(),
        }
    }
}

/// Top-level sidecar settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SidecarSettings {
    /// Service discovery agent
    #[serde(default)]
    pub consul: Option<Endpoint<ConsulConfig>>,
    /// Secret store
    #[serde(default)]
    pub vault: Option<Endpoint<VaultConfig>>,
    /// Untyped watch records, decoded by [`new_configs`]
    #[serde(default)]
    pub watches: Vec<serde_json::Value>,
}

impl SidecarSettings {
    /// Load settings from `path` with `WATCHKEEPER_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable, or its
    /// contents do not fit the settings shape.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env_prefix(path, DEFAULT_ENV_PREFIX)
    }

    /// Load settings from `path` with `<prefix>_*` overrides.
    ///
    /// Nested keys use `__`: `<prefix>_VAULT__TOKEN` sets `vault.token`.
    pub fn load_with_env_prefix(path: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::LoadError(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize().map_err(|e| {
            ConfigError::LoadError(format!("Failed to deserialize settings: {}", e))
        })
    }

    /// Build settings from an already-parsed JSON document.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ConfigError::LoadError(format!("Failed to deserialize settings: {}", e)))
    }

    /// Build the backends and validate every watch against them.
    ///
    /// The file backend is always available; discovery and the secret store
    /// only when their section is present.
    ///
    /// # Errors
    ///
    /// Returns the first backend construction or watch validation failure.
    #[cfg(feature = "http-transport")]
    pub fn resolve(&self) -> Result<(Surveillees, Vec<WatchConfig>)> {
        use crate::surveillee::{Backend, Discovery, SecretReader};

        let discovery = match &self.consul {
            Some(endpoint) => {
                let backend: Arc<dyn Backend> = Arc::new(Discovery::from_config(endpoint.resolve())?);
                Some(backend)
            }
            None => None,
        };
        let secret_storage = match &self.vault {
            Some(endpoint) => {
                let backend: Arc<dyn Backend> =
                    Arc::new(SecretReader::from_config(endpoint.resolve())?);
                Some(backend)
            }
            None => None,
        };
        let surveillees = Surveillees::new(
            discovery,
            Some(Arc::new(FileHasher::new())),
            secret_storage,
        );
        let watches = self.resolve_with(&surveillees)?;
        Ok((surveillees, watches))
    }

    /// Validate every watch against an existing backend set.
    pub fn resolve_with(&self, surveillees: &Surveillees) -> Result<Vec<WatchConfig>> {
        new_configs(&self.watches, surveillees)
    }

    /// Backend set holding only the local file backend.
    pub fn local_surveillees() -> Surveillees {
        Surveillees::new(None, Some(Arc::new(FileHasher::new())), None)
    }
}
