//! Service-discovery backend: detects changes in the set of passing instances.

use super::transport::{TlsSettings, parse_raw_uri};
#[cfg(feature = "http-transport")]
use super::transport::{CONSUL_TLS_ENV, DEFAULT_TIMEOUT, env_lookup};
use super::{Backend, BackendKind, CheckResult, SnapshotTable};
use crate::error::BackendError;
#[cfg(feature = "http-transport")]
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// One passing instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceInstance {
    /// Service instance id
    pub id: String,
    /// Address the instance is reachable on
    pub address: String,
    /// Port the instance is reachable on
    pub port: u16,
}

impl ServiceInstance {
    /// Create an instance record.
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }
}

/// Health-query contract for the discovery service.
#[async_trait]
pub trait HealthClient: Send + Sync {
    /// Instances of `service` currently passing their health checks,
    /// optionally narrowed by `tag` and `datacenter`.
    async fn passing_instances(
        &self,
        service: &str,
        tag: Option<&str>,
        datacenter: Option<&str>,
    ) -> std::result::Result<Vec<ServiceInstance>, BackendError>;
}

/// Tracks the passing-instance set of every watched service.
pub struct Discovery {
    client: Arc<dyn HealthClient>,
    services: SnapshotTable<Vec<ServiceInstance>>,
}

impl Discovery {
    /// Create a discovery backend over the given health client.
    pub fn new(client: Arc<dyn HealthClient>) -> Self {
        Self {
            client,
            services: SnapshotTable::new(),
        }
    }

    /// Build a discovery backend with an HTTP health client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS settings are unusable.
    #[cfg(feature = "http-transport")]
    pub fn from_config(config: ConsulConfig) -> Result<Self> {
        Self::from_config_with_env(config, env_lookup)
    }

    #[cfg(feature = "http-transport")]
    pub(crate) fn from_config_with_env<F>(mut config: ConsulConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("CONSUL_HTTP_TOKEN") {
            config.token = token;
        }
        config.tls.apply_env(&CONSUL_TLS_ENV, &lookup);
        let client = config.tls.client(DEFAULT_TIMEOUT)?;
        let health = HttpHealthClient::new(client, config.base_url(), config.token);
        Ok(Self::new(Arc::new(health)))
    }

    /// Record `instances` for `key` and report whether the set differs from
    /// the previous one. Order of `instances` does not matter.
    pub fn compare_and_swap(&self, key: &str, mut instances: Vec<ServiceInstance>) -> bool {
        instances.sort();
        instances.dedup();
        self.services
            .compare_and_swap(key, instances, |old, new| old != new)
    }

    /// Last recorded passing set for `key`.
    pub fn last_instances(&self, key: &str) -> Option<Arc<Vec<ServiceInstance>>> {
        self.services.get(key)
    }
}

fn non_empty(field: Option<&String>) -> Option<&str> {
    field.map(String::as_str).filter(|s| !s.is_empty())
}

#[async_trait]
impl Backend for Discovery {
    async fn check_for_upstream_changes(&self, fields: &[String]) -> CheckResult {
        let Some(service) = fields.first() else {
            warn!("discovery check called without a service name");
            return CheckResult::unhealthy();
        };
        let tag = non_empty(fields.get(1));
        let datacenter = non_empty(fields.get(2));

        let instances = match self.client.passing_instances(service, tag, datacenter).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(service = %service, error = %e, "health query failed");
                return CheckResult::unhealthy();
            }
        };
        if instances.is_empty() {
            debug!(service = %service, "no passing instances");
            return CheckResult::unhealthy();
        }

        // tag and datacenter narrow the query, so they are part of the key
        let key = format!(
            "{}|{}|{}",
            service,
            tag.unwrap_or_default(),
            datacenter.unwrap_or_default()
        );
        let has_changed = self.compare_and_swap(&key, instances);
        debug!(service = %service, has_changed, "service checked");
        CheckResult::healthy(has_changed)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Discovery
    }
}

/// Connection settings for the discovery service.
///
/// Either a bare URI (`consul:8500`) or this structured form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsulConfig {
    /// `host:port` of the agent
    #[serde(default)]
    pub address: String,
    /// `http` or `https`
    #[serde(default)]
    pub scheme: String,
    /// ACL token
    #[serde(default)]
    pub token: String,
    /// Optional TLS settings
    #[serde(default)]
    pub tls: TlsSettings,
}

impl ConsulConfig {
    /// Settings from a raw URI.
    pub fn from_uri(uri: &str) -> Self {
        let (address, scheme) = parse_raw_uri(uri);
        Self {
            address,
            scheme,
            ..Self::default()
        }
    }

    /// Base URL of the agent.
    pub fn base_url(&self) -> String {
        let scheme = if self.scheme.is_empty() {
            "http"
        } else {
            self.scheme.as_str()
        };
        format!("{}://{}", scheme, self.address)
    }
}

#[cfg(feature = "http-transport")]
#[derive(Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: HealthNode,
    #[serde(rename = "Service")]
    service: HealthService,
}

#[cfg(feature = "http-transport")]
#[derive(Deserialize)]
struct HealthNode {
    #[serde(rename = "Address", default)]
    address: String,
}

#[cfg(feature = "http-transport")]
#[derive(Deserialize)]
struct HealthService {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
}

#[cfg(feature = "http-transport")]
impl From<HealthEntry> for ServiceInstance {
    fn from(entry: HealthEntry) -> Self {
        let address = if entry.service.address.is_empty() {
            entry.node.address
        } else {
            entry.service.address
        };
        ServiceInstance::new(entry.service.id, address, entry.service.port)
    }
}

/// Health client spoken to over the agent's HTTP API.
#[cfg(feature = "http-transport")]
pub struct HttpHealthClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[cfg(feature = "http-transport")]
impl HttpHealthClient {
    /// Create a health client rooted at `base_url` (e.g. `http://consul:8500`).
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url_for(&self, service: &str) -> String {
        format!(
            "{}/v1/health/service/{}",
            self.base_url.trim_end_matches('/'),
            service
        )
    }
}

#[cfg(feature = "http-transport")]
#[async_trait]
impl HealthClient for HttpHealthClient {
    async fn passing_instances(
        &self,
        service: &str,
        tag: Option<&str>,
        datacenter: Option<&str>,
    ) -> std::result::Result<Vec<ServiceInstance>, BackendError> {
        let url = self.url_for(service);
        let mut query = vec![("passing", "1")];
        if let Some(tag) = tag {
            query.push(("tag", tag));
        }
        if let Some(dc) = datacenter {
            query.push(("dc", dc));
        }

        let mut request = self.client.get(&url).query(&query);
        if !self.token.is_empty() {
            request = request.header("X-Consul-Token", &self.token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let entries: Vec<HealthEntry> = response.json().await?;
        Ok(entries.into_iter().map(ServiceInstance::from).collect())
    }
}
