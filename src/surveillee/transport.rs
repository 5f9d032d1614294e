//! HTTP transport plumbing shared by the discovery and secret-store clients.

use serde::Deserialize;
use std::path::PathBuf;

#[cfg(feature = "http-transport")]
use crate::error::{ConfigError, Result};
#[cfg(feature = "http-transport")]
use std::path::Path;
#[cfg(feature = "http-transport")]
use std::time::Duration;

/// Default request timeout for transport clients.
#[cfg(feature = "http-transport")]
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Split a raw URI into `(address, scheme)`.
///
/// A leading `http://` or `https://` is stripped and selects the scheme;
/// anything else is taken as a bare address over `http`. Only the first
/// prefix is stripped; malformed input is passed through for the transport
/// to reject.
///
/// # Examples
///
/// ```rust
/// use watchkeeper::surveillee::parse_raw_uri;
///
/// assert_eq!(parse_raw_uri("https://vault:8200"), ("vault:8200".into(), "https".into()));
/// assert_eq!(parse_raw_uri("consul:8500"), ("consul:8500".into(), "http".into()));
/// ```
pub fn parse_raw_uri(raw: &str) -> (String, String) {
    if let Some(rest) = raw.strip_prefix("http://") {
        (rest.to_string(), "http".to_string())
    } else if let Some(rest) = raw.strip_prefix("https://") {
        (rest.to_string(), "https".to_string())
    } else {
        (raw.to_string(), "http".to_string())
    }
}

/// Environment variable names that override [`TlsSettings`].
#[cfg(feature = "http-transport")]
pub(crate) struct TlsEnvNames {
    pub ca_file: &'static str,
    pub ca_path: &'static str,
    pub client_cert: &'static str,
    pub client_key: &'static str,
    pub server_name: &'static str,
    pub verify: &'static str,
    /// The variable means "skip verification" rather than "verify".
    pub verify_inverted: bool,
}

#[cfg(feature = "http-transport")]
pub(crate) const CONSUL_TLS_ENV: TlsEnvNames = TlsEnvNames {
    ca_file: "CONSUL_CACERT",
    ca_path: "CONSUL_CAPATH",
    client_cert: "CONSUL_CLIENT_CERT",
    client_key: "CONSUL_CLIENT_KEY",
    server_name: "CONSUL_TLS_SERVER_NAME",
    verify: "CONSUL_HTTP_SSL_VERIFY",
    verify_inverted: false,
};

#[cfg(feature = "http-transport")]
pub(crate) const VAULT_TLS_ENV: TlsEnvNames = TlsEnvNames {
    ca_file: "VAULT_CACERT",
    ca_path: "VAULT_CAPATH",
    client_cert: "VAULT_CLIENT_CERT",
    client_key: "VAULT_CLIENT_KEY",
    server_name: "VAULT_TLS_SERVER_NAME",
    verify: "VAULT_SKIP_VERIFY",
    verify_inverted: true,
};

/// Read a non-empty environment variable.
#[cfg(feature = "http-transport")]
pub(crate) fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Optional TLS settings for a transport client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsSettings {
    /// PEM bundle of trusted CAs
    #[serde(default, rename = "cafile")]
    pub ca_file: Option<PathBuf>,
    /// Directory of PEM CA certificates
    #[serde(default, rename = "capath")]
    pub ca_path: Option<PathBuf>,
    /// Client certificate (PEM)
    #[serde(default, rename = "clientcert")]
    pub client_cert: Option<PathBuf>,
    /// Client private key (PKCS#8 PEM)
    #[serde(default, rename = "clientkey")]
    pub client_key: Option<PathBuf>,
    /// Expected server name
    #[serde(default, rename = "servername")]
    pub server_name: Option<String>,
    /// Verify the server certificate
    #[serde(default = "default_verify")]
    pub verify: bool,
}

fn default_verify() -> bool {
    true
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_file: None,
            ca_path: None,
            client_cert: None,
            client_key: None,
            server_name: None,
            verify: true,
        }
    }
}

impl TlsSettings {
    /// Override fields from the environment, as resolved by `lookup`.
    #[cfg(feature = "http-transport")]
    pub(crate) fn apply_env<F>(&mut self, names: &TlsEnvNames, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(names.ca_file) {
            self.ca_file = Some(v.into());
        }
        if let Some(v) = lookup(names.ca_path) {
            self.ca_path = Some(v.into());
        }
        if let Some(v) = lookup(names.client_cert) {
            self.client_cert = Some(v.into());
        }
        if let Some(v) = lookup(names.client_key) {
            self.client_key = Some(v.into());
        }
        if let Some(v) = lookup(names.server_name) {
            self.server_name = Some(v);
        }
        let flag = match lookup(names.verify).map(|v| v.to_lowercase()).as_deref() {
            Some("1") | Some("true") => Some(true),
            Some("0") | Some("false") => Some(false),
            _ => None,
        };
        if let Some(flag) = flag {
            self.verify = flag != names.verify_inverted;
        }
    }

    /// Build an HTTP client honoring these settings.
    ///
    /// # Errors
    ///
    /// Returns an error if certificate material cannot be read or parsed.
    #[cfg(feature = "http-transport")]
    pub fn client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(timeout);

        let mut roots = Vec::new();
        if let Some(file) = &self.ca_file {
            roots.push(file.clone());
        }
        if let Some(dir) = &self.ca_path {
            roots.extend(pem_files(dir)?);
        }
        for path in roots {
            let pem = std::fs::read(&path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ConfigError::TlsError(format!("invalid CA {}: {}", path.display(), e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => {
                let cert = std::fs::read(cert)?;
                let key = std::fs::read(key)?;
                let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
                    .map_err(|e| ConfigError::TlsError(format!("invalid client identity: {}", e)))?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::TlsError(
                    "client certificate and key must be set together".to_string(),
                ));
            }
        }

        if let Some(name) = &self.server_name {
            tracing::warn!(
                server_name = %name,
                "TLS server name override is not supported by the HTTP client; using the address host"
            );
        }
        if !self.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| ConfigError::TlsError(format!("failed to build HTTP client: {}", e)))
    }
}

#[cfg(feature = "http-transport")]
fn pem_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pem = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "pem" | "crt"));
        if is_pem {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
