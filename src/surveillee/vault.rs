//! Secret-store backend: detects changes in structured secrets.
//!
//! Secrets are key/value mappings. When a read returns a nested mapping under
//! `"data"` (the versioned key/value engine layout) that nested mapping is the
//! value being compared; otherwise the top-level mapping is.

use super::transport::{TlsSettings, parse_raw_uri};
#[cfg(feature = "http-transport")]
use super::transport::{DEFAULT_TIMEOUT, VAULT_TLS_ENV, env_lookup};
use super::{Backend, BackendKind, CheckResult, SnapshotTable};
use crate::error::{BackendError, ConfigError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key/value payload of a secret.
pub type SecretData = Map<String, Value>;

const TOKEN_FILE_PREFIX: &str = "file://";

/// One secret as returned by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Secret {
    /// Raw payload
    pub data: SecretData,
    /// Non-fatal notices attached by the store (deprecations and similar)
    pub warnings: Vec<String>,
}

impl Secret {
    /// Secret with the given payload and no warnings.
    pub fn new(data: SecretData) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    /// The comparable mapping: nested `"data"` if present, else the payload.
    pub fn comparable(&self) -> &SecretData {
        match self.data.get("data") {
            Some(Value::Object(inner)) => inner,
            _ => &self.data,
        }
    }
}

/// Transport contract for the secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the secret at `path`. `Ok(None)` means it does not exist.
    async fn read(&self, path: &str) -> std::result::Result<Option<Secret>, BackendError>;

    /// Replace the credential used for subsequent reads.
    fn set_token(&self, token: String);
}

/// Report whether `new` differs from `old`.
///
/// With an empty `field` the whole mappings are compared: any size
/// difference, missing key or differing value is a change. With a `field`
/// only that key is compared, and only when it is present on both sides;
/// a field that appears or disappears is not reported.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use watchkeeper::surveillee::secret_changed;
///
/// let old = json!({"foo": "bar", "version": 1});
/// let new = json!({"foo": "bar", "version": 2});
/// let (old, new) = (old.as_object().unwrap(), new.as_object().unwrap());
///
/// assert!(secret_changed(old, new, ""));
/// assert!(!secret_changed(old, new, "foo"));
/// assert!(secret_changed(old, new, "version"));
/// ```
pub fn secret_changed(old: &SecretData, new: &SecretData, field: &str) -> bool {
    if field.is_empty() {
        if old.len() != new.len() {
            return true;
        }
        return old
            .iter()
            .any(|(key, old_value)| new.get(key) != Some(old_value));
    }
    match (old.get(field), new.get(field)) {
        (Some(old_value), Some(new_value)) => old_value != new_value,
        _ => false,
    }
}

/// Connection settings for the secret store.
///
/// Either a bare URI (`https://vault:8200`) or this structured form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    /// `host:port` of the store
    #[serde(default)]
    pub address: String,
    /// `http` or `https`
    #[serde(default)]
    pub scheme: String,
    /// Token, or `file://<path>` to read it from a file
    #[serde(default)]
    pub token: String,
    /// Optional TLS settings
    #[serde(default)]
    pub tls: TlsSettings,
}

impl VaultConfig {
    /// Settings from a raw URI; the token must come from `VAULT_TOKEN`.
    pub fn from_uri(uri: &str) -> Self {
        let (address, scheme) = parse_raw_uri(uri);
        Self {
            address,
            scheme,
            ..Self::default()
        }
    }

    /// Base URL of the store, honoring `VAULT_ADDR`.
    #[cfg_attr(not(feature = "http-transport"), allow(dead_code))]
    fn base_url<F>(&self, lookup: &F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("VAULT_ADDR") {
            return addr;
        }
        let scheme = if self.scheme.is_empty() {
            "http"
        } else {
            self.scheme.as_str()
        };
        format!("{}://{}", scheme, self.address)
    }

    /// Resolve the token, honoring `VAULT_TOKEN` and `file://` indirection.
    ///
    /// Returns the token and, when it was read from a file, that file's path.
    #[cfg_attr(not(feature = "http-transport"), allow(dead_code))]
    fn resolve_token<F>(&self, lookup: &F) -> Result<(String, Option<PathBuf>)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup("VAULT_TOKEN").unwrap_or_else(|| self.token.clone());
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        match raw.strip_prefix(TOKEN_FILE_PREFIX) {
            Some(path) => {
                let path = PathBuf::from(path);
                let token = std::fs::read_to_string(&path)?.trim().to_string();
                Ok((token, Some(path)))
            }
            None => Ok((raw.to_string(), None)),
        }
    }
}

/// Tracks the last observed value of every watched secret path.
pub struct SecretReader {
    store: Arc<dyn SecretStore>,
    token_file: Option<PathBuf>,
    secrets: SnapshotTable<SecretData>,
}

impl SecretReader {
    /// Create a reader over the given store.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            token_file: None,
            secrets: SnapshotTable::new(),
        }
    }

    /// Re-read the token from `path` before every check.
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// Build a reader with an HTTP store from connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is available, the token file cannot be
    /// read, or the TLS settings are unusable.
    #[cfg(feature = "http-transport")]
    pub fn from_config(config: VaultConfig) -> Result<Self> {
        Self::from_config_with_env(config, env_lookup)
    }

    #[cfg(feature = "http-transport")]
    pub(crate) fn from_config_with_env<F>(mut config: VaultConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (token, token_file) = config.resolve_token(&lookup)?;
        config.tls.apply_env(&VAULT_TLS_ENV, &lookup);
        let client = config.tls.client(DEFAULT_TIMEOUT)?;
        let store = HttpSecretStore::new(client, config.base_url(&lookup), token);

        let reader = Self::new(Arc::new(store));
        Ok(match token_file {
            Some(path) => reader.with_token_file(path),
            None => reader,
        })
    }

    /// Record `secret` for `path` and report whether the watched `field`
    /// (or the whole value, when empty) differs from the previous snapshot.
    pub fn compare_and_swap(&self, path: &str, field: &str, secret: &Secret) -> bool {
        self.secrets
            .compare_and_swap(path, secret.comparable().clone(), |old, new| {
                secret_changed(old, new, field)
            })
    }

    /// Last recorded comparable value for `path`.
    pub fn last_value(&self, path: &str) -> Option<Arc<SecretData>> {
        self.secrets.get(path)
    }

    async fn refresh_token_from_file(&self) -> std::result::Result<(), BackendError> {
        let Some(path) = &self.token_file else {
            return Ok(());
        };
        let token = tokio::fs::read_to_string(path).await?;
        self.store.set_token(token.trim().to_string());
        Ok(())
    }

    async fn read_secret(&self, path: &str) -> std::result::Result<Secret, BackendError> {
        let secret = self
            .store
            .read(path)
            .await?
            .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
        for warning in &secret.warnings {
            warn!(path = %path, "secret read warning: {}", warning);
        }
        Ok(secret)
    }
}

#[async_trait]
impl Backend for SecretReader {
    async fn check_for_upstream_changes(&self, fields: &[String]) -> CheckResult {
        let Some(path) = fields.first() else {
            warn!("secret check called without a path");
            return CheckResult::unhealthy();
        };
        let field = fields.get(1).map(String::as_str).unwrap_or("");

        if let Err(e) = self.refresh_token_from_file().await {
            warn!(error = %e, "failed to refresh secret store token; keeping the previous one");
        }
        let secret = match self.read_secret(path).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(path = %path, error = %e, "secret read failed");
                return CheckResult::unhealthy();
            }
        };
        let has_changed = self.compare_and_swap(path, field, &secret);
        debug!(path = %path, field = %field, has_changed, "secret checked");
        CheckResult::healthy(has_changed)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SecretReader
    }
}

/// Response body of a logical read.
#[cfg(feature = "http-transport")]
#[derive(Deserialize)]
struct ReadResponse {
    #[serde(default)]
    data: Option<SecretData>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

/// Secret store spoken to over its HTTP API.
#[cfg(feature = "http-transport")]
pub struct HttpSecretStore {
    client: reqwest::Client,
    base_url: String,
    token: parking_lot::RwLock<String>,
}

#[cfg(feature = "http-transport")]
impl HttpSecretStore {
    /// Create a store client rooted at `base_url` (e.g. `https://vault:8200`).
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: parking_lot::RwLock::new(token.into()),
        }
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(feature = "http-transport")]
#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn read(&self, path: &str) -> std::result::Result<Option<Secret>, BackendError> {
        let url = self.url_for(path);
        let token = self.token.read().clone();
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let body: ReadResponse = response.json().await?;
        Ok(Some(Secret {
            data: body.data.unwrap_or_default(),
            warnings: body.warnings.unwrap_or_default(),
        }))
    }

    fn set_token(&self, token: String) {
        *self.token.write() = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};

    fn data(value: Value) -> SecretData {
        value.as_object().cloned().unwrap()
    }

    fn secret(value: Value) -> Secret {
        Secret::new(data(value))
    }

    /// In-memory store returning a scripted sequence of reads.
    #[derive(Default)]
    struct ScriptedStore {
        reads: Mutex<VecDeque<std::result::Result<Option<Secret>, BackendError>>>,
        tokens: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn push(&self, read: std::result::Result<Option<Secret>, BackendError>) {
            self.reads.lock().push_back(read);
        }
    }

    #[async_trait]
    impl SecretStore for ScriptedStore {
        async fn read(&self, path: &str) -> std::result::Result<Option<Secret>, BackendError> {
            self.reads
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Transport(format!("no read for {path}"))))
        }

        fn set_token(&self, token: String) {
            self.tokens.lock().push(token);
        }
    }

    fn fields(path: &str, field: &str) -> Vec<String> {
        vec![path.to_string(), field.to_string()]
    }

    #[test]
    fn test_check_for_changes_sequence() {
        let reader = SecretReader::new(Arc::new(ScriptedStore::default()));
        let path = "secret/data/test";

        let t0 = secret(json!({"foo": "bar", "version": 1}));
        let t1 = secret(json!({"foo": "bar", "version": 2}));
        let t3 = secret(json!({"foo": "car", "version": 1}));

        assert!(!reader.compare_and_swap(path, "", &t0), "after t0");
        assert!(reader.compare_and_swap(path, "", &t1), "after t1");
        assert!(reader.compare_and_swap(path, "", &t0), "after t0 (again)");
        assert!(reader.compare_and_swap(path, "", &t1), "after t1 (again)");
        assert!(reader.compare_and_swap(path, "", &t3), "after t3");

        assert!(reader.compare_and_swap(path, "foo", &t0), "after t0 (again with field)");
        assert!(!reader.compare_and_swap(path, "foo", &t1), "after t1 (again with field)");
        assert!(reader.compare_and_swap(path, "version", &t0), "after t0 (again with field)");
    }

    #[test]
    fn test_field_absence_is_not_a_change() {
        let reader = SecretReader::new(Arc::new(ScriptedStore::default()));
        let path = "secret/app";

        reader.compare_and_swap(path, "password", &secret(json!({"password": "a"})));
        // present -> absent
        assert!(!reader.compare_and_swap(path, "password", &secret(json!({"user": "x"}))));
        // absent -> present
        assert!(!reader.compare_and_swap(path, "password", &secret(json!({"password": "b"}))));
        // present in both and different
        assert!(reader.compare_and_swap(path, "password", &secret(json!({"password": "c"}))));
    }

    #[test]
    fn test_whole_value_compare() {
        let base = data(json!({"a": 1, "b": "two"}));
        assert!(!secret_changed(&base, &base.clone(), ""));
        assert!(secret_changed(&base, &data(json!({"a": 1})), ""));
        assert!(secret_changed(&base, &data(json!({"a": 1, "c": "two"})), ""));
        assert!(secret_changed(&base, &data(json!({"a": 1, "b": "three"})), ""));
        assert!(secret_changed(&base, &data(json!({"a": 1, "b": "two", "c": 3})), ""));
    }

    #[test]
    fn test_nested_data_is_unwrapped() {
        let v2 = secret(json!({"data": {"foo": "bar"}, "metadata": {"version": 3}}));
        assert_eq!(v2.comparable(), &data(json!({"foo": "bar"})));

        let v1 = secret(json!({"data": "not a map", "foo": "bar"}));
        assert_eq!(v1.comparable(), &v1.data);
    }

    #[tokio::test]
    async fn test_failed_read_keeps_baseline() {
        let store = Arc::new(ScriptedStore::default());
        let reader = SecretReader::new(Arc::clone(&store) as Arc<dyn SecretStore>);
        let f = fields("secret/data/test", "");

        store.push(Ok(Some(secret(json!({"data": {"foo": "bar", "version": 1}})))));
        store.push(Err(BackendError::Transport("connection refused".into())));
        store.push(Ok(None));
        store.push(Ok(Some(secret(json!({"data": {"foo": "bar", "version": 1}})))));
        store.push(Ok(Some(secret(json!({"data": {"foo": "bar", "version": 2}})))));

        assert_eq!(reader.check_for_upstream_changes(&f).await, CheckResult::healthy(false));
        assert_eq!(reader.check_for_upstream_changes(&f).await, CheckResult::unhealthy());
        assert_eq!(reader.check_for_upstream_changes(&f).await, CheckResult::unhealthy());
        assert_eq!(
            reader.last_value("secret/data/test").as_deref(),
            Some(&data(json!({"foo": "bar", "version": 1})))
        );
        assert_eq!(reader.check_for_upstream_changes(&f).await, CheckResult::healthy(false));
        assert_eq!(reader.check_for_upstream_changes(&f).await, CheckResult::healthy(true));
    }

    #[tokio::test]
    async fn test_field_toggle_reports_every_transition() {
        let store = Arc::new(ScriptedStore::default());
        let reader = SecretReader::new(Arc::clone(&store) as Arc<dyn SecretStore>);
        let f = fields("secret/data/app", "password");

        for password in ["a", "b", "a", "b"] {
            store.push(Ok(Some(secret(
                json!({"data": {"password": password, "user": "svc"}}),
            ))));
        }

        assert_eq!(reader.check_for_upstream_changes(&f).await, CheckResult::healthy(false));
        for step in 1..4 {
            assert_eq!(
                reader.check_for_upstream_changes(&f).await,
                CheckResult::healthy(true),
                "transition {step}"
            );
        }
        assert_eq!(
            reader.last_value("secret/data/app").as_deref(),
            Some(&data(json!({"password": "b", "user": "svc"})))
        );
    }

    #[tokio::test]
    async fn test_warnings_are_not_failures() {
        let store = Arc::new(ScriptedStore::default());
        let reader = SecretReader::new(Arc::clone(&store) as Arc<dyn SecretStore>);
        let mut with_warning = secret(json!({"foo": "bar"}));
        with_warning.warnings.push("endpoint is deprecated".into());
        store.push(Ok(Some(with_warning)));

        let result = reader
            .check_for_upstream_changes(&fields("secret/app", ""))
            .await;
        assert_eq!(result, CheckResult::healthy(false));
    }

    #[tokio::test]
    async fn test_token_file_refreshed_before_each_read() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let token_path = temp_dir.path().join("token");
        std::fs::write(&token_path, "first-token\n").unwrap();

        let store = Arc::new(ScriptedStore::default());
        let reader = SecretReader::new(Arc::clone(&store) as Arc<dyn SecretStore>)
            .with_token_file(&token_path);
        store.push(Ok(Some(secret(json!({"foo": "bar"})))));
        store.push(Ok(Some(secret(json!({"foo": "bar"})))));

        let f = fields("secret/app", "");
        reader.check_for_upstream_changes(&f).await;
        std::fs::write(&token_path, "  rotated-token  ").unwrap();
        reader.check_for_upstream_changes(&f).await;

        assert_eq!(*store.tokens.lock(), vec!["first-token", "rotated-token"]);
    }

    #[tokio::test]
    async fn test_missing_path_is_unhealthy() {
        let reader = SecretReader::new(Arc::new(ScriptedStore::default()));
        assert_eq!(reader.check_for_upstream_changes(&[]).await, CheckResult::unhealthy());
    }

    fn lookup_from(env: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |name| env.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_token_resolution() {
        let none = lookup_from(HashMap::new());

        let cfg = VaultConfig::from_uri("http://vault:8200");
        assert!(matches!(cfg.resolve_token(&none), Err(ConfigError::MissingToken)));

        let env = lookup_from(HashMap::from([("VAULT_TOKEN", " myTestToken ")]));
        assert_eq!(cfg.resolve_token(&env).unwrap(), ("myTestToken".to_string(), None));

        let cfg = VaultConfig {
            address: "vault:8201".into(),
            scheme: "https".into(),
            token: "s.smbuEimMcVx3lzk4EdyxxHi7".into(),
            ..VaultConfig::default()
        };
        assert_eq!(cfg.resolve_token(&none).unwrap().0, "s.smbuEimMcVx3lzk4EdyxxHi7");
        assert_eq!(cfg.base_url(&none), "https://vault:8201");

        let env = lookup_from(HashMap::from([("VAULT_ADDR", "https://other:8200")]));
        assert_eq!(cfg.base_url(&env), "https://other:8200");
    }

    #[test]
    fn test_token_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let token_path = temp_dir.path().join("token");
        std::fs::write(&token_path, "file-token\n").unwrap();

        let cfg = VaultConfig {
            token: format!("file://{}", token_path.display()),
            ..VaultConfig::from_uri("vault:8200")
        };
        let (token, file) = cfg.resolve_token(&lookup_from(HashMap::new())).unwrap();
        assert_eq!(token, "file-token");
        assert_eq!(file, Some(token_path));
    }

    #[cfg(feature = "http-transport")]
    #[test]
    fn test_from_config() {
        let cfg = VaultConfig {
            address: "vault:8201".into(),
            scheme: "https".into(),
            token: "s.smbuEimMcVx3lzk4EdyxxHi7".into(),
            ..VaultConfig::default()
        };
        assert!(SecretReader::from_config_with_env(cfg, lookup_from(HashMap::new())).is_ok());

        let err = SecretReader::from_config_with_env(
            VaultConfig::from_uri("http://vault:8200"),
            lookup_from(HashMap::new()),
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "no vault token defined");
    }

    #[cfg(feature = "http-transport")]
    #[test]
    fn test_store_urls() {
        let store = HttpSecretStore::new(reqwest::Client::new(), "http://vault:8200/", "t");
        assert_eq!(store.url_for("/secret/data/app"), "http://vault:8200/v1/secret/data/app");
        assert_eq!(store.url_for("secret/app"), "http://vault:8200/v1/secret/app");
        assert_eq!(store.base_url(), "http://vault:8200/");
    }
}
