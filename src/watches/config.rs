//! Watch definitions and their resolution against the configured backends.

use super::names::validate_name;
use crate::error::{ConfigError, Result, ValidationError};
use crate::surveillee::{Backend, BackendKind, Surveillees};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Prefix applied to every watch name to form its event source.
pub const WATCH_PREFIX: &str = "watch.";

/// An undecorated watch definition, as written by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchDefinition {
    /// Target name: service name, secret path or file path
    pub name: String,
    /// `"consul"`, `"vault"`, `"file"` or empty for discovery
    pub source: String,
    /// Poll interval in seconds
    pub interval: i64,
    /// Discovery tag, or the secret field to compare
    pub tag: String,
    /// Discovery datacenter
    pub dc: String,
}

impl WatchDefinition {
    /// Definition with the given name, source and interval.
    pub fn new(name: impl Into<String>, source: impl Into<String>, interval: i64) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            interval,
            ..Self::default()
        }
    }

    /// Set the tag (discovery tag or secret field).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set the discovery datacenter.
    pub fn with_dc(mut self, dc: impl Into<String>) -> Self {
        self.dc = dc.into();
        self
    }

    /// Decode one untyped record. Field errors are pushed onto `errors`
    /// with an `[index].field` path.
    fn decode(index: usize, raw: &Value, errors: &mut Vec<ValidationError>) -> Self {
        let mut def = Self::default();
        let Some(map) = raw.as_object() else {
            errors.push(ValidationError::invalid_field(
                format!("[{index}]"),
                format!("expected a map, got {}", type_name(raw)),
            ));
            return def;
        };
        for (key, value) in map {
            let field = format!("[{index}].{key}");
            let decoded = match key.as_str() {
                "name" => decode_string(value).map(|v| def.name = v),
                "source" => decode_string(value).map(|v| def.source = v),
                "tag" => decode_string(value).map(|v| def.tag = v),
                "dc" => decode_string(value).map(|v| def.dc = v),
                "interval" => decode_int(value).map(|v| def.interval = v),
                _ => Ok(()),
            };
            if let Err(reason) = decoded {
                errors.push(ValidationError::invalid_field(field, reason));
            }
        }
        def
    }

    /// Resolve this definition against the available backends.
    ///
    /// Checks run in order: blank name, interval, source and backend, then
    /// the name grammar of the source.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn validate(self, surveillees: &Surveillees) -> Result<WatchConfig> {
        if self.name.is_empty() {
            return Err(ConfigError::BlankName);
        }
        if self.interval < 1 {
            return Err(ConfigError::InvalidInterval(self.name));
        }
        let kind = match self.source.as_str() {
            "" | "consul" => BackendKind::Discovery,
            "vault" => BackendKind::SecretReader,
            "file" => BackendKind::FileHasher,
            other => {
                return Err(ConfigError::UnknownSource {
                    name: self.name.clone(),
                    source_name: other.to_string(),
                });
            }
        };
        let backend = surveillees
            .get(kind)
            .ok_or_else(|| ConfigError::BackendNotConfigured {
                name: self.name.clone(),
                source_name: kind.to_string(),
            })?;
        validate_name(&self.name, &self.source)?;

        Ok(WatchConfig {
            name: format!("{WATCH_PREFIX}{}", self.name),
            service_name: self.name,
            kind,
            poll: Duration::from_secs(self.interval.unsigned_abs()),
            tag: self.tag,
            dc: self.dc,
            backend,
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

fn decode_string(value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        other => Err(format!("expected a string, got {}", type_name(other))),
    }
}

fn decode_int(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("{n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|e| format!("parsing {s:?}: {e}")),
        other => Err(format!("expected an int, got {}", type_name(other))),
    }
}

/// A validated watch, bound to the backend that serves its source.
///
/// Immutable once built. The backend is shared with every other watch of
/// the same source.
#[derive(Clone)]
pub struct WatchConfig {
    name: String,
    service_name: String,
    kind: BackendKind,
    poll: Duration,
    tag: String,
    dc: String,
    backend: Arc<dyn Backend>,
}

impl WatchConfig {
    /// Event source of this watch: `watch.<service name>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The undecorated target name, used as the backend request key.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Which backend kind serves this watch.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Period between checks.
    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Discovery tag, or the secret field to compare.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Discovery datacenter.
    pub fn dc(&self) -> &str {
        &self.dc
    }

    /// Source of this watch's own timer events.
    pub fn poll_source(&self) -> String {
        format!("{}.poll", self.name)
    }

    /// The bound backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Addressing passed to the backend on every check.
    pub fn request_fields(&self) -> Vec<String> {
        match self.kind {
            BackendKind::FileHasher => vec![self.service_name.clone()],
            BackendKind::SecretReader => vec![self.service_name.clone(), self.tag.clone()],
            BackendKind::Discovery => vec![
                self.service_name.clone(),
                self.tag.clone(),
                self.dc.clone(),
            ],
        }
    }
}

impl fmt::Debug for WatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("poll", &self.poll)
            .field("tag", &self.tag)
            .field("dc", &self.dc)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for WatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watches.Config[{}]", self.name)
    }
}

/// Decode and validate an ordered list of untyped watch records.
///
/// All records are decoded first; any decode failure aborts with a single
/// error naming every offending `[index].field`. Validation then stops at the
/// first invalid watch.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use watchkeeper::surveillee::{FileHasher, Surveillees};
/// use watchkeeper::watches::new_configs;
///
/// let surveillees = Surveillees::new(None, Some(Arc::new(FileHasher::new())), None);
/// let raw = serde_json::json!([{"name": "/etc/app.conf", "source": "file", "interval": 5}]);
///
/// let configs = new_configs(raw.as_array().unwrap(), &surveillees).unwrap();
/// assert_eq!(configs[0].name(), "watch./etc/app.conf");
/// ```
pub fn new_configs(raw: &[Value], surveillees: &Surveillees) -> Result<Vec<WatchConfig>> {
    let mut errors = Vec::new();
    let definitions: Vec<WatchDefinition> = raw
        .iter()
        .enumerate()
        .map(|(index, record)| WatchDefinition::decode(index, record, &mut errors))
        .collect();
    if let Some(err) = ValidationError::collect(errors) {
        return Err(err.into());
    }
    definitions
        .into_iter()
        .map(|def| def.validate(surveillees))
        .collect()
}
