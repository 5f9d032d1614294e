//! Error types for watchkeeper.
//!
//! Two families live here. [`ConfigError`] covers everything that can go wrong
//! before a watch starts and is fatal to startup. [`BackendError`] covers
//! transient failures while talking to an observed system; backends absorb
//! these into an unhealthy check result and never hand them to callers.

use std::fmt;

/// Result type alias for configuration-time operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading settings or resolving watches.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A watch was defined without a name.
    #[error("'name' must not be blank")]
    BlankName,

    /// A watch name does not match the grammar of its source.
    #[error("{0}")]
    InvalidName(String),

    /// The poll interval was zero or negative.
    #[error("watch[{0}].interval must be > 0")]
    InvalidInterval(String),

    /// The watch asks for a source that has no configured backend.
    #[error("watch[{name}].source is {source_name} but {source_name} config is not defined")]
    BackendNotConfigured {
        /// Watch name as written in the definition
        name: String,
        /// Requested source type
        source_name: String,
    },

    /// The watch asks for a source type that does not exist.
    #[error("watch[{name}].source '{source_name}' is not supported")]
    UnknownSource {
        /// Watch name as written in the definition
        name: String,
        /// Requested source type
        source_name: String,
    },

    /// The secret store was configured without any usable token.
    #[error("no vault token defined")]
    MissingToken,

    /// One or more watch records could not be decoded.
    #[error("Watch configuration error: {0}")]
    Decode(ValidationError),

    /// Failed to load the settings file or environment overrides.
    #[error("Failed to load settings: {0}")]
    LoadError(String),

    /// TLS material could not be read or applied to a transport client.
    #[error("TLS configuration error: {0}")]
    TlsError(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// Validation error produced while decoding untyped watch records.
#[derive(Debug)]
pub enum ValidationError {
    /// A specific field has an invalid value.
    InvalidField {
        /// The field path, e.g. `[0].interval`
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Collapse a list of errors, returning `None` when it is empty.
    pub(crate) fn collect(mut errors: Vec<ValidationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidField { field, reason } => {
                write!(f, "cannot parse '{}': {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "{} error(s) decoding:", errors.len())?;
                for err in errors {
                    writeln!(f, "* {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ConfigError {
    fn from(err: ValidationError) -> Self {
        ConfigError::Decode(err)
    }
}

/// Transient failures raised while reading an observed system.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Local IO failed (missing file, permissions, token file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The remote answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// The requested key does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The response body could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[cfg(feature = "http-transport")]
impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_messages() {
        assert_eq!(ConfigError::BlankName.to_string(), "'name' must not be blank");
        assert_eq!(
            ConfigError::InvalidInterval("myName".into()).to_string(),
            "watch[myName].interval must be > 0"
        );
        assert_eq!(
            ConfigError::BackendNotConfigured {
                name: "myName".into(),
                source_name: "vault".into(),
            }
            .to_string(),
            "watch[myName].source is vault but vault config is not defined"
        );
    }

    #[test]
    fn test_multiple_names_every_field() {
        let err = ValidationError::collect(vec![
            ValidationError::invalid_field("[0].interval", "not a number"),
            ValidationError::invalid_field("[2].name", "expected a string"),
        ])
        .unwrap();
        let text = ConfigError::from(err).to_string();
        assert!(text.starts_with("Watch configuration error: 2 error(s) decoding:"));
        assert!(text.contains("'[0].interval'"));
        assert!(text.contains("'[2].name'"));
    }

    #[test]
    fn test_collect_single_and_empty() {
        assert!(ValidationError::collect(Vec::new()).is_none());
        let single = ValidationError::collect(vec![ValidationError::invalid_field(
            "[1].dc",
            "expected a string, got int",
        )])
        .unwrap();
        assert!(matches!(single, ValidationError::InvalidField { .. }));
        assert_eq!(single.to_string(), "cannot parse '[1].dc': expected a string, got int");
    }
}
