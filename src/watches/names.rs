//! Naming grammars for watch targets.

use crate::error::{ConfigError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static SERVICE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-zA-Z0-9\-]+$").unwrap());

static SECRET_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9/_\-\s.]+$").unwrap());

static FILE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/[a-zA-Z0-9_\-\s.]+)+(\.[a-zA-Z0-9]+)?$").unwrap());

/// Check `name` against the grammar required by `source`.
///
/// - `"vault"`: hierarchical secret path (`secret/data/app`)
/// - `"file"`: absolute filesystem path (`/etc/app/config.json`)
/// - anything else: a service name that is DNS and discovery compatible
///
/// # Examples
///
/// ```rust
/// use watchkeeper::watches::validate_name;
///
/// assert!(validate_name("upstream-a", "consul").is_ok());
/// assert!(validate_name("secret/data/app", "vault").is_ok());
/// assert!(validate_name("/etc/app.conf", "file").is_ok());
/// assert!(validate_name("Upstream", "consul").is_err());
/// ```
pub fn validate_name(name: &str, source: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConfigError::BlankName);
    }
    let (pattern, message) = match source {
        "vault" => (&*SECRET_PATH, "service name must be valid vault path"),
        "file" => (&*FILE_PATH, "service name must be valid file path"),
        _ => (
            &*SERVICE_NAME,
            "service name must be alphanumeric with dashes to comply with service discovery",
        ),
    };
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(message.to_string()))
    }
}
