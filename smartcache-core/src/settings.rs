//! Runtime settings.
//!
//! Settings select and tune the storage backend. They come from defaults,
//! `SMARTCACHE_*` environment variables, or a JSON file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::*;
use crate::error::{Result, SmartCacheError};

/// Storage backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process LRU cache
    #[default]
    Memory,
    /// Redis server
    Redis,
    /// Memcached server
    Memcached,
}

impl BackendKind {
    /// Returns the canonical backend name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::Memcached => "memcached",
        }
    }

    /// Returns the address used when no host is configured.
    pub fn default_host(&self) -> Option<&'static str> {
        match self {
            BackendKind::Memory => None,
            BackendKind::Redis => Some(DEFAULT_REDIS_URL),
            BackendKind::Memcached => Some(DEFAULT_MEMCACHED_ADDR),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SmartCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "local" | "inmemory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            "memcached" | "memcache" => Ok(BackendKind::Memcached),
            other => Err(SmartCacheError::UnknownBackend(other.to_string())),
        }
    }
}

/// SmartCache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Storage backend
    pub backend: BackendKind,
    /// Backend host or URL (backend default when absent)
    pub host: Option<String>,
    /// Default entry TTL in seconds; `None` keeps entries until evicted
    pub default_timeout_seconds: Option<u64>,
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// Log hits and misses at info level
    pub verbose: bool,
    /// Call through to the function when the backend fails
    pub fail_open: bool,
    /// Capacity of the memory backend
    pub max_entries: usize,
    /// Timeout for establishing backend connections
    pub connect_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            host: None,
            default_timeout_seconds: Some(DEFAULT_TIMEOUT_SECONDS),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            verbose: false,
            fail_open: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
        }
    }
}

impl Settings {
    /// Creates settings for the given backend with all other values defaulted.
    pub fn for_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Sets the backend host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Disables expiry for entries without an explicit TTL.
    pub fn no_expiry(mut self) -> Self {
        self.default_timeout_seconds = None;
        self
    }

    /// Loads settings from `SMARTCACHE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads settings through an arbitrary variable lookup.
    ///
    /// Missing variables keep their defaults; malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(backend) = lookup(ENV_BACKEND) {
            settings.backend = backend.parse()?;
        }
        if let Some(host) = lookup(ENV_HOST) {
            let host = host.trim();
            if !host.is_empty() {
                settings.host = Some(host.to_string());
            }
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            settings.default_timeout_seconds = parse_timeout(&timeout)?;
        }
        if let Some(prefix) = lookup(ENV_PREFIX) {
            settings.key_prefix = prefix.trim().to_string();
        }
        if let Some(verbose) = lookup(ENV_VERBOSE) {
            settings.verbose = parse_flag(ENV_VERBOSE, &verbose)?;
        }
        if let Some(fail_open) = lookup(ENV_FAIL_OPEN) {
            settings.fail_open = parse_flag(ENV_FAIL_OPEN, &fail_open)?;
        }
        if let Some(max_entries) = lookup(ENV_MAX_ENTRIES) {
            settings.max_entries = max_entries.trim().parse().map_err(|_| {
                SmartCacheError::ConfigError(format!(
                    "{ENV_MAX_ENTRIES} must be a positive integer, got '{max_entries}'"
                ))
            })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let settings: Settings = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<()> {
        validate_prefix(&self.key_prefix)?;

        if self.max_entries == 0 {
            return Err(SmartCacheError::ConfigError(
                "max_entries must be greater than zero".into(),
            ));
        }

        if let Some(seconds) = self.default_timeout_seconds {
            if seconds > MAX_TIMEOUT_SECONDS {
                return Err(SmartCacheError::ConfigError(format!(
                    "default_timeout_seconds {seconds} exceeds {MAX_TIMEOUT_SECONDS}"
                )));
            }
        }

        if self.backend == BackendKind::Redis {
            let url = Url::parse(&self.resolved_host())?;
            if !matches!(url.scheme(), "redis" | "rediss") {
                return Err(SmartCacheError::ConfigError(format!(
                    "redis host must use the redis:// or rediss:// scheme, got '{}'",
                    url.scheme()
                )));
            }
        }

        Ok(())
    }

    /// Returns the effective host for the configured backend.
    ///
    /// Empty for the memory backend. A `memcache://` scheme is stripped.
    pub fn resolved_host(&self) -> String {
        let host = self
            .host
            .as_deref()
            .or_else(|| self.backend.default_host())
            .unwrap_or_default();

        match self.backend {
            BackendKind::Memcached => host
                .strip_prefix("memcache://")
                .or_else(|| host.strip_prefix("memcached://"))
                .unwrap_or(host)
                .trim_end_matches('/')
                .to_string(),
            _ => host.to_string(),
        }
    }
}

/// Parses a timeout value; `0`, `none`, and empty disable expiry.
fn parse_timeout(value: &str) -> Result<Option<u64>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    match value.parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(seconds) => Ok(Some(seconds)),
        Err(_) => Err(SmartCacheError::ConfigError(format!(
            "{ENV_TIMEOUT} must be a number of seconds or 'none', got '{value}'"
        ))),
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(SmartCacheError::ConfigError(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(SmartCacheError::ConfigError("key prefix must not be empty".into()));
    }
    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err(SmartCacheError::ConfigError(format!(
            "key prefix longer than {MAX_PREFIX_LENGTH} bytes"
        )));
    }
    if prefix
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == KEY_SEPARATOR)
    {
        return Err(SmartCacheError::ConfigError(format!(
            "key prefix '{prefix}' must not contain whitespace, control characters, or ':'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use test_case::test_case;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test_case("memory", BackendKind::Memory)]
    #[test_case("Redis", BackendKind::Redis)]
    #[test_case("memcache", BackendKind::Memcached)]
    #[test_case(" MEMCACHED ", BackendKind::Memcached)]
    fn test_backend_kind_parse(input: &str, expected: BackendKind) {
        assert_eq!(input.parse::<BackendKind>().unwrap(), expected);
    }

    #[test]
    fn test_backend_kind_unknown() {
        let err = "mongodb".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, SmartCacheError::UnknownBackend(name) if name == "mongodb"));
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.default_timeout_seconds, Some(DEFAULT_TIMEOUT_SECONDS));
        assert!(settings.fail_open);
        assert_eq!(settings.resolved_host(), "");
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_lookup_full() {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_BACKEND, "memcached"),
            (ENV_HOST, "memcache://cache.internal:11311"),
            (ENV_TIMEOUT, "60"),
            (ENV_PREFIX, "shop"),
            (ENV_VERBOSE, "yes"),
            (ENV_FAIL_OPEN, "false"),
            (ENV_MAX_ENTRIES, "10"),
        ]))
        .unwrap();

        assert_eq!(settings.backend, BackendKind::Memcached);
        assert_eq!(settings.resolved_host(), "cache.internal:11311");
        assert_eq!(settings.default_timeout_seconds, Some(60));
        assert_eq!(settings.key_prefix, "shop");
        assert!(settings.verbose);
        assert!(!settings.fail_open);
        assert_eq!(settings.max_entries, 10);
    }

    #[test_case("0", None)]
    #[test_case("none", None)]
    #[test_case("NONE", None)]
    #[test_case("15", Some(15))]
    fn test_timeout_parsing(input: &str, expected: Option<u64>) {
        let settings = Settings::from_lookup(lookup(&[(ENV_TIMEOUT, input)])).unwrap();
        assert_eq!(settings.default_timeout_seconds, expected);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(Settings::from_lookup(lookup(&[(ENV_TIMEOUT, "soon")])).is_err());
        assert!(Settings::from_lookup(lookup(&[(ENV_VERBOSE, "maybe")])).is_err());
        assert!(Settings::from_lookup(lookup(&[(ENV_MAX_ENTRIES, "-3")])).is_err());
        assert!(Settings::from_lookup(lookup(&[(ENV_MAX_ENTRIES, "0")])).is_err());
    }

    #[test]
    fn test_timeout_upper_bound() {
        let at_limit = Settings {
            default_timeout_seconds: Some(MAX_TIMEOUT_SECONDS),
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        let beyond = Settings {
            default_timeout_seconds: Some(10_000_000_000_000),
            ..Default::default()
        };
        assert!(matches!(beyond.validate(), Err(SmartCacheError::ConfigError(_))));
    }

    #[test_case("" ; "empty")]
    #[test_case("has space" ; "whitespace")]
    #[test_case("a:b" ; "separator")]
    fn test_invalid_prefix(prefix: &str) {
        let settings = Settings::default().with_prefix(prefix);
        assert!(matches!(settings.validate(), Err(SmartCacheError::ConfigError(_))));
    }

    #[test]
    fn test_redis_host_validation() {
        let ok = Settings::for_backend(BackendKind::Redis);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.resolved_host(), DEFAULT_REDIS_URL);

        let wrong_scheme = Settings::for_backend(BackendKind::Redis).with_host("http://localhost");
        assert!(matches!(wrong_scheme.validate(), Err(SmartCacheError::ConfigError(_))));

        let garbage = Settings::for_backend(BackendKind::Redis).with_host("not a url");
        assert!(matches!(garbage.validate(), Err(SmartCacheError::InvalidUrl(_))));
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"backend": "redis", "host": "redis://10.0.0.5:6380/2", "verbose": true}}"#).unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.backend, BackendKind::Redis);
        assert_eq!(settings.resolved_host(), "redis://10.0.0.5:6380/2");
        assert!(settings.verbose);
        assert_eq!(settings.key_prefix, DEFAULT_KEY_PREFIX);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Settings::from_file("/nonexistent/smartcache.json").unwrap_err();
        assert!(matches!(err, SmartCacheError::IoError(_)));
    }
}
