//! Configuration structures.
//!
//! Configuration is layered: defaults, then an optional JSON config file,
//! then environment variables. The binary applies CLI flags on top. The
//! result is read once at startup and never mutated afterwards.

use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Conversion engine connection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Gate policy.
    #[serde(default)]
    pub gates: GateConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Stdio transport limits.
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Conversion engine connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the AnyToAny REST API.
    pub base_url: String,

    /// Credential value sent on every request. Empty disables the header.
    pub api_key: String,

    /// Header carrying the credential.
    pub auth_header: String,

    /// Per-call timeout, applied to every outbound request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum bytes of an error body kept in `BackendError` messages.
    pub max_error_detail: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: "demo-key-12345".to_string(),
            auth_header: "X-API-Key".to_string(),
            timeout: Duration::from_secs(120),
            max_error_detail: 2000,
        }
    }
}

/// Who may assert that input was already validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallerAttestation {
    /// `pre_validated` is ignored; Gate 1 always runs.
    #[default]
    Deny,
    /// Any caller may skip Gate 1 with `pre_validated: true`.
    Allow,
}

/// Gate policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Whether Gate 1 may be skipped on caller attestation. Gate 5 never is.
    pub caller_attestation: CallerAttestation,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Stdio transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum accepted size of one JSON-RPC line in bytes.
    pub max_message_bytes: usize,

    /// Bounded channel capacity between call tasks and the stdout writer.
    pub outbound_channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 16 * 1024 * 1024,
            outbound_channel_capacity: 64,
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing sections fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid config file {}: {}", path.display(), e)))
    }

    /// Overlay values from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_env_source(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup (the environment in production).
    pub fn with_env_source<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("REDIX_API_BASE") {
            self.backend.base_url = base;
        }
        if let Some(key) = lookup("REDIX_API_KEY") {
            self.backend.api_key = key;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::config(format!("REQUEST_TIMEOUT must be whole seconds, got '{}'", secs))
            })?;
            self.backend.timeout = Duration::from_secs(secs);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.observability.log_level = level.to_ascii_lowercase();
        }
        if let Some(format) = lookup("REDIX_LOG_FORMAT") {
            self.observability.json_logs = format.eq_ignore_ascii_case("json");
        }
        if let Some(flag) = lookup("REDIX_ALLOW_PREVALIDATED") {
            self.gates.caller_attestation = if parse_flag(&flag) {
                CallerAttestation::Allow
            } else {
                CallerAttestation::Deny
            };
        }
        Ok(self)
    }

    /// Reject configurations the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        let base = self.backend.base_url.trim();
        if base.is_empty() {
            return Err(Error::config("backend.base_url cannot be empty"));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::config(format!(
                "backend.base_url must be an http(s) URL, got '{}'",
                base
            )));
        }
        if self.backend.timeout.is_zero() {
            return Err(Error::config("backend.timeout must be positive"));
        }
        if self.backend.auth_header.trim().is_empty() {
            return Err(Error::config("backend.auth_header cannot be empty"));
        }
        if self.transport.outbound_channel_capacity == 0 {
            return Err(Error::config("transport.outbound_channel_capacity must be positive"));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_engine_conventions() {
        let config = Config::default();
        assert_eq!(config.backend.base_url, "http://localhost:8080");
        assert_eq!(config.backend.auth_header, "X-API-Key");
        assert_eq!(config.backend.timeout, Duration::from_secs(120));
        assert_eq!(config.gates.caller_attestation, CallerAttestation::Deny);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let config = Config::default()
            .with_env_source(env(&[
                ("REDIX_API_BASE", "https://engine.internal:9443"),
                ("REDIX_API_KEY", "secret"),
                ("REQUEST_TIMEOUT", "15"),
                ("LOG_LEVEL", "DEBUG"),
                ("REDIX_ALLOW_PREVALIDATED", "true"),
            ]))
            .unwrap();

        assert_eq!(config.backend.base_url, "https://engine.internal:9443");
        assert_eq!(config.backend.api_key, "secret");
        assert_eq!(config.backend.timeout, Duration::from_secs(15));
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.gates.caller_attestation, CallerAttestation::Allow);
    }

    #[test]
    fn test_env_rejects_non_numeric_timeout() {
        let result = Config::default().with_env_source(env(&[("REQUEST_TIMEOUT", "2m")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.backend.base_url = "ftp://engine".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.base_url = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"backend": {{"base_url": "http://10.0.0.5:8080", "timeout": "30s"}},
                "gates": {{"caller_attestation": "allow"}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.backend.base_url, "http://10.0.0.5:8080");
        assert_eq!(config.backend.timeout, Duration::from_secs(30));
        // Unspecified fields keep their defaults
        assert_eq!(config.backend.auth_header, "X-API-Key");
        assert_eq!(config.gates.caller_attestation, CallerAttestation::Allow);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_from_file_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(Config::from_file(file.path()), Err(Error::Config(_))));
    }
}
