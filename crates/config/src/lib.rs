//! Configuration loading and validation for Strata.
//!
//! Loads configuration from `~/.strata/config.toml` with `STRATA_*`
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.strata/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Deployment environment name (development, staging, production)
    #[serde(default = "default_env")]
    pub env: String,

    /// Feature serving API
    #[serde(default)]
    pub serving: ServingConfig,

    /// Circuit breaker guarding the online cache
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Context assembly defaults
    #[serde(default)]
    pub context: ContextSettings,

    /// Where assembled contexts are recorded
    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

fn default_env() -> String {
    "development".into()
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            env: default_env(),
            serving: ServingConfig::default(),
            breaker: BreakerSettings::default(),
            context: ContextSettings::default(),
            audit: AuditSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// When set, clients must send a matching `X-API-Key` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ServingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a probe
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    /// Deadline per guarded call; 0 disables it
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_secs() -> u64 {
    60
}
fn default_call_timeout_ms() -> u64 {
    500
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl BreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Pricing model for contexts that name none
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_trace_ttl_secs")]
    pub trace_ttl_secs: u64,

    /// Deadline for each cache, trace, and audit write
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// "graceful" or "strict"
    #[serde(default = "default_budget_policy")]
    pub budget_policy: String,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_trace_ttl_secs() -> u64 {
    86_400
}
fn default_io_timeout_ms() -> u64 {
    1_000
}
fn default_budget_policy() -> String {
    "graceful".into()
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            trace_ttl_secs: default_trace_ttl_secs(),
            io_timeout_ms: default_io_timeout_ms(),
            budget_policy: default_budget_policy(),
        }
    }
}

impl ContextSettings {
    pub fn trace_ttl(&self) -> Duration {
        Duration::from_secs(self.trace_ttl_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// "memory", "file", or "none"
    #[serde(default = "default_audit_backend")]
    pub backend: String,

    /// JSONL file for the "file" backend; defaults to `~/.strata/audit/contexts.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_audit_backend() -> String {
    "file".into()
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            backend: default_audit_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

const AUDIT_BACKENDS: &[&str] = &["memory", "file", "none"];
const BUDGET_POLICIES: &[&str] = &["graceful", "strict"];

impl StrataConfig {
    /// Load configuration from the default path (~/.strata/config.toml).
    ///
    /// Environment variables override the file:
    /// - `STRATA_ENV`
    /// - `STRATA_API_KEY`
    /// - `STRATA_HOST`
    /// - `STRATA_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STRATA_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(env) = lookup("STRATA_ENV") {
            self.env = env;
        }
        if let Some(key) = lookup("STRATA_API_KEY").filter(|k| !k.is_empty()) {
            self.serving.api_key = Some(key);
        }
        if let Some(host) = lookup("STRATA_HOST") {
            self.serving.host = host;
        }
        if let Some(port) = lookup("STRATA_PORT") {
            self.serving.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("STRATA_PORT must be a port number, got '{port}'"))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".strata")
    }

    /// Default location of the file audit log.
    pub fn default_audit_path() -> PathBuf {
        Self::config_dir().join("audit").join("contexts.jsonl")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.breaker.reset_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "breaker.reset_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.context.trace_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "context.trace_ttl_secs must be greater than 0".into(),
            ));
        }
        if !BUDGET_POLICIES.contains(&self.context.budget_policy.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "context.budget_policy must be one of {BUDGET_POLICIES:?}, got '{}'",
                self.context.budget_policy
            )));
        }
        if !AUDIT_BACKENDS.contains(&self.audit.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "audit.backend must be one of {AUDIT_BACKENDS:?}, got '{}'",
                self.audit.backend
            )));
        }
        Ok(())
    }

    /// Socket address string for the serving API.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.serving.host, self.serving.port)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = StrataConfig::default();
        config.validate().unwrap();
        assert_eq!(config.env, "development");
        assert_eq!(config.serving.port, 8000);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.reset_timeout(), Duration::from_secs(60));
        assert_eq!(config.context.default_model, "gpt-4o");
        assert_eq!(config.context.trace_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = StrataConfig::parse("").unwrap();
        assert_eq!(config.env, "development");
        assert_eq!(config.audit.backend, "file");
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = StrataConfig::default_toml();
        let parsed = StrataConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.serving.port, 8000);
        assert_eq!(parsed.context.budget_policy, "graceful");
    }

    #[test]
    fn sections_parse() {
        let config = StrataConfig::parse(
            r#"
env = "production"

[serving]
port = 9100
api_key = "secret"

[breaker]
failure_threshold = 3
call_timeout_ms = 0

[context]
budget_policy = "strict"

[audit]
backend = "memory"
"#,
        )
        .unwrap();
        assert_eq!(config.env, "production");
        assert_eq!(config.serving.port, 9100);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.call_timeout(), None);
        assert_eq!(config.context.budget_policy, "strict");
        assert_eq!(config.audit.backend, "memory");
    }

    #[test]
    fn invalid_values_rejected() {
        for doc in [
            "[breaker]\nfailure_threshold = 0",
            "[breaker]\nreset_timeout_secs = 0",
            "[context]\ntrace_ttl_secs = 0",
            "[context]\nbudget_policy = \"lenient\"",
            "[audit]\nbackend = \"s3\"",
        ] {
            assert!(
                matches!(StrataConfig::parse(doc), Err(ConfigError::ValidationError(_))),
                "{doc} should fail validation"
            );
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            StrataConfig::parse("[serving\nport = 1"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STRATA_ENV", "staging"),
            ("STRATA_API_KEY", "k-123"),
            ("STRATA_HOST", "0.0.0.0"),
            ("STRATA_PORT", "9000"),
        ]);
        let mut config = StrataConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.env, "staging");
        assert_eq!(config.serving.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
    }

    #[test]
    fn bad_port_override_rejected() {
        let mut config = StrataConfig::default();
        let result = config.apply_env(|name| (name == "STRATA_PORT").then(|| "http".to_string()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn api_key_is_redacted() {
        let mut config = StrataConfig::default();
        config.serving.api_key = Some("super-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn missing_file_returns_defaults() {
        let config = StrataConfig::load_from(Path::new("/nonexistent/strata.toml")).unwrap();
        assert_eq!(config.serving.port, 8000);
    }

    #[test]
    fn load_from_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        match StrataConfig::load_from(&path) {
            Err(ConfigError::ParseError { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
