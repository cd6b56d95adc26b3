// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime configuration for the `agent://` protocol core (§6).
//!
//! [`AgentConfig`] holds every knob the resolver, transport bindings, and
//! descriptor loader read at runtime. [`load_config`] reads an optional TOML
//! file and layers `AGENT_URI_*` environment overrides on top;
//! [`merge_configs`] combines a base and an overlay with overlay precedence.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors / warnings
// ---------------------------------------------------------------------------

/// Errors that can occur loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or not readable.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level configuration issues that don't prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A numeric setting is unusually large and likely a mistake.
    UnusuallyLarge {
        /// Field name.
        field: &'static str,
        /// The value that triggered the warning.
        value: u64,
    },
    /// `strict_mode` is off, so malformed descriptors with unknown fields
    /// will be tolerated rather than rejected.
    LenientMode,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::UnusuallyLarge { field, value } => {
                write!(f, "'{field}' is unusually large ({value})")
            }
            ConfigWarning::LenientMode => {
                write!(f, "strict_mode is off; descriptor validation errors are non-fatal")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Top-level runtime configuration (§6).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Overall deadline for a single `invoke`/`stream` call, in milliseconds.
    pub timeout_ms: u64,
    /// Upper bound on B1 GET retry attempts.
    pub retries_max: u32,
    /// Default cache lifetime when a server sends no cache headers, in seconds.
    pub cache_ttl_default_s: u64,
    /// LRU bound on the resolver cache, in entries.
    pub cache_max_entries: usize,
    /// B1 connection pool size per origin.
    pub pool_per_origin_max: usize,
    /// Idle connection reaper deadline, in seconds.
    pub idle_timeout_s: u64,
    /// Whether B1 `invoke`/`stream` calls follow HTTP redirects.
    pub follow_redirects_invoke: bool,
    /// Whether descriptor fetches follow HTTP redirects.
    pub follow_redirects_descriptor: bool,
    /// When `true`, descriptor validation errors are fatal; when `false`,
    /// unknown fields and soft violations are tolerated.
    pub strict_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries_max: 3,
            cache_ttl_default_s: 300,
            cache_max_entries: 1_000,
            pool_per_origin_max: 10,
            idle_timeout_s: 60,
            follow_redirects_invoke: true,
            follow_redirects_descriptor: false,
            strict_mode: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_REASONABLE_TIMEOUT_MS: u64 = 600_000;
const MAX_REASONABLE_RETRIES: u32 = 20;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`AgentConfig`] from an optional TOML file, then apply
/// `AGENT_URI_*` environment overrides.
///
/// `path = None` starts from [`AgentConfig::default`].
pub fn load_config(path: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => AgentConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into an [`AgentConfig`].
pub fn parse_toml(content: &str) -> Result<AgentConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply `AGENT_URI_*` environment variable overrides.
///
/// Recognised variables: `AGENT_URI_TIMEOUT_MS`, `AGENT_URI_RETRIES_MAX`,
/// `AGENT_URI_CACHE_TTL_DEFAULT_S`, `AGENT_URI_CACHE_MAX_ENTRIES`,
/// `AGENT_URI_POOL_PER_ORIGIN_MAX`, `AGENT_URI_IDLE_TIMEOUT_S`,
/// `AGENT_URI_STRICT_MODE`, `AGENT_URI_DEBUG` (sets `strict_mode = false`
/// and widens timeouts for local debugging).
pub fn apply_env_overrides(config: &mut AgentConfig) {
    if let Some(v) = env_u64("AGENT_URI_TIMEOUT_MS") {
        config.timeout_ms = v;
    }
    if let Some(v) = env_u32("AGENT_URI_RETRIES_MAX") {
        config.retries_max = v;
    }
    if let Some(v) = env_u64("AGENT_URI_CACHE_TTL_DEFAULT_S") {
        config.cache_ttl_default_s = v;
    }
    if let Some(v) = env_usize("AGENT_URI_CACHE_MAX_ENTRIES") {
        config.cache_max_entries = v;
    }
    if let Some(v) = env_usize("AGENT_URI_POOL_PER_ORIGIN_MAX") {
        config.pool_per_origin_max = v;
    }
    if let Some(v) = env_u64("AGENT_URI_IDLE_TIMEOUT_S") {
        config.idle_timeout_s = v;
    }
    if let Some(v) = env_bool("AGENT_URI_STRICT_MODE") {
        config.strict_mode = v;
    }
    if env_bool("AGENT_URI_DEBUG").unwrap_or(false) {
        config.strict_mode = false;
        config.timeout_ms = config.timeout_ms.max(120_000);
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| match v.as_str() {
        "1" | "true" | "TRUE" | "yes" => Some(true),
        "0" | "false" | "FALSE" | "no" => Some(false),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a configuration, returning advisory warnings.
///
/// Hard errors (zero pool size, zero cache bound) come back as
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &AgentConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.pool_per_origin_max == 0 {
        errors.push("pool_per_origin_max must be at least 1".to_string());
    }
    if config.cache_max_entries == 0 {
        errors.push("cache_max_entries must be at least 1".to_string());
    }
    if config.timeout_ms == 0 {
        errors.push("timeout_ms must be greater than zero".to_string());
    }

    if config.timeout_ms > MAX_REASONABLE_TIMEOUT_MS {
        warnings.push(ConfigWarning::UnusuallyLarge {
            field: "timeout_ms",
            value: config.timeout_ms,
        });
    }
    if config.retries_max > MAX_REASONABLE_RETRIES {
        warnings.push(ConfigWarning::UnusuallyLarge {
            field: "retries_max",
            value: config.retries_max as u64,
        });
    }
    if !config.strict_mode {
        warnings.push(ConfigWarning::LenientMode);
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations; every field present in `overlay` (i.e. every
/// field, since [`AgentConfig`] has no optional fields) wins over `base`.
///
/// Kept for symmetry with layered loading (defaults → file → env → overlay);
/// currently equivalent to returning `overlay` outright.
pub fn merge_configs(_base: AgentConfig, overlay: AgentConfig) -> AgentConfig {
    overlay
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let cfg = AgentConfig::default();
        validate_config(&cfg).expect("default config should be valid");
    }

    #[test]
    fn default_config_warns_about_lenient_mode() {
        let cfg = AgentConfig::default();
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.contains(&ConfigWarning::LenientMode));
    }

    #[test]
    fn parse_toml_overrides_selected_fields() {
        let toml = r#"
            timeout_ms = 5000
            strict_mode = true
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.timeout_ms, 5000);
        assert!(cfg.strict_mode);
        // untouched fields keep their defaults
        assert_eq!(cfg.retries_max, 3);
    }

    #[test]
    fn parse_toml_rejects_garbage() {
        let err = parse_toml("not = [valid").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn load_config_reads_file_and_applies_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pool_per_origin_max = 25").unwrap();

        // SAFETY-irrelevant: single-threaded test process env mutation.
        unsafe {
            std::env::set_var("AGENT_URI_TIMEOUT_MS", "9999");
        }
        let cfg = load_config(Some(file.path())).unwrap();
        unsafe {
            std::env::remove_var("AGENT_URI_TIMEOUT_MS");
        }

        assert_eq!(cfg.pool_per_origin_max, 25);
        assert_eq!(cfg.timeout_ms, 9999);
    }

    #[test]
    fn load_config_none_path_returns_defaults_with_env_applied() {
        unsafe {
            std::env::set_var("AGENT_URI_STRICT_MODE", "true");
        }
        let cfg = load_config(None).unwrap();
        unsafe {
            std::env::remove_var("AGENT_URI_STRICT_MODE");
        }
        assert!(cfg.strict_mode);
    }

    #[test]
    fn validate_config_rejects_zero_pool_size() {
        let mut cfg = AgentConfig::default();
        cfg.pool_per_origin_max = 0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validate_config_warns_on_unusually_large_timeout() {
        let mut cfg = AgentConfig::default();
        cfg.timeout_ms = 10_000_000;
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::UnusuallyLarge { field: "timeout_ms", .. })));
    }

    #[test]
    fn merge_configs_overlay_wins() {
        let base = AgentConfig::default();
        let mut overlay = AgentConfig::default();
        overlay.timeout_ms = 1234;
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.timeout_ms, 1234);
    }

    #[test]
    fn config_warning_display_is_human_readable() {
        let w = ConfigWarning::UnusuallyLarge {
            field: "retries_max",
            value: 50,
        };
        assert_eq!(w.to_string(), "'retries_max' is unusually large (50)");
    }
}
