//! Configuration module for Chunked Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every field has a default,
//! so an empty document yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// 5 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 5 GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static::lazy_static! {
    static ref ENV_VAR_PATTERN: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is a valid regex");
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Whether `s` still holds a `${VAR}` placeholder after expansion
pub(crate) fn has_unexpanded_env_var(s: &str) -> bool {
    ENV_VAR_PATTERN.is_match(s)
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.base_url.is_empty() && !is_valid_http_url(&self.server.base_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid base_url '{}': must start with http:// or https://",
                self.server.base_url
            )));
        }

        self.upload.validate()?;

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'pretty' or 'json'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Remote upload service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the upload service. Relative upload endpoints resolve against it.
    #[serde(default)]
    pub base_url: String,

    /// Opaque bearer credential attached to every request. Supports ${VAR} expansion.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_init_path")]
    pub init_path: String,

    #[serde(default = "default_finalize_path")]
    pub finalize_path: String,

    /// Whole-request timeout of the HTTP client, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            init_path: default_init_path(),
            finalize_path: default_finalize_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_init_path() -> String {
    "/uploads/init".to_string()
}

fn default_finalize_path() -> String {
    "/uploads/finalize".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// Upload engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size in bytes. Fixed per task at admission.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Number of tasks allowed in `uploading` at once
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Retries per chunk after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff unit: the n-th retry waits `n * retry_base_delay_ms`
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Timeout for a single chunk attempt, in milliseconds
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_ms: u64,

    /// Extensions (".pdf", "pdf") or MIME types ("image/png", "image/*").
    /// Empty means no restriction.
    #[serde(default)]
    pub allowed_file_types: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_uploads must be at least 1".into(),
            ));
        }
        if self.chunk_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_file_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            chunk_timeout_ms: default_chunk_timeout(),
            allowed_file_types: Vec::new(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent_uploads() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_chunk_timeout() -> u64 {
    60_000
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

/// Logging configuration
///
/// # Example
///
/// ```yaml
/// logging:
///   level: "debug"   # RUST_LOG takes precedence when set
///   format: "json"   # pretty | json
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
