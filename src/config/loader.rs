//! Configuration loader with environment variable expansion

use super::{expand_env_vars, has_unexpanded_env_var, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` placeholders first
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        // An empty document deserializes to unit, not a mapping
        let mut config: Config = if expanded.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };
        // An unset variable must not be sent as a literal bearer token
        if config
            .server
            .token
            .as_deref()
            .is_some_and(has_unexpanded_env_var)
        {
            tracing::warn!("Token placeholder is unset, sending requests unauthenticated");
            config.server.token = None;
        }
        config.validate()?;
        Ok(config)
    }
}
