//! Tool gateway process configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How to launch the tool gateway process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Program to execute
    pub command: String,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Timeout for protocol-level requests (handshake, listings), in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl GatewayConfig {
    /// Create a gateway configuration for a command
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Set arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "gateway.command".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gateway.request_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = GatewayConfig::new("python")
            .with_args(["-m", "fhl_bible_mcp"])
            .with_env("PYTHONPATH", "/srv/fhl/src");

        assert_eq!(config.args, vec!["-m", "fhl_bible_mcp"]);
        assert_eq!(config.env.get("PYTHONPATH").unwrap(), "/srv/fhl/src");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(GatewayConfig::new("  ").validate().is_err());
    }
}
