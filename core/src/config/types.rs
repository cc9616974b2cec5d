//! Language-model configuration types
//!
//! Core only accepts fully resolved, validated configuration.
//! All discovery, loading, and merging happens in CLI layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default model, matching the Claude model the chatbot was tuned against
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for OpenAI-compatible endpoints
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Supported LLM protocols
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// OpenAI-compatible API (includes OpenAI, many proxies, local models)
    #[serde(rename = "openai_compat")]
    OpenAICompat,
    /// Anthropic Claude API
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl Protocol {
    /// Get the protocol name as a string
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::OpenAICompat => "openai_compat",
            Protocol::Anthropic => "anthropic",
        }
    }

    /// Get the default base URL for this protocol
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Protocol::OpenAICompat => "https://api.openai.com/v1",
            Protocol::Anthropic => "https://api.anthropic.com",
        }
    }

    /// Get the default model for this protocol
    pub fn default_model(&self) -> &'static str {
        match self {
            Protocol::OpenAICompat => DEFAULT_OPENAI_MODEL,
            Protocol::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "openai_compat" => Ok(Protocol::OpenAICompat),
            "anthropic" | "claude" => Ok(Protocol::Anthropic),
            other => Err(format!("Unsupported protocol: {}", other)),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model parameters for LLM requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelParams {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 to 2.0)
    pub temperature: Option<f32>,
    /// Top-p sampling parameter
    pub top_p: Option<f32>,
    /// Stop sequences
    pub stop_sequences: Option<Vec<String>>,
}

/// A fully resolved LLM configuration ready for use by core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLlmConfig {
    /// The protocol to use
    pub protocol: Protocol,
    /// Base URL for the API
    pub base_url: String,
    /// API key for authentication
    pub api_key: String,
    /// Model name/identifier
    pub model: String,
    /// Model parameters
    #[serde(default)]
    pub params: ModelParams,
    /// Additional headers for requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ResolvedLlmConfig {
    /// Create a new resolved LLM config
    pub fn new(protocol: Protocol, base_url: String, api_key: String, model: String) -> Self {
        Self {
            protocol,
            base_url,
            api_key,
            model,
            params: ModelParams::default(),
            headers: HashMap::new(),
        }
    }

    /// Set model parameters
    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    /// Add multiple headers
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.is_empty() {
            return Err("API key cannot be empty".to_string());
        }

        if self.model.is_empty() {
            return Err("Model name cannot be empty".to_string());
        }

        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Base URL must start with http:// or https://".to_string());
        }

        if let Some(temp) = self.params.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if let Some(top_p) = self.params.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err("Top-p must be between 0.0 and 1.0".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anthropic_config() -> ResolvedLlmConfig {
        ResolvedLlmConfig::new(
            Protocol::Anthropic,
            Protocol::Anthropic.default_base_url().to_string(),
            "sk-test".to_string(),
            DEFAULT_ANTHROPIC_MODEL.to_string(),
        )
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(anthropic_config().validate().is_ok());
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let mut config = anthropic_config();
        config.api_key.clear();
        assert_eq!(config.validate().unwrap_err(), "API key cannot be empty");
    }

    #[test]
    fn test_base_url_scheme_checked() {
        let mut config = anthropic_config();
        config.base_url = "api.anthropic.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temperature_range_checked() {
        let config = anthropic_config().with_params(ModelParams {
            temperature: Some(3.0),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("openai".parse::<Protocol>().unwrap(), Protocol::OpenAICompat);
        assert_eq!("Anthropic".parse::<Protocol>().unwrap(), Protocol::Anthropic);
        assert!("google_ai".parse::<Protocol>().is_err());
    }
}
