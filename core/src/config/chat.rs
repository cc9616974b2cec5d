//! Chat orchestration configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default system instructions for the Bible study assistant
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful Bible study assistant. You have access to the FHL (Faith, Hope, Love 信望愛站) Bible API through MCP tools.

Available capabilities:
- Look up Bible verses in multiple translations (和合本, KJV, etc.)
- Search for verses by keyword
- Get word analysis (Greek/Hebrew)
- Look up Strong's dictionary entries
- Access commentaries
- Get topical studies

When users ask about Bible verses or topics:
1. Use the appropriate tools to fetch accurate information
2. Provide the verse text along with context when helpful
3. For Chinese users, default to 和合本 (unv) unless they specify otherwise
4. For original language questions, use word analysis and Strong's tools

Be respectful, accurate, and helpful in discussing Scripture.";

/// Configuration for a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// System instructions sent with every model call
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Maximum number of turns kept in the conversation buffer (0 = unbounded)
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Maximum number of tool dispatch cycles per user submission
    #[serde(default = "default_max_tool_cycles")]
    pub max_tool_cycles: usize,

    /// Timeout for a single model call, in seconds
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Timeout for a single tool call, in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_history() -> usize {
    10
}

fn default_max_tool_cycles() -> usize {
    5
}

fn default_model_timeout_secs() -> u64 {
    120
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_history: default_max_history(),
            max_tool_cycles: default_max_tool_cycles(),
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl ChatConfig {
    /// Set the system prompt
    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Set the history cap
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Set the tool cycle cap
    pub fn with_max_tool_cycles(mut self, max_tool_cycles: usize) -> Self {
        self.max_tool_cycles = max_tool_cycles;
        self
    }

    /// Set the per-tool-call timeout
    pub fn with_tool_timeout_secs(mut self, seconds: u64) -> Self {
        self.tool_timeout_secs = seconds;
        self
    }

    /// Set the per-model-call timeout
    pub fn with_model_timeout_secs(mut self, seconds: u64) -> Self {
        self.model_timeout_secs = seconds;
        self
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tool_cycles == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_tool_cycles".to_string(),
                value: "0".to_string(),
            });
        }
        if self.model_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "model_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.tool_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tool_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
