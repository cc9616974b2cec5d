//! Error types and handling for Bible Chat Core

use thiserror::Error;

/// Result type alias for Bible Chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Bible Chat Core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Language-model call errors
    #[error("Model call error: {0}")]
    Llm(#[from] LlmError),

    /// Tool gateway connection errors (fatal to the session)
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Turn-level chat errors
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    /// Session log errors
    #[error("Logger error: {0}")]
    Logger(#[from] LoggerError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for field '{field}': {value}")]
    InvalidValue { field: String, value: String },
}

/// Language-model call errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("Model call timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Gateway connection errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Failed to spawn gateway '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("Gateway handshake failed: {message}")]
    Handshake { message: String },

    #[error("Gateway connection closed")]
    Closed,

    #[error("Gateway transport error: {message}")]
    Transport { message: String },

    #[error("Gateway protocol error: {message}")]
    Protocol { message: String },

    #[error("Gateway did not answer '{method}' within {seconds}s")]
    Timeout { method: String, seconds: u64 },
}

/// A single tool call failure, recovered by feeding it back to the model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool '{name}' failed: {message}")]
    Failed { name: String, message: String },

    #[error("Tool '{name}' timed out after {seconds}s")]
    Timeout { name: String, seconds: u64 },
}

/// Turn-level chat errors
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Tool loop exceeded: the model kept requesting tools after {max_cycles} cycles")]
    ToolLoopExceeded { max_cycles: usize },

    #[error("Turn cancelled")]
    Cancelled,
}

/// Session log errors
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Failed to write session log {path}: {message}")]
    WriteFailed { path: String, message: String },
}

impl ToolError {
    /// Name of the tool that failed
    pub fn tool_name(&self) -> &str {
        match self {
            ToolError::Failed { name, .. } | ToolError::Timeout { name, .. } => name,
        }
    }

    /// Message fed back to the model for this failure
    pub fn message(&self) -> String {
        match self {
            ToolError::Failed { message, .. } => message.clone(),
            ToolError::Timeout { seconds, .. } => format!("timed out after {}s", seconds),
        }
    }
}

impl Error {
    /// Whether the session can keep going after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Whether the turn was cancelled by the caller
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Chat(ChatError::Cancelled))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Generic(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Generic(msg.to_string())
    }
}
