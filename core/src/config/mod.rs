//! Configuration types for Bible Chat core
//!
//! Only exports resolved, validated data types. Discovery and loading of
//! configuration files lives in the CLI layer.

pub mod chat;
pub mod gateway;
pub mod logging;
pub mod types;

pub use chat::ChatConfig;
pub use gateway::GatewayConfig;
pub use logging::{LogConfig, LogFormat};
pub use types::{ModelParams, Protocol, ResolvedLlmConfig};
