//! Tool gateway access
//!
//! The gateway is an external MCP server process (the FHL Bible server by
//! default) that executes tool calls on behalf of the model.

pub mod client;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ToolClient;
pub use protocol::{ResourceDescriptor, ServerInfo, ToolDescriptor};
pub use transport::{StdioTransport, Transport};

use crate::error::{ConnectionError, ToolError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Result of a single tool call: the tool's text, or why it failed
pub type ToolOutcome = std::result::Result<String, ToolError>;

/// What the chat session needs from a tool provider
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Describe the available tools
    async fn list_tools(&self) -> Result<Arc<Vec<ToolDescriptor>>, ConnectionError>;

    /// Call one tool with the given arguments
    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutcome, ConnectionError>;
}
