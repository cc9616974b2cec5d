//! Conversation turns

use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One discrete event in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// A message typed by the user
    UserText { text: String },

    /// A final answer from the model
    AssistantText { text: String },

    /// The model asking for one or more tool calls
    AssistantToolRequest {
        /// Text the model emitted alongside the calls, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolCall>,
    },

    /// The outcome of one requested tool call
    ToolResult(ToolResult),
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call-id correlating the request with its result
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments, forwarded to the gateway as-is
    pub arguments: Map<String, Value>,
}

/// Whether a tool call produced a usable payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Result of one tool call, as fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    pub payload: String,
}

impl Turn {
    pub fn user<S: Into<String>>(text: S) -> Self {
        Turn::UserText { text: text.into() }
    }

    pub fn assistant<S: Into<String>>(text: S) -> Self {
        Turn::AssistantText { text: text.into() }
    }

    pub fn tool_request(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        Turn::AssistantToolRequest { text, calls }
    }

    pub fn is_tool_request(&self) -> bool {
        matches!(self, Turn::AssistantToolRequest { .. })
    }
}

impl ToolCall {
    pub fn new<I: Into<String>, N: Into<String>>(
        id: I,
        name: N,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

impl ToolResult {
    /// A successful result carrying the gateway's text
    pub fn ok(call: &ToolCall, payload: String) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Ok,
            payload,
        }
    }

    /// A failed result carrying the error message
    pub fn error(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Error,
            payload: error.message(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}
