//! Per-turn records handed to the session log

use crate::conversation::{ToolCall, ToolResult};
use crate::llm::Usage;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A tool call as the model requested it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl From<&ToolCall> for ToolCallRecord {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            input: Value::Object(call.arguments.clone()),
        }
    }
}

/// How one tool call went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_name: String,
    pub tool_use_id: String,
    /// Seconds spent on the call
    pub time: f64,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResultRecord {
    pub fn new(result: &ToolResult, elapsed: Duration) -> Self {
        let is_error = result.is_error();
        Self {
            tool_name: result.tool_name.clone(),
            tool_use_id: result.call_id.clone(),
            time: elapsed.as_secs_f64(),
            is_error,
            result_length: (!is_error).then(|| result.payload.chars().count()),
            error: is_error.then(|| result.payload.clone()),
        }
    }
}

/// Where the time of a turn went, in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnTiming {
    pub tools_loading: f64,
    pub initial_api_call: f64,
    /// All model calls of the turn, the first one included
    pub model_calls: f64,
    /// Wall time of all tool batches
    pub tool_execution: f64,
    pub total: f64,
}

impl TurnTiming {
    /// Named entries, in display order
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("tools_loading", self.tools_loading),
            ("initial_api_call", self.initial_api_call),
            ("model_calls", self.model_calls),
            ("tool_execution", self.tool_execution),
            ("total", self.total),
        ]
    }
}

/// Everything worth keeping about one submitted question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub timestamp: DateTime<Local>,
    pub user_message: String,
    pub assistant_response: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
    pub timing: TurnTiming,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub error: Option<String>,
}

/// Accumulates the record of the turn in progress
#[derive(Debug, Default)]
pub(crate) struct TurnTrace {
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
    pub timing: TurnTiming,
    pub usage: Option<Usage>,
    pub cycles: usize,
}

impl TurnTrace {
    pub fn add_usage(&mut self, usage: &Usage) {
        let total = self.usage.get_or_insert(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        });
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
    }

    pub fn into_record(
        self,
        user_message: &str,
        outcome: std::result::Result<&str, String>,
    ) -> TurnRecord {
        let (assistant_response, error) = match outcome {
            Ok(answer) => (answer.to_string(), None),
            Err(error) => (String::new(), Some(error)),
        };
        TurnRecord {
            timestamp: Local::now(),
            user_message: user_message.to_string(),
            assistant_response,
            tool_calls: self.tool_calls,
            tool_results: self.tool_results,
            timing: self.timing,
            usage: self.usage,
            error,
        }
    }
}
