//! LLM client trait and response structures

use crate::conversation::ToolCall;
use crate::error::{LlmError, Result};
use crate::gateway::ToolDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::message::{ContentBlock, LlmMessage, MessageContent};

/// Trait for LLM clients
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
    ) -> Result<LlmResponse>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// Response from an LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated message
    pub message: LlmMessage,

    /// Usage statistics
    pub usage: Option<Usage>,

    /// Model used for generation
    pub model: String,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// What the model wants next
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// The model produced its answer
    Final(String),

    /// The model asks for tool calls before answering
    ToolRequests {
        /// Text emitted alongside the calls, if any
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// Usage statistics for a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,

    /// Number of tokens in the completion
    pub completion_tokens: u32,

    /// Total number of tokens
    pub total_tokens: u32,
}

/// Reason why generation finished
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Generation completed naturally
    Stop,

    /// Hit the maximum token limit
    Length,

    /// Model decided to call a tool
    ToolCalls,

    /// Content was filtered
    ContentFilter,

    /// Other reason
    Other(String),
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name of the function
    pub name: String,

    /// Description of what the function does
    pub description: String,

    /// JSON schema for the function parameters
    pub parameters: serde_json::Value,
}

impl From<&ToolDescriptor> for ToolDefinition {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.input_schema.clone(),
        }
    }
}

/// Options for chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    /// System instructions, sent separately from the conversation
    pub system: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Temperature for generation
    pub temperature: Option<f32>,

    /// Top-p sampling parameter
    pub top_p: Option<f32>,

    /// Stop sequences
    pub stop: Option<Vec<String>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            system: None,
            max_tokens: Some(4096),
            temperature: None,
            top_p: None,
            stop: None,
        }
    }
}

impl LlmResponse {
    /// Classify the response as a final answer or a batch of tool requests
    pub fn reply(&self) -> Result<ModelReply> {
        let blocks = match &self.message.content {
            MessageContent::Text(text) => return Ok(ModelReply::Final(text.clone())),
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut calls = Vec::new();
        for block in blocks {
            if let ContentBlock::ToolUse { id, name, input } = block {
                let arguments = match input {
                    serde_json::Value::Object(map) => map.clone(),
                    serde_json::Value::Null => serde_json::Map::new(),
                    other => {
                        return Err(LlmError::MalformedResponse {
                            message: format!("arguments for tool '{}' are not an object: {}", name, other),
                        }
                        .into())
                    }
                };
                // Some compatible endpoints omit call ids; results must still correlate.
                let id = if id.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    id.clone()
                };
                calls.push(ToolCall::new(id, name.clone(), arguments));
            }
        }

        let text = self.message.get_text();
        if calls.is_empty() {
            if self.finish_reason == Some(FinishReason::ToolCalls) {
                tracing::warn!("Model signalled tool use without any tool call blocks");
            }
            return Ok(ModelReply::Final(text.unwrap_or_default()));
        }

        Ok(ModelReply::ToolRequests { text, calls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use serde_json::json;

    fn response(content: MessageContent) -> LlmResponse {
        LlmResponse {
            message: LlmMessage {
                role: MessageRole::Assistant,
                content,
            },
            usage: None,
            model: "test".to_string(),
            finish_reason: None,
        }
    }

    #[test]
    fn test_text_reply_is_final() {
        let reply = response(MessageContent::Text("Amen".to_string()))
            .reply()
            .unwrap();
        assert_eq!(reply, ModelReply::Final("Amen".to_string()));
    }

    #[test]
    fn test_tool_use_blocks_become_requests_in_order() {
        let reply = response(MessageContent::Blocks(vec![
            ContentBlock::Text {
                text: "Checking".to_string(),
            },
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "get_bible_verse".to_string(),
                input: json!({"book": "John", "chapter": 3, "verse": 16}),
            },
            ContentBlock::ToolUse {
                id: "t2".to_string(),
                name: "search_bible".to_string(),
                input: json!(null),
            },
        ]))
        .reply()
        .unwrap();

        match reply {
            ModelReply::ToolRequests { text, calls } => {
                assert_eq!(text.as_deref(), Some("Checking"));
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "t1");
                assert_eq!(calls[0].arguments["chapter"], json!(3));
                assert!(calls[1].arguments.is_empty());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_missing_call_id_is_generated() {
        let reply = response(MessageContent::Blocks(vec![ContentBlock::ToolUse {
            id: String::new(),
            name: "list_versions".to_string(),
            input: json!({}),
        }]))
        .reply()
        .unwrap();

        match reply {
            ModelReply::ToolRequests { calls, .. } => assert!(!calls[0].id.is_empty()),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let result = response(MessageContent::Blocks(vec![ContentBlock::ToolUse {
            id: "x".to_string(),
            name: "search_bible".to_string(),
            input: json!("not json"),
        }]))
        .reply();
        assert!(matches!(
            result,
            Err(crate::error::Error::Llm(LlmError::MalformedResponse { .. }))
        ));
    }
}
