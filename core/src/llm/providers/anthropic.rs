//! Anthropic Claude client implementation

use crate::config::ResolvedLlmConfig;
use crate::error::{LlmError, Result};
use crate::llm::{
    ChatOptions, ContentBlock, FinishReason, LlmClient, LlmMessage, LlmResponse, MessageContent,
    MessageRole, ToolDefinition, Usage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    config: ResolvedLlmConfig,
}

impl AnthropicClient {
    /// Create a new Anthropic client
    pub fn new(config: &ResolvedLlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(LlmError::Authentication {
                message: "No API key found for Anthropic".to_string(),
            }
            .into());
        }

        let client = Client::builder().build().map_err(|e| LlmError::Network {
            message: format!("Failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
    ) -> Result<LlmResponse> {
        let request = self.build_request(messages, tools, options)?;

        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            tracing::debug!("Anthropic API returned {}: {}", status, error_text);
            return Err(map_status_error(status, error_text).into());
        }

        let anthropic_response: AnthropicResponse =
            response.json().await.map_err(|e| LlmError::MalformedResponse {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(convert_response(anthropic_response))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}

impl AnthropicClient {
    fn build_request(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
    ) -> std::result::Result<AnthropicRequest, LlmError> {
        let options = options.unwrap_or_default();
        let params = &self.config.params;

        // System prompts travel in their own field; everything else is a turn.
        let mut system = options.system.clone();
        let mut conversation = Vec::new();
        for message in messages {
            match message.role {
                MessageRole::System => {
                    if let Some(text) = message.get_text() {
                        system = Some(match system {
                            Some(existing) => format!("{}\n\n{}", existing, text),
                            None => text,
                        });
                    }
                }
                MessageRole::User | MessageRole::Tool => conversation.push(AnthropicMessage {
                    role: "user",
                    content: message.content,
                }),
                MessageRole::Assistant => conversation.push(AnthropicMessage {
                    role: "assistant",
                    content: message.content,
                }),
            }
        }

        // The API requires the conversation to open with a plain user message.
        let first_user = conversation
            .iter()
            .position(|m| m.role == "user" && matches!(m.content, MessageContent::Text(_)))
            .unwrap_or(conversation.len());
        if first_user > 0 {
            tracing::debug!("Skipping {} leading non-user messages", first_user);
            conversation.drain(..first_user);
        }
        if conversation.is_empty() {
            return Err(LlmError::InvalidRequest {
                message: "Conversation has no user message to answer".to_string(),
            });
        }

        Ok(AnthropicRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens.or(params.max_tokens).unwrap_or(4096),
            temperature: options.temperature.or(params.temperature),
            top_p: options.top_p.or(params.top_p),
            system,
            messages: conversation,
            tools: tools
                .filter(|t| !t.is_empty())
                .map(|t| t.into_iter().map(AnthropicTool::from).collect()),
            stop_sequences: options.stop.or_else(|| params.stop_sequences.clone()),
        })
    }
}

fn map_status_error(status: u16, message: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Authentication { message },
        429 => LlmError::RateLimit,
        _ => LlmError::ApiError { status, message },
    }
}

fn convert_response(response: AnthropicResponse) -> LlmResponse {
    let mut blocks = Vec::new();
    for content in response.content {
        match content {
            AnthropicContent::Text { text } => blocks.push(ContentBlock::Text { text }),
            AnthropicContent::ToolUse { id, name, input } => {
                blocks.push(ContentBlock::ToolUse { id, name, input })
            }
            AnthropicContent::Other => {}
        }
    }

    let content = if blocks.iter().all(|b| matches!(b, ContentBlock::Text { .. })) {
        let text: String = blocks
            .into_iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect();
        MessageContent::Text(text)
    } else {
        MessageContent::Blocks(blocks)
    };

    let usage = response.usage.map(|u| Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
    });

    let finish_reason = response.stop_reason.map(|reason| match reason.as_str() {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Other(reason),
    });

    LlmResponse {
        message: LlmMessage {
            role: MessageRole::Assistant,
            content,
        },
        usage,
        model: response.model,
        finish_reason,
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl From<ToolDefinition> for AnthropicTool {
    fn from(tool: ToolDefinition) -> Self {
        Self {
            name: tool.name,
            description: tool.description,
            input_schema: tool.parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
    #[serde(flatten)]
    _extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
