//! OpenAI-compatible client implementation using async-openai library

use crate::config::ResolvedLlmConfig;
use crate::error::{LlmError, Result};
use crate::llm::{
    ChatOptions, ContentBlock, FinishReason, LlmClient, LlmMessage, LlmResponse, MessageContent,
    MessageRole, ToolDefinition, Usage,
};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
        ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
        ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, FunctionCall, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;

/// OpenAI-compatible client using async-openai library
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    config: ResolvedLlmConfig,
}

impl OpenAiClient {
    /// Create a new OpenAI client from resolved LLM config
    pub fn new(config: &ResolvedLlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(LlmError::Authentication {
                message: "No API key found for OpenAI".to_string(),
            }
            .into());
        }

        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(config.base_url.trim_end_matches('/'));

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            config: config.clone(),
        })
    }

    /// Convert our internal message format to async-openai format
    fn convert_messages(
        &self,
        system: Option<String>,
        messages: Vec<LlmMessage>,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut converted = Vec::new();

        if let Some(system) = system {
            converted.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: system.into(),
                    name: None,
                },
            ));
        }

        for message in messages {
            match message.role {
                MessageRole::System => {
                    converted.push(ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessage {
                            content: message.get_text().unwrap_or_default().into(),
                            name: None,
                        },
                    ));
                }
                MessageRole::User => {
                    converted.push(ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessage {
                            content: message.get_text().unwrap_or_default().into(),
                            name: None,
                        },
                    ));
                }
                MessageRole::Assistant => {
                    converted.push(convert_assistant(&message.content));
                }
                MessageRole::Tool => {
                    // One tool message per result; the API correlates them by call id
                    let mut pushed_any = false;
                    if let MessageContent::Blocks(blocks) = &message.content {
                        for block in blocks {
                            if let ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } = block
                            {
                                converted.push(ChatCompletionRequestMessage::Tool(
                                    ChatCompletionRequestToolMessage {
                                        content: ChatCompletionRequestToolMessageContent::Text(
                                            content.clone(),
                                        ),
                                        tool_call_id: tool_use_id.clone(),
                                    },
                                ));
                                pushed_any = true;
                            }
                        }
                    }
                    if !pushed_any {
                        return Err(LlmError::InvalidRequest {
                            message: "Tool message must contain ToolResult".to_string(),
                        }
                        .into());
                    }
                }
            }
        }

        Ok(converted)
    }

    /// Convert our tool definitions to async-openai format
    fn convert_tools(&self, tools: Vec<ToolDefinition>) -> Vec<ChatCompletionTool> {
        tools
            .into_iter()
            .map(|tool| ChatCompletionTool {
                r#type: ChatCompletionToolType::Function,
                function: FunctionObject {
                    name: tool.name,
                    description: Some(tool.description),
                    parameters: Some(tool.parameters),
                    strict: None,
                },
            })
            .collect()
    }
}

fn convert_assistant(content: &MessageContent) -> ChatCompletionRequestMessage {
    let (text, tool_calls) = match content {
        MessageContent::Text(text) => (text.clone(), Vec::new()),
        MessageContent::Blocks(blocks) => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text: part } => {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(part);
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(ChatCompletionMessageToolCall {
                            id: id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        });
                    }
                    ContentBlock::ToolResult { .. } => {}
                }
            }
            (text, tool_calls)
        }
    };

    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
        content: if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(ChatCompletionRequestAssistantMessageContent::Text(text))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        ..Default::default()
    })
}

fn map_openai_error(error: OpenAIError) -> LlmError {
    match error {
        OpenAIError::Reqwest(e) => LlmError::Network {
            message: e.to_string(),
        },
        OpenAIError::ApiError(api) => {
            let message = api.message.clone();
            match api.code.as_deref() {
                Some("invalid_api_key") => LlmError::Authentication { message },
                Some("rate_limit_exceeded") => LlmError::RateLimit,
                _ => LlmError::ApiError {
                    // async-openai doesn't expose status codes directly
                    status: 500,
                    message,
                },
            }
        }
        OpenAIError::JSONDeserialize(e) => LlmError::MalformedResponse {
            message: e.to_string(),
        },
        other => LlmError::InvalidRequest {
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
    ) -> Result<LlmResponse> {
        let options = options.unwrap_or_default();
        let params = &self.config.params;
        let converted_messages = self.convert_messages(options.system.clone(), messages)?;
        let converted_tools = tools
            .filter(|t| !t.is_empty())
            .map(|t| self.convert_tools(t));

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder.model(&self.model);
        request_builder.messages(converted_messages);

        if let Some(tools) = converted_tools {
            tracing::debug!("OpenAI request with {} tools enabled", tools.len());
            request_builder.tools(tools);
        }
        if let Some(max_tokens) = options.max_tokens.or(params.max_tokens) {
            request_builder.max_tokens(max_tokens);
        }
        if let Some(temperature) = options.temperature.or(params.temperature) {
            request_builder.temperature(temperature);
        }
        if let Some(top_p) = options.top_p.or(params.top_p) {
            request_builder.top_p(top_p);
        }

        let request = request_builder.build().map_err(|e| {
            tracing::error!("Failed to build OpenAI request: {}", e);
            LlmError::InvalidRequest {
                message: format!("Failed to build request: {}", e),
            }
        })?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            tracing::error!("OpenAI API call failed: {}", e);
            map_openai_error(e)
        })?;

        convert_response(response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Convert async-openai response to our internal format
fn convert_response(response: CreateChatCompletionResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::MalformedResponse {
            message: "No choices in response".to_string(),
        })?;

    let content = match choice.message.tool_calls {
        Some(tool_calls) if !tool_calls.is_empty() => {
            let mut blocks = Vec::new();
            if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
                blocks.push(ContentBlock::Text { text });
            }
            for tool_call in tool_calls {
                tracing::debug!("Tool call: {} (id: {})", tool_call.function.name, tool_call.id);
                // Unparseable arguments surface as a non-object and are rejected downstream
                let input: Value = serde_json::from_str(&tool_call.function.arguments)
                    .unwrap_or_else(|_| Value::String(tool_call.function.arguments.clone()));
                blocks.push(ContentBlock::ToolUse {
                    id: tool_call.id,
                    name: tool_call.function.name,
                    input,
                });
            }
            MessageContent::Blocks(blocks)
        }
        _ => MessageContent::Text(choice.message.content.unwrap_or_default()),
    };

    let usage = response.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let finish_reason = choice.finish_reason.map(|reason| match reason {
        async_openai::types::FinishReason::Stop => FinishReason::Stop,
        async_openai::types::FinishReason::Length => FinishReason::Length,
        async_openai::types::FinishReason::ToolCalls => FinishReason::ToolCalls,
        async_openai::types::FinishReason::ContentFilter => FinishReason::ContentFilter,
        async_openai::types::FinishReason::FunctionCall => FinishReason::ToolCalls,
    });

    Ok(LlmResponse {
        message: LlmMessage {
            role: MessageRole::Assistant,
            content,
        },
        usage,
        model: response.model,
        finish_reason,
    })
}
