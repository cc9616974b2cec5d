//! Provider implementations of [`LlmClient`](super::LlmClient)

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use crate::config::{Protocol, ResolvedLlmConfig};
use crate::error::Result;
use crate::llm::LlmClient;
use std::sync::Arc;

/// Build the client matching the configured protocol
pub fn create_client(config: &ResolvedLlmConfig) -> Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config.protocol {
        Protocol::Anthropic => Arc::new(AnthropicClient::new(config)?),
        Protocol::OpenAICompat => Arc::new(OpenAiClient::new(config)?),
    };
    tracing::debug!(
        "Created {} client for model {}",
        client.provider_name(),
        client.model_name()
    );
    Ok(client)
}
