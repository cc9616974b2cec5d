//! CLI command implementations

pub mod ask;
pub mod chat;
pub mod tools;

pub use ask::ask_command;
pub use chat::chat_command;
pub use tools::{resource_command, tools_command};

use crate::config::AppConfig;
use crate::output::{CliOutputConfig, CliOutputHandler};
use anyhow::{Context, Result};
use bible_chat_core::llm::create_client;
use bible_chat_core::{ChatSession, ConversationLogger, ToolClient};
use colored::Colorize;
use std::sync::Arc;
use tracing::{debug, info};

/// A connected gateway and a chat session talking to it
pub struct Connected {
    pub client: Arc<ToolClient>,
    pub session: ChatSession,
    pub logger: Option<Arc<ConversationLogger>>,
}

/// Start the gateway, build the model client and open a chat session
pub async fn connect(config: &AppConfig, verbose: bool) -> Result<Connected> {
    info!("Using protocol: {}", config.llm.protocol);
    info!("Using model: {}", config.llm.model);

    println!("{}", "🔌 Connecting to FHL Bible MCP Server...".cyan());
    let client = Arc::new(
        ToolClient::connect(&config.gateway)
            .await
            .with_context(|| format!("Failed to start gateway '{}'", config.gateway.command))?,
    );
    let server = client.server_info().await?;
    debug!("Connected to {} {}", server.name, server.version);

    let llm = create_client(&config.llm)?;
    let output = Arc::new(CliOutputHandler::new(CliOutputConfig { verbose }));
    let mut session =
        ChatSession::new(llm, client.clone(), config.chat.clone()).with_output(output);

    let logger = if config.logging.enabled {
        let logger = Arc::new(
            ConversationLogger::create(&config.logging)
                .await
                .context("Failed to create session log")?,
        );
        println!(
            "💾 Logging enabled: {} format",
            format!("{:?}", config.logging.format).to_lowercase()
        );
        println!("   Logs saved to: {}", config.logging.dir.display());
        session = session.with_sink(logger.clone());
        Some(logger)
    } else {
        None
    };

    Ok(Connected {
        client,
        session,
        logger,
    })
}
