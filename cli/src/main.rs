//! # bible-chat CLI
//!
//! Command-line interface for Bible Chat - ask questions about the Bible and
//! let the model look up verses, word studies and commentaries through the
//! FHL Bible MCP server.
//!
//! ## Usage
//!
//! - `bible-chat` - Start interactive mode
//! - `bible-chat "question"` - Answer a single question
//! - `bible-chat tools` - Show the gateway's tools
//! - `bible-chat resource <uri>` - Print a gateway resource

use anyhow::Result;
use bible_chat_core::config::LogFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod output;

use commands::{ask_command, chat_command, resource_command, tools_command};
use config::CliConfigLoader;

/// bible-chat - A Bible study assistant backed by the FHL Bible MCP server
#[derive(Parser)]
#[command(name = "bible-chat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A Bible study chatbot with tool-augmented answers")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file or directory path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Protocol to use (anthropic, openai)
    #[arg(long)]
    protocol: Option<String>,

    /// API key override
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL override
    #[arg(long)]
    base_url: Option<String>,

    /// Model name override
    #[arg(long)]
    model: Option<String>,

    /// Path to the FHL-MCP-Server checkout
    #[arg(long)]
    server_path: Option<String>,

    /// Maximum number of turns kept as context (0 = unlimited)
    #[arg(long)]
    max_history: Option<usize>,

    /// Maximum tool cycles per question
    #[arg(long)]
    max_tool_cycles: Option<usize>,

    /// Do not write conversation logs
    #[arg(long)]
    no_log: bool,

    /// Conversation log format (json, text, both)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Conversation log directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// The question to ask (if provided, answers it and exits)
    question: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the gateway's tools and resources
    Tools,

    /// Print a gateway resource
    Resource {
        /// Resource URI
        uri: String,
    },
}

/// Build a configuration loader from CLI arguments
fn build_config_loader(cli: &Cli) -> CliConfigLoader {
    let mut loader = CliConfigLoader::new();

    if let Some(config_path) = &cli.config {
        loader = loader.with_config_override(config_path.clone());
    }

    if let Some(protocol) = &cli.protocol {
        loader = loader.with_protocol_override(protocol.clone());
    }

    if let Some(api_key) = &cli.api_key {
        loader = loader.with_api_key_override(api_key.clone());
    }

    if let Some(base_url) = &cli.base_url {
        loader = loader.with_base_url_override(base_url.clone());
    }

    if let Some(model) = &cli.model {
        loader = loader.with_model_override(model.clone());
    }

    if let Some(server_path) = &cli.server_path {
        loader = loader.with_server_path_override(server_path.clone());
    }

    if let Some(max_history) = cli.max_history {
        loader = loader.with_max_history_override(max_history);
    }

    if let Some(max_tool_cycles) = cli.max_tool_cycles {
        loader = loader.with_max_tool_cycles_override(max_tool_cycles);
    }

    if let Some(log_dir) = &cli.log_dir {
        loader = loader.with_log_dir_override(log_dir.clone());
    }

    if let Some(log_format) = cli.log_format {
        loader = loader.with_log_format_override(log_format);
    }

    if cli.no_log {
        loader = loader.without_logging();
    }

    loader
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    bible_chat_core::init_tracing(cli.verbose);

    let config_loader = build_config_loader(&cli);

    match (cli.question, cli.command) {
        // If a question is provided, answer it and exit
        (Some(question), None) => ask_command(question, config_loader, cli.verbose).await,
        (Some(_), Some(_)) => {
            tracing::error!("Error: Cannot specify both a question and a subcommand");
            std::process::exit(1);
        }
        (None, Some(Commands::Tools)) => tools_command(config_loader).await,
        (None, Some(Commands::Resource { uri })) => resource_command(uri, config_loader).await,
        // Default to interactive mode
        (None, None) => chat_command(config_loader, cli.verbose).await,
    }
}
