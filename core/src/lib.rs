//! # Bible Chat Core
//!
//! Core library for Bible Chat - a tool-augmented chatbot that answers
//! questions about the Bible by letting a language model call the tools of
//! an MCP gateway.
//!
//! The pieces fit together as follows: a [`ToolClient`] talks to the
//! gateway, a [`ConversationBuffer`] holds the capped context, and a
//! [`ChatSession`] drives each question through model calls and concurrent
//! tool dispatch.

// Core modules
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod logger;
pub mod output;

// Re-export commonly used types
pub use chat::{ChatSession, ChatState, TurnRecord};
pub use config::{ChatConfig, GatewayConfig, LogConfig, ModelParams, Protocol, ResolvedLlmConfig};
pub use conversation::{ConversationBuffer, ToolCall, ToolResult, Turn};
pub use error::{Error, Result};
pub use gateway::{ToolClient, ToolDescriptor, ToolInvoker};
pub use logger::{ConversationLogger, SessionSink};

/// Current version of the bible-chat-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing, preferring `RUST_LOG` over the built-in filter
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "bible_chat_core=debug,bible_chat_cli=debug,gateway=debug"
    } else {
        "bible_chat_core=info,bible_chat_cli=info,gateway=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
