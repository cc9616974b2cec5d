//! CLI output handler implementation

use async_trait::async_trait;
use bible_chat_core::output::{ChatEvent, ChatOutput};
use bible_chat_core::ToolResult;
use colored::Colorize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Longest argument preview shown next to a tool call
const ARGUMENT_PREVIEW_CHARS: usize = 80;

/// CLI output configuration
#[derive(Debug, Clone, Default)]
pub struct CliOutputConfig {
    /// Show per-call arguments and timing details
    pub verbose: bool,
}

/// Prints chat progress to the terminal
pub struct CliOutputHandler {
    config: CliOutputConfig,
}

impl CliOutputHandler {
    pub fn new(config: CliOutputConfig) -> Self {
        Self { config }
    }

    fn tool_finished(&self, result: &ToolResult, elapsed: Duration) -> String {
        let seconds = elapsed.as_secs_f64();
        if result.is_error() {
            format!(
                "  {} {} failed in {:.2}s: {}",
                "❌".red(),
                result.tool_name.bold(),
                seconds,
                result.payload.red()
            )
        } else {
            format!(
                "  {} {} completed in {:.2}s",
                "✅".green(),
                result.tool_name.bold(),
                seconds
            )
        }
    }
}

fn timing(label: &str, elapsed: Duration) -> String {
    format!("⏱️  {}: {:.2}s", label, elapsed.as_secs_f64())
        .dimmed()
        .to_string()
}

fn preview(arguments: &serde_json::Map<String, Value>) -> String {
    let text = Value::Object(arguments.clone()).to_string();
    if text.chars().count() <= ARGUMENT_PREVIEW_CHARS {
        return text;
    }
    let cut: String = text.chars().take(ARGUMENT_PREVIEW_CHARS).collect();
    format!("{}…", cut)
}

#[async_trait]
impl ChatOutput for CliOutputHandler {
    async fn emit_event(
        &self,
        event: ChatEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match event {
            ChatEvent::ToolsLoaded { count, elapsed } => {
                debug!("{} tools available", count);
                println!("{}", timing("Tools loaded in", elapsed));
            }

            ChatEvent::ModelResponded { cycle, elapsed } => {
                let label = if cycle == 0 {
                    "Initial model call"
                } else {
                    "Model call"
                };
                println!("{}", timing(label, elapsed));
            }

            ChatEvent::ToolBatchStarted { cycle, calls } => {
                println!("\n{} Tool use iteration #{}", "🔄".cyan(), cycle);
                println!("  📋 {} tool(s) requested", calls.len());
                for call in &calls {
                    if self.config.verbose {
                        println!(
                            "  🔧 Calling tool: {} {}",
                            call.name.bold(),
                            preview(&call.arguments).dimmed()
                        );
                    } else {
                        println!("  🔧 Calling tool: {}", call.name.bold());
                    }
                }
            }

            ChatEvent::ToolCallCompleted { result, elapsed } => {
                println!("{}", self.tool_finished(&result, elapsed));
            }

            ChatEvent::ToolBatchCompleted {
                cycle: _,
                count,
                elapsed,
            } => {
                let label = format!("All {} tools completed in", count);
                println!("  {}", timing(&label, elapsed));
            }

            ChatEvent::HistoryPruned { dropped, remaining } => {
                println!(
                    "  {} Pruned history: {} → {} messages",
                    "📝".yellow(),
                    dropped + remaining,
                    remaining
                );
            }

            ChatEvent::TurnCompleted { timing: turn } => {
                println!(
                    "\n{}",
                    timing("Total response time", Duration::from_secs_f64(turn.total))
                );
                if self.config.verbose {
                    for (name, seconds) in turn.entries() {
                        println!("   {}: {:.2}s", name, seconds);
                    }
                }
            }

            ChatEvent::TurnFailed { error } => {
                debug!("Turn failed: {}", error);
            }
        }

        Ok(())
    }
}
