//! Interactive chat loop

use super::{connect, Connected};
use crate::config::CliConfigLoader;
use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the user typed at the prompt
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Quit,
    Clear,
    Empty,
    Question(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    match line.to_lowercase().as_str() {
        "quit" | "exit" => Input::Quit,
        "clear" => Input::Clear,
        _ => Input::Question(line),
    }
}

/// Run the interactive prompt until `quit`, EOF or Ctrl-C at the prompt
pub async fn chat_command(config_loader: CliConfigLoader, verbose: bool) -> Result<()> {
    let config = config_loader.load().await?;
    let Connected {
        client,
        mut session,
        logger,
    } = connect(&config, verbose).await?;

    println!(
        "{}",
        "✅ Connected! Type 'quit' to exit, 'clear' to reset conversation.\n".green()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", "You: ".bold());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let question = match classify(&line) {
            Input::Empty => continue,
            Input::Quit => {
                println!("👋 Goodbye!");
                break;
            }
            Input::Clear => {
                session.clear();
                println!("🗑️ Conversation cleared.\n");
                continue;
            }
            Input::Question(question) => question,
        };

        println!("\n{}", "🤔 Thinking...".dimmed());

        // Ctrl-C while a turn runs abandons that turn only.
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });
        let result = session.submit_with_cancel(question, &cancel).await;
        watcher.abort();

        match result {
            Ok(answer) => println!("\n{} {}\n", "Assistant:".bold().blue(), answer),
            Err(e) if e.is_cancelled() => println!("\n{}\n", "⏹️  Cancelled.".yellow()),
            Err(e) => {
                println!("\n{} {}\n", "❌ Error:".red(), e);
                if e.is_fatal() {
                    warn!("Gateway connection lost, ending session");
                    break;
                }
            }
        }
    }

    let stats = session.stats();
    // Answered questions, not the capped context length
    let total_messages = stats.completed_turns;
    println!("\n📊 Session Summary:");
    println!("   Total Messages: {}", total_messages);
    println!("   Failed Turns: {}", stats.failed_turns);
    println!("   Total Time: {:.2}s", stats.elapsed().as_secs_f64());

    if let Some(logger) = &logger {
        match logger.log_summary(total_messages, stats.elapsed()).await {
            Ok(summary) => debug!("Session {} closed", summary.session_id),
            Err(e) => warn!("Failed to write session summary: {}", e),
        }
        println!("   Logs saved to: {}", logger.primary_path().display());
    }

    client.shutdown().await;
    Ok(())
}
