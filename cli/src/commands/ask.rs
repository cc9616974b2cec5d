//! Single question command

use super::{connect, Connected};
use crate::config::CliConfigLoader;
use anyhow::Result;
use colored::Colorize;
use tracing::info;

/// Answer one question and exit
pub async fn ask_command(
    question: String,
    config_loader: CliConfigLoader,
    verbose: bool,
) -> Result<()> {
    info!("Asking: {}", question);

    let config = config_loader.load().await?;
    let Connected {
        client,
        mut session,
        logger,
    } = connect(&config, verbose).await?;

    let result = session.submit(&question).await;

    if let Some(logger) = &logger {
        logger
            .log_summary(session.stats().completed_turns, session.stats().elapsed())
            .await?;
    }
    client.shutdown().await;

    let answer = result?;
    println!("\n{} {}", "Assistant:".bold().blue(), answer);
    Ok(())
}
