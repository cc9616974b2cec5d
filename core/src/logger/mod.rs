//! Session logging
//!
//! Every finished turn is written to the session's log files: a JSON file
//! holding the whole session, rewritten after each turn, and a human-readable
//! text transcript that is appended to.

use crate::chat::TurnRecord;
use crate::config::{LogConfig, LogFormat};
use crate::error::{LoggerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const RULE_WIDTH: usize = 80;

/// Destination for turn records
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn record_turn(&self, record: &TurnRecord) -> Result<()>;
}

/// End-of-session figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_messages: usize,
    /// Seconds
    pub total_time: f64,
    pub end_time: DateTime<Local>,
}

/// Writes a session's turns to `conversation_<session>.json` and `.txt`
pub struct ConversationLogger {
    session_id: String,
    format: LogFormat,
    json_path: PathBuf,
    text_path: PathBuf,
    turns: Mutex<Vec<TurnRecord>>,
}

impl ConversationLogger {
    /// Create the log directory and start a new session log
    pub async fn create(config: &LogConfig) -> Result<Self> {
        let session_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::create_with_id(&config.dir, config.format, session_id).await
    }

    /// Start a session log under an explicit session id
    pub async fn create_with_id<P: AsRef<Path>>(
        dir: P,
        format: LogFormat,
        session_id: String,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(|e| write_failed(dir, e))?;

        let logger = Self {
            json_path: dir.join(format!("conversation_{}.json", session_id)),
            text_path: dir.join(format!("conversation_{}.txt", session_id)),
            session_id,
            format,
            turns: Mutex::new(Vec::new()),
        };

        if format.writes_text() {
            let header = format!(
                "Bible Chatbot Conversation Log\nSession ID: {}\nStarted: {}\n{}\n\n",
                logger.session_id,
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                "=".repeat(RULE_WIDTH)
            );
            fs::write(&logger.text_path, header)
                .await
                .map_err(|e| write_failed(&logger.text_path, e))?;
        }

        tracing::debug!("Session log {} started", logger.session_id);
        Ok(logger)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The file a reader should open first
    pub fn primary_path(&self) -> &Path {
        if self.format.writes_text() {
            &self.text_path
        } else {
            &self.json_path
        }
    }

    pub fn json_path(&self) -> Option<&Path> {
        self.format.writes_json().then_some(self.json_path.as_path())
    }

    pub fn text_path(&self) -> Option<&Path> {
        self.format.writes_text().then_some(self.text_path.as_path())
    }

    /// Number of turns logged so far
    pub async fn turn_count(&self) -> usize {
        self.turns.lock().await.len()
    }

    /// Write one turn
    pub async fn log_turn(&self, record: &TurnRecord) -> Result<()> {
        let mut turns = self.turns.lock().await;
        turns.push(record.clone());

        if self.format.writes_json() {
            let json = serde_json::to_string_pretty(&*turns)?;
            fs::write(&self.json_path, json)
                .await
                .map_err(|e| write_failed(&self.json_path, e))?;
        }

        if self.format.writes_text() {
            self.append_text(&render_turn(record)).await?;
        }

        Ok(())
    }

    /// Close the transcript with session totals
    pub async fn log_summary(
        &self,
        total_messages: usize,
        total_time: Duration,
    ) -> Result<SessionSummary> {
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            total_messages,
            total_time: total_time.as_secs_f64(),
            end_time: Local::now(),
        };

        if self.format.writes_text() {
            let text = format!(
                "\n\n{}\nSession Summary\nTotal Messages: {}\nTotal Time: {:.2}s\nEnded: {}\n",
                "=".repeat(RULE_WIDTH),
                summary.total_messages,
                summary.total_time,
                summary.end_time.format("%Y-%m-%d %H:%M:%S")
            );
            self.append_text(&text).await?;
        }

        Ok(summary)
    }

    async fn append_text(&self, text: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.text_path)
            .await
            .map_err(|e| write_failed(&self.text_path, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| write_failed(&self.text_path, e))?;
        file.flush()
            .await
            .map_err(|e| write_failed(&self.text_path, e))?;
        Ok(())
    }
}

#[async_trait]
impl SessionSink for ConversationLogger {
    async fn record_turn(&self, record: &TurnRecord) -> Result<()> {
        self.log_turn(record).await
    }
}

fn write_failed(path: &Path, error: std::io::Error) -> crate::error::Error {
    LoggerError::WriteFailed {
        path: path.display().to_string(),
        message: error.to_string(),
    }
    .into()
}

fn render_turn(record: &TurnRecord) -> String {
    // Writing to a String cannot fail.
    let mut out = String::new();
    let _ = writeln!(out, "\n[{}]", record.timestamp.to_rfc3339());
    let _ = writeln!(out, "User: {}", record.user_message);

    if !record.tool_calls.is_empty() {
        let _ = writeln!(out, "\nTool Calls ({}):", record.tool_calls.len());
        for call in &record.tool_calls {
            let _ = writeln!(out, "  - {}: {}", call.name, call.input);
        }
    }

    if !record.tool_results.is_empty() {
        let _ = writeln!(out, "\nTool Results:");
        for result in &record.tool_results {
            let mark = if result.is_error { "❌" } else { "✅" };
            let _ = writeln!(out, "  {} {} ({:.2}s)", mark, result.tool_name, result.time);
        }
    }

    let _ = writeln!(out, "\nTiming:");
    for (name, seconds) in record.timing.entries() {
        let _ = writeln!(out, "  {}: {:.2}s", name, seconds);
    }

    if let Some(error) = &record.error {
        let _ = writeln!(out, "\n❌ Error: {}", error);
    }

    let _ = writeln!(out, "\nAssistant: {}", record.assistant_response);
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    out
}
