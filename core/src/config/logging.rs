//! Session log configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which files the session logger writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// A JSON array of turn entries
    Json,
    /// A human-readable transcript
    Text,
    /// Both files
    #[default]
    Both,
}

impl LogFormat {
    pub fn writes_json(self) -> bool {
        matches!(self, LogFormat::Json | LogFormat::Both)
    }

    pub fn writes_text(self) -> bool {
        matches!(self, LogFormat::Text | LogFormat::Both)
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            "both" => Ok(LogFormat::Both),
            other => Err(format!(
                "Unknown log format '{}', expected json, text or both",
                other
            )),
        }
    }
}

/// Session logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Whether conversation logs are written at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory receiving the log files
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_enabled() -> bool {
    true
}

fn default_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dir: default_dir(),
            format: LogFormat::default(),
        }
    }
}
