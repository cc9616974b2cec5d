//! CLI configuration loader for Bible Chat
//!
//! Implements single-source priority loading with flag overrides:
//! 1. --config file/dir (highest priority)
//! 2. Current working directory: ./bible-chat.json or ./.bible-chat/config.json
//! 3. XDG config: $XDG_CONFIG_HOME/bible-chat/config.json or ~/.config/bible-chat/config.json
//! 4. Environment variables only (no files)
//!
//! Environment settings for logging and the FHL server location are applied on
//! top of whichever source was found; command-line flags win over both.

use anyhow::{anyhow, Context, Result};
use bible_chat_core::config::LogFormat;
use bible_chat_core::{
    ChatConfig, GatewayConfig, LogConfig, ModelParams, Protocol, ResolvedLlmConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "bible-chat";
const CONFIG_FILE_NAME: &str = "bible-chat.json";
const DEFAULT_SERVER_PATH: &str = "FHL-MCP-Server";

/// Raw configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    /// Protocol to use ("anthropic" or "openai")
    pub protocol: Option<String>,
    /// API key (can be "env:VAR_NAME" for environment variable)
    pub api_key: Option<String>,
    /// Base URL (optional, uses protocol default if not specified)
    pub base_url: Option<String>,
    /// Model name (optional, uses protocol default if not specified)
    pub model: Option<String>,
    /// Model parameters (optional)
    #[serde(default)]
    pub params: ModelParams,
    /// Additional headers (optional)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Chat behaviour
    #[serde(default)]
    pub chat: ChatConfig,
    /// Explicit gateway command; takes precedence over `server_path`
    pub gateway: Option<GatewayConfig>,
    /// Directory of the FHL MCP server checkout
    pub server_path: Option<String>,
    /// Session log settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Everything the application needs, resolved and validated
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: ResolvedLlmConfig,
    pub chat: ChatConfig,
    pub gateway: GatewayConfig,
    pub logging: LogConfig,
}

/// Settings read from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvSettings {
    pub protocol: Option<String>,
    pub anthropic_key: Option<String>,
    pub openai_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_model: Option<String>,
    pub openai_model: Option<String>,
    pub server_path: Option<String>,
    pub enable_logging: Option<String>,
    pub log_format: Option<String>,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            protocol: var("BIBLE_CHAT_PROTOCOL"),
            anthropic_key: var("ANTHROPIC_API_KEY"),
            openai_key: var("OPENAI_API_KEY"),
            anthropic_base_url: var("ANTHROPIC_BASE_URL"),
            openai_base_url: var("OPENAI_BASE_URL"),
            anthropic_model: var("ANTHROPIC_MODEL"),
            openai_model: var("OPENAI_MODEL"),
            server_path: var("FHL_SERVER_PATH"),
            enable_logging: var("ENABLE_LOGGING"),
            log_format: var("LOG_FORMAT"),
        }
    }
}

/// CLI configuration loader
#[derive(Debug, Default)]
pub struct CliConfigLoader {
    config_override: Option<PathBuf>,
    protocol_override: Option<String>,
    api_key_override: Option<String>,
    base_url_override: Option<String>,
    model_override: Option<String>,
    server_path_override: Option<String>,
    max_history_override: Option<usize>,
    max_tool_cycles_override: Option<usize>,
    log_dir_override: Option<PathBuf>,
    log_format_override: Option<LogFormat>,
    no_log: bool,
}

impl CliConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_override(mut self, path: PathBuf) -> Self {
        self.config_override = Some(path);
        self
    }

    pub fn with_protocol_override(mut self, protocol: String) -> Self {
        self.protocol_override = Some(protocol);
        self
    }

    pub fn with_api_key_override(mut self, api_key: String) -> Self {
        self.api_key_override = Some(api_key);
        self
    }

    pub fn with_base_url_override(mut self, base_url: String) -> Self {
        self.base_url_override = Some(base_url);
        self
    }

    pub fn with_model_override(mut self, model: String) -> Self {
        self.model_override = Some(model);
        self
    }

    pub fn with_server_path_override(mut self, path: String) -> Self {
        self.server_path_override = Some(path);
        self
    }

    pub fn with_max_history_override(mut self, max_history: usize) -> Self {
        self.max_history_override = Some(max_history);
        self
    }

    pub fn with_max_tool_cycles_override(mut self, max_tool_cycles: usize) -> Self {
        self.max_tool_cycles_override = Some(max_tool_cycles);
        self
    }

    pub fn with_log_dir_override(mut self, dir: PathBuf) -> Self {
        self.log_dir_override = Some(dir);
        self
    }

    pub fn with_log_format_override(mut self, format: LogFormat) -> Self {
        self.log_format_override = Some(format);
        self
    }

    /// Disable session logs regardless of other settings
    pub fn without_logging(mut self) -> Self {
        self.no_log = true;
        self
    }

    /// Load and resolve configuration from files and the process environment
    pub async fn load(&self) -> Result<AppConfig> {
        self.load_with_env(&EnvSettings::from_env()).await
    }

    /// Load and resolve configuration against explicit environment settings
    pub async fn load_with_env(&self, env: &EnvSettings) -> Result<AppConfig> {
        let raw = self.load_raw().await?;

        // Flags win over the file, which wins over the environment
        let llm = self.resolve_llm(&raw, env)?;
        let chat = self.resolve_chat(raw.chat.clone())?;
        let gateway = self.resolve_gateway(&raw, env)?;
        let logging = self.resolve_logging(raw.logging.clone(), env)?;

        Ok(AppConfig {
            llm,
            chat,
            gateway,
            logging,
        })
    }

    /// Resolve only the gateway command, for commands that never call the model
    pub async fn load_gateway(&self) -> Result<GatewayConfig> {
        let raw = self.load_raw().await?;
        self.resolve_gateway(&raw, &EnvSettings::from_env())
    }

    async fn load_raw(&self) -> Result<RawConfig> {
        if let Some(override_path) = &self.config_override {
            return load_from_path(override_path).await.with_context(|| {
                format!(
                    "Failed to load config from override path: {}",
                    override_path.display()
                )
            });
        }

        match search_config_file()? {
            Some(path) => {
                tracing::debug!("Using config file {}", path.display());
                load_file(&path).await
            }
            None => Ok(RawConfig::default()),
        }
    }

    fn resolve_llm(&self, raw: &RawConfig, env: &EnvSettings) -> Result<ResolvedLlmConfig> {
        let protocol = match self
            .protocol_override
            .as_deref()
            .or(raw.protocol.as_deref())
            .or(env.protocol.as_deref())
        {
            Some(name) => parse_protocol(name)?,
            None => detect_protocol(env)?,
        };

        let (env_key, env_base_url, env_model) = match protocol {
            Protocol::Anthropic => (
                &env.anthropic_key,
                &env.anthropic_base_url,
                &env.anthropic_model,
            ),
            Protocol::OpenAICompat => (&env.openai_key, &env.openai_base_url, &env.openai_model),
        };

        let api_key = match self.api_key_override.as_ref().or(raw.api_key.as_ref()) {
            Some(value) => resolve_api_key(value)?,
            None => env_key.clone().ok_or_else(|| {
                anyhow!(
                    "No API key found for protocol '{}'. Set it in the config file or the environment",
                    protocol.as_str()
                )
            })?,
        };

        let base_url = self
            .base_url_override
            .clone()
            .or_else(|| raw.base_url.clone())
            .or_else(|| env_base_url.clone())
            .unwrap_or_else(|| protocol.default_base_url().to_string());

        let model = self
            .model_override
            .clone()
            .or_else(|| raw.model.clone())
            .or_else(|| env_model.clone())
            .unwrap_or_else(|| protocol.default_model().to_string());

        let resolved = ResolvedLlmConfig::new(protocol, base_url, api_key, model)
            .with_params(raw.params.clone())
            .with_headers(raw.headers.clone());

        resolved
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        Ok(resolved)
    }

    fn resolve_chat(&self, mut chat: ChatConfig) -> Result<ChatConfig> {
        if let Some(max_history) = self.max_history_override {
            chat.max_history = max_history;
        }
        if let Some(max_tool_cycles) = self.max_tool_cycles_override {
            chat.max_tool_cycles = max_tool_cycles;
        }
        chat.validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
        Ok(chat)
    }

    fn resolve_gateway(&self, raw: &RawConfig, env: &EnvSettings) -> Result<GatewayConfig> {
        let server_path = self
            .server_path_override
            .as_ref()
            .or(env.server_path.as_ref())
            .or(raw.server_path.as_ref());

        // An explicit gateway command is used unless a server path is forced.
        if let (Some(gateway), None) = (&raw.gateway, &self.server_path_override) {
            gateway
                .validate()
                .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
            return Ok(gateway.clone());
        }

        let server_path = match server_path {
            Some(path) => expand_path(path)?,
            None => std::env::current_dir()?.join(DEFAULT_SERVER_PATH),
        };
        fhl_gateway(&server_path)
    }

    fn resolve_logging(&self, mut logging: LogConfig, env: &EnvSettings) -> Result<LogConfig> {
        if let Some(enabled) = &env.enable_logging {
            logging.enabled = enabled.eq_ignore_ascii_case("true");
        }
        if let Some(format) = &env.log_format {
            logging.format = format
                .parse()
                .map_err(|e: String| anyhow!("Invalid LOG_FORMAT: {}", e))?;
        }

        if let Some(dir) = &self.log_dir_override {
            logging.dir = dir.clone();
        }
        if let Some(format) = self.log_format_override {
            logging.format = format;
        }
        if self.no_log {
            logging.enabled = false;
        }
        Ok(logging)
    }
}

/// Parse a protocol name as written in config files, flags or the environment
pub fn parse_protocol(name: &str) -> Result<Protocol> {
    name.parse::<Protocol>().map_err(|e| anyhow!(e))
}

/// Pick a protocol from whichever API key is present
fn detect_protocol(env: &EnvSettings) -> Result<Protocol> {
    match (&env.anthropic_key, &env.openai_key) {
        (Some(_), None) => Ok(Protocol::Anthropic),
        (None, Some(_)) => Ok(Protocol::OpenAICompat),
        (Some(_), Some(_)) => Err(anyhow!(
            "Multiple API keys detected: anthropic, openai. Please specify which protocol to use with BIBLE_CHAT_PROTOCOL or --protocol"
        )),
        (None, None) => Err(anyhow!(
            "No configuration found. Please create a {} file or set ANTHROPIC_API_KEY",
            CONFIG_FILE_NAME
        )),
    }
}

/// Resolve `env:VAR_NAME` indirection
fn resolve_api_key(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => std::env::var(var_name)
            .with_context(|| format!("Environment variable not found: {}", var_name)),
        None => Ok(value.to_string()),
    }
}

fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .with_context(|| format!("Failed to expand path: {}", path))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Gateway command running the FHL server from its own virtualenv
pub fn fhl_gateway(server_path: &Path) -> Result<GatewayConfig> {
    let candidates = [
        server_path.join(".venv").join("bin").join("python"),
        server_path.join(".venv").join("Scripts").join("python.exe"),
    ];
    let python = candidates
        .into_iter()
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            anyhow!(
                "Python not found in FHL-MCP-Server venv. Please run: cd {} && uv venv && uv pip install -e .",
                server_path.display()
            )
        })?;

    Ok(GatewayConfig::new(python.to_string_lossy())
        .with_args(["-m", "fhl_bible_mcp"])
        .with_env("PYTHONPATH", server_path.join("src").to_string_lossy())
        .with_working_dir(server_path.to_path_buf()))
}

/// Find the first config file in priority order
fn search_config_file() -> Result<Option<PathBuf>> {
    let cwd = std::env::current_dir()?;

    let candidates = [
        Some(cwd.join(CONFIG_FILE_NAME)),
        Some(cwd.join(format!(".{}", CONFIG_DIR_NAME)).join("config.json")),
        xdg_config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.json")),
    ];

    Ok(candidates.into_iter().flatten().find(|path| path.exists()))
}

fn xdg_config_dir() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
}

/// Load configuration from a specific path (file or directory)
async fn load_from_path(path: &Path) -> Result<RawConfig> {
    if path.is_file() {
        load_file(path).await
    } else if path.is_dir() {
        let config_file = path.join("config.json");
        if config_file.exists() {
            load_file(&config_file).await
        } else {
            Err(anyhow!(
                "No config.json found in directory: {}",
                path.display()
            ))
        }
    } else {
        Err(anyhow!("Config path does not exist: {}", path.display()))
    }
}

async fn load_file(path: &Path) -> Result<RawConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
