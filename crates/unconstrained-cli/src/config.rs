//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use unconstrained_api::providers::get_api_key;
use unconstrained_chat::{AssistantPreset, ChatConfig, PollConfig, default_presets};

/// Configuration for the unconstrained client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key (alternative to OPENAI_API_KEY)
    pub api_key: Option<String>,
    /// Override the API base URL
    pub base_url: Option<String>,
    /// Banner shown at startup
    pub title: String,
    /// Preset selected when the client starts
    pub default_assistant: Option<String>,
    /// Thread metadata key carrying the session id
    pub thread_metadata_key: String,
    /// Store PDFs and images remotely and attach them to the next prompt
    pub upload_documents: bool,
    /// Purpose tag for stored files
    pub file_purpose: String,
    pub polling: PollingConfig,
    /// Selectable assistants; the built-in list is used when empty
    pub assistants: Vec<AssistantPreset>,
}

/// Run polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub working_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub retry_ceiling: u32,
    /// 0 disables the limit
    pub max_wait_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            title: "UnconstrainED".to_string(),
            default_assistant: None,
            thread_metadata_key: "session_id".to_string(),
            upload_documents: false,
            file_purpose: "assistants".to_string(),
            polling: PollingConfig::default(),
            assistants: Vec::new(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        let defaults = PollConfig::default();
        Self {
            working_delay_ms: defaults.working_delay.as_millis() as u64,
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            retry_ceiling: defaults.retry_ceiling,
            max_wait_secs: defaults.max_wait.map(|d| d.as_secs()).unwrap_or(0),
        }
    }
}

impl From<&PollingConfig> for PollConfig {
    fn from(config: &PollingConfig) -> Self {
        PollConfig {
            working_delay: Duration::from_millis(config.working_delay_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_ceiling: config.retry_ceiling,
            max_wait: (config.max_wait_secs > 0).then(|| Duration::from_secs(config.max_wait_secs)),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("unconstrained")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("UNCONSTRAINED_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            default_assistant: Some("InterVU".to_string()),
            assistants: default_presets(),
            ..Config::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get the API key, checking config then env
    pub fn get_api_key(&self) -> unconstrained_api::Result<String> {
        get_api_key(self.api_key.as_deref(), "OPENAI_API_KEY")
    }

    /// Configured presets, or the built-in ones
    pub fn presets(&self) -> Vec<AssistantPreset> {
        if self.assistants.is_empty() {
            default_presets()
        } else {
            self.assistants.clone()
        }
    }

    /// Session settings derived from this config
    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            metadata_key: self.thread_metadata_key.clone(),
            file_purpose: self.file_purpose.clone(),
            upload_documents: self.upload_documents,
            polling: PollConfig::from(&self.polling),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# unconstrained configuration file
# Place at ~/.config/unconstrained/config.toml (Linux) or set UNCONSTRAINED_CONFIG_PATH

# Banner shown at startup
title = "UnconstrainED"

# Assistant selected at startup
default_assistant = "InterVU"

# Send PDFs and images to the assistant (otherwise they are only acknowledged)
upload_documents = false

# API key (optional - OPENAI_API_KEY is used when unset)
# api_key = "sk-..."

[polling]
working_delay_ms = 1000
retry_delay_ms = 3000
retry_ceiling = 3
# Give up waiting on one reply after this many seconds (0 = never)
max_wait_secs = 600

# Assistants: give an explicit id, or the environment variable holding it
[[assistants]]
name = "InterVU"
id_env = "INTERVU_ASSISTANT_ID"

[[assistants]]
name = "3Ps Prompt Builder"
id_env = "PROMPT_BUILDER_ASSISTANT_ID"

[[assistants]]
name = "Educational Media Analyst"
id = "asst_..."
"#
}
