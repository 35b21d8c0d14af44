use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_messages_config")]
    pub messages: MessagesConfig,
    #[serde(default = "default_agent_config")]
    pub agent: AgentConfig,
    #[serde(default = "default_relay_config")]
    pub relay: RelayConfig,
    #[serde(default = "default_delivery_config")]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagesConfig {
    /// Path to the Messages `chat.db`. A leading `~/` is expanded from $HOME.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Prefix that marks a self-sent message as a command
    #[serde(default = "default_trigger")]
    pub trigger: String,
    /// Prefix put on every outgoing reply
    #[serde(default = "default_reply_emblem")]
    pub reply_emblem: String,
    /// Follows the emblem on locally synthesized failure replies
    #[serde(default = "default_error_marker")]
    pub error_marker: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_cursor_path")]
    pub cursor_path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause between finishing one message and starting the next
    #[serde(default = "default_message_pause_ms")]
    pub message_pause_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Explicit recipient. When unset, replies go to the self-conversation.
    #[serde(default)]
    pub target_handle: Option<String>,
    /// Wait after activating Messages before sending
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_osascript_path")]
    pub osascript_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("~/Library/Messages/chat.db")
}

fn default_trigger() -> String {
    "@agent".to_string()
}

fn default_reply_emblem() -> String {
    "🤖".to_string()
}

fn default_error_marker() -> String {
    "❌ Error:".to_string()
}

fn default_agent_url() -> String {
    "http://localhost:3000/api/agent".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_cursor_path() -> PathBuf {
    PathBuf::from("last_message_timestamp.txt")
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_message_pause_ms() -> u64 {
    500
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_osascript_path() -> PathBuf {
    PathBuf::from("osascript")
}

fn default_messages_config() -> MessagesConfig {
    MessagesConfig {
        database_path: default_database_path(),
        trigger: default_trigger(),
        reply_emblem: default_reply_emblem(),
        error_marker: default_error_marker(),
    }
}

fn default_agent_config() -> AgentConfig {
    AgentConfig {
        url: default_agent_url(),
        timeout_secs: default_timeout_secs(),
    }
}

fn default_relay_config() -> RelayConfig {
    RelayConfig {
        cursor_path: default_cursor_path(),
        poll_interval_ms: default_poll_interval_ms(),
        message_pause_ms: default_message_pause_ms(),
    }
}

fn default_delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        target_handle: None,
        settle_delay_ms: default_settle_delay_ms(),
        osascript_path: default_osascript_path(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            messages: default_messages_config(),
            agent: default_agent_config(),
            relay: default_relay_config(),
            delivery: default_delivery_config(),
        }
    }
}

/// Expand a leading `~/` against `home`.
fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            info!(
                "Config file {} not found, using defaults",
                path.display()
            );
            Self::default()
        };

        let home = std::env::var_os("HOME").map(PathBuf::from);
        config.expand_paths(home.as_deref());

        config.validate()?;
        Ok(config)
    }

    /// Expand `~/` in every path setting.
    fn expand_paths(&mut self, home: Option<&Path>) {
        self.messages.database_path = expand_home(&self.messages.database_path, home);
        self.relay.cursor_path = expand_home(&self.relay.cursor_path, home);
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let m = &self.messages;
        if m.trigger.trim().is_empty() {
            anyhow::bail!("messages.trigger must not be empty");
        }
        if m.reply_emblem.is_empty() {
            anyhow::bail!("messages.reply_emblem must not be empty");
        }
        // A reply must never look like a command, and a command must never look like a reply
        if m.reply_emblem.starts_with(&m.trigger) || m.trigger.starts_with(&m.reply_emblem) {
            anyhow::bail!(
                "messages.trigger ({:?}) and messages.reply_emblem ({:?}) \
                 must not prefix each other",
                m.trigger,
                m.reply_emblem
            );
        }
        if self.relay.poll_interval_ms == 0 {
            anyhow::bail!("relay.poll_interval_ms must be greater than zero");
        }
        if self.agent.timeout_secs == 0 {
            anyhow::bail!("agent.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay.poll_interval_ms)
    }

    pub fn message_pause(&self) -> Duration {
        Duration::from_millis(self.relay.message_pause_ms)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.delivery.settle_delay_ms)
    }
}
