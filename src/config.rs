use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.json";
const LOG_FILE: &str = "couch-relay.log";
const PID_FILE: &str = "couch-relay.pid";
const DOWNLOAD_DIR: &str = "downloads";

/// How the poll cursor is seeded when the daemon starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CursorSeed {
    /// Deliver every update the endpoint still holds, including ones sent while offline
    #[default]
    Replay,
    /// Start just past the newest pending update, dropping the backlog
    SkipBacklog,
}

/// Daemon configuration, loaded from `~/.couch-relay/config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "telegram_bot_token")]
    pub bot_token: String,
    /// The single chat allowed to drive the session
    #[serde(alias = "telegram_chat_id")]
    pub chat_id: i64,
    pub tmux_session: String,
    pub max_message_length: usize,
    /// Backoff after a failed request
    pub poll_interval_secs: u64,
    /// Server-side wait of one long-poll
    pub long_poll_secs: u64,
    pub scan_interval_secs: u64,
    /// Upper bound on waiting for the agent's input line before forwarding files
    pub input_wait_secs: u64,
    pub log_level: String,
    pub cursor_seed: CursorSeed,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: 0,
            tmux_session: "claude".to_string(),
            max_message_length: 4000,
            poll_interval_secs: 2,
            long_poll_secs: 5,
            scan_interval_secs: 5,
            input_wait_secs: 30,
            log_level: "warn".to_string(),
            cursor_seed: CursorSeed::Replay,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config in {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = var("COUCH_RELAY_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.bot_token = token;
        }
        if let Some(chat) = var("COUCH_RELAY_CHAT_ID").filter(|v| !v.is_empty()) {
            self.chat_id = chat
                .trim()
                .parse()
                .context("COUCH_RELAY_CHAT_ID must be a numeric chat id")?;
        }
        if let Some(session) = var("COUCH_RELAY_TMUX_SESSION").filter(|v| !v.is_empty()) {
            self.tmux_session = session;
        }
        if let Some(level) = var("COUCH_RELAY_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        Ok(())
    }

    /// Names of required fields that are still unset
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.bot_token.trim().is_empty() {
            missing.push("bot_token");
        }
        if self.chat_id == 0 {
            missing.push("chat_id");
        }
        missing
    }

    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing config fields: {} (set them in {})",
                missing.join(", "),
                config_path().display()
            );
        }
        Ok(())
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn long_poll_wait(&self) -> Duration {
        Duration::from_secs(self.long_poll_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn input_wait(&self) -> Duration {
        Duration::from_secs(self.input_wait_secs)
    }
}

/// State directory, `~/.couch-relay`
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".couch-relay")
}

pub fn config_path() -> PathBuf {
    home_dir().join(CONFIG_FILE)
}

pub fn log_path() -> PathBuf {
    home_dir().join(LOG_FILE)
}

pub fn pid_path() -> PathBuf {
    home_dir().join(PID_FILE)
}

pub fn download_dir() -> PathBuf {
    home_dir().join(DOWNLOAD_DIR)
}
