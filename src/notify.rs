//! One-shot notifier run from the agent's lifecycle hooks.
//!
//! Sends the agent's last reply to the chat. Hooks must never fail, so
//! [`run_hook`] maps every outcome to a zero exit status.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::Config;
use crate::telegram::{truncate, ChatTransport, HttpBotApi, Markup, TelegramTransport};

const NO_TEXT: &str = "(no text output)";

/// Send one notification of `kind`, swallowing every failure
pub async fn run_hook(kind: &str) -> ExitCode {
    if let Err(e) = notify(kind).await {
        debug!("Hook notification failed: {:#}", e);
    }
    ExitCode::SUCCESS
}

async fn notify(kind: &str) -> Result<()> {
    let config = Config::load()?;
    if !config.missing_fields().is_empty() {
        // Not set up yet
        return Ok(());
    }

    let message = claude_projects_dir()
        .and_then(|root| find_latest_transcript(&root))
        .and_then(|path| last_assistant_text(&path).ok().flatten())
        .unwrap_or_else(|| NO_TEXT.to_string());

    let body = format_notification(kind, &message);
    let body = truncate(&body, config.max_message_length);

    let api = HttpBotApi::new(&config.bot_token)?;
    let chat = TelegramTransport::new(api, config.chat_id, config.poll_backoff());
    chat.send_text(&body, Markup::Markdown)
        .await
        .context("Failed to send hook notification")?;
    Ok(())
}

fn claude_projects_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("projects"))
}

/// `<emoji> *<Label>*` header followed by the message
pub fn format_notification(kind: &str, message: &str) -> String {
    let prefix = match kind {
        "completed" => "✅",
        "waiting" => "❓",
        "error" => "❌",
        _ => "ℹ️",
    };
    let mut label = String::new();
    let mut chars = kind.chars();
    if let Some(first) = chars.next() {
        label.extend(first.to_uppercase());
        label.push_str(&chars.as_str().to_lowercase());
    }
    format!("{} *{}*\n\n{}", prefix, label, message)
}

/// Newest `.jsonl` transcript under `root`, ignoring subagent transcripts
pub fn find_latest_transcript(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jsonl"))
        .filter(|entry| !entry.path().components().any(|c| c.as_os_str() == "subagents"))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Text blocks of the last assistant turn; tool calls are skipped
pub fn last_assistant_text(path: &Path) -> Result<Option<String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut last = None;

    for line in BufReader::new(file).lines() {
        let line = line?;
        let Ok(entry) = serde_json::from_str::<Value>(line.trim()) else {
            continue;
        };
        let message = entry.get("message").unwrap_or(&entry);
        if message.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }

        let text = match message.get("content") {
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(text) => Some(text.as_str()),
                    Value::Object(_) if block.get("type").and_then(Value::as_str) == Some("text") => {
                        block.get("text").and_then(Value::as_str)
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n")
                .trim()
                .to_string(),
            _ => String::new(),
        };
        if !text.is_empty() {
            last = Some(text);
        }
    }

    Ok(last)
}
