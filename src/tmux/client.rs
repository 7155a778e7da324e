use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use super::{SessionStatus, Terminal, TerminalError};

/// Client for one named tmux session, driven via the tmux CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
    /// Target session name
    session: String,
    /// Serializes keystroke writes so two injections never interleave
    input_lock: Mutex<()>,
}

impl TmuxClient {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            tmux_path: "tmux".to_string(),
            session: session.into(),
            input_lock: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Check if the target session exists right now
    pub async fn session_exists(&self) -> bool {
        Command::new(&self.tmux_path)
            .args(["has-session", "-t", &self.session])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn run(&self, command: &'static str, args: &[&str]) -> Result<Output, TerminalError> {
        let output = Command::new(&self.tmux_path)
            .arg(command)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                debug!("Failed to execute tmux {}: {}", command, e);
                self.unavailable()
            })?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_missing_session(&stderr) {
            debug!("tmux {} found no session: {}", command, stderr);
            return Err(self.unavailable());
        }
        Err(TerminalError::Rejected { command, stderr })
    }

    fn unavailable(&self) -> TerminalError {
        TerminalError::Unavailable {
            session: self.session.clone(),
        }
    }
}

#[async_trait]
impl Terminal for TmuxClient {
    async fn capture(&self, lines: usize) -> Result<String, TerminalError> {
        let start = format!("-{}", lines);
        let output = self
            .run("capture-pane", &["-p", "-t", self.session.as_str(), "-S", start.as_str()])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn inject(&self, text: &str) -> Result<(), TerminalError> {
        let _guard = self.input_lock.lock().await;
        self.run("send-keys", &literal_keys_args(&self.session, text))
            .await?;
        self.run("send-keys", &named_key_args(&self.session, "Enter"))
            .await?;
        Ok(())
    }

    async fn send_key(&self, key: &str) -> Result<(), TerminalError> {
        let _guard = self.input_lock.lock().await;
        self.run("send-keys", &named_key_args(&self.session, key))
            .await?;
        Ok(())
    }

    async fn query_status(&self) -> SessionStatus {
        let mut status = SessionStatus {
            session: self.session.clone(),
            ..Default::default()
        };

        if !self.session_exists().await {
            return status;
        }
        status.alive = true;

        if let Ok(output) = self
            .run(
                "display-message",
                &[
                    "-p",
                    "-t",
                    self.session.as_str(),
                    "#{pane_current_path}|#{pane_current_command}",
                ],
            )
            .await
        {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let (cwd, command) = parse_pane_info(&stdout);
            status.cwd = cwd;
            status.foreground_command = command;
        }

        status
    }
}

/// `send-keys` arguments that type `text` verbatim.
/// `-l` stops tmux reading "Enter" or "C-c" as key names and `--` stops a
/// leading `-` being read as a flag.
fn literal_keys_args<'a>(session: &'a str, text: &'a str) -> [&'a str; 5] {
    ["-t", session, "-l", "--", text]
}

fn named_key_args<'a>(session: &'a str, key: &'a str) -> [&'a str; 4] {
    ["-t", session, "--", key]
}

fn is_missing_session(stderr: &str) -> bool {
    stderr.contains("can't find session")
        || stderr.contains("can't find pane")
        || stderr.contains("no server running")
        || stderr.contains("no sessions")
        || stderr.contains("error connecting to")
}

/// Split `path|command` output; either half may be missing
fn parse_pane_info(line: &str) -> (String, String) {
    let line = line.trim_end_matches(['\n', '\r']);
    match line.split_once('|') {
        Some((cwd, command)) => (cwd.trim().to_string(), command.trim().to_string()),
        None => (line.trim().to_string(), String::new()),
    }
}
