mod client;
pub mod heuristics;

pub use client::TmuxClient;
pub use heuristics::{PromptDetector, PromptEvent, RateLimitNotice, RateLimitWatch};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from driving the terminal session
#[derive(Debug, Error)]
pub enum TerminalError {
    /// The named session does not exist (or tmux itself is not running)
    #[error("tmux session '{session}' is not running")]
    Unavailable { session: String },
    /// tmux ran but refused the request
    #[error("tmux {command} failed: {stderr}")]
    Rejected { command: &'static str, stderr: String },
}

/// Best-effort description of the bridged session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub session: String,
    pub alive: bool,
    /// Working directory of the active pane, empty if unknown
    pub cwd: String,
    /// Foreground command of the active pane, empty if unknown
    pub foreground_command: String,
}

/// Capture and inject primitives against one terminal session
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Last `lines` lines of the visible pane
    async fn capture(&self, lines: usize) -> Result<String, TerminalError>;

    /// Type `text` literally, then press Enter
    async fn inject(&self, text: &str) -> Result<(), TerminalError>;

    /// Press a named key such as `Escape`
    async fn send_key(&self, key: &str) -> Result<(), TerminalError>;

    async fn query_status(&self) -> SessionStatus;
}

/// Poll the pane until the agent shows an empty input line.
/// Returns false if `timeout` elapses first.
pub async fn wait_for_input<T: Terminal + ?Sized>(
    terminal: &T,
    timeout: Duration,
    poll_every: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(screen) = terminal.capture(5).await {
            if heuristics::shows_input_line(&screen) {
                return true;
            }
        }
        if tokio::time::Instant::now() + poll_every > deadline {
            return false;
        }
        tokio::time::sleep(poll_every).await;
    }
}
