use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::actions::Action;
use crate::telegram::{truncate, Attachment, AttachmentKind, ChatTransport, Markup};
use crate::tmux::{self, heuristics, Terminal, TerminalError};

/// Lines shown by `/view`
const VIEW_LINES: usize = 50;

const INPUT_POLL: Duration = Duration::from_secs(1);

const SENT_ACK: &str = "📨 Sent";

const HELP_TEXT: &str = "<b>couch-relay commands</b>

/ping - Check the relay is online
/status - Session status
/view or /screen - Current terminal (last 50 lines)
/esc - Send Escape (exit menus, cancel prompts)
/cd &lt;path&gt; - Change directory
/cmd &lt;command&gt; - Run a shell command
/help - This message

Anything else is typed into the session.
📷 Send a photo or file to hand it to the agent.";

/// Settings the dispatcher needs from the daemon config
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_message_length: usize,
    pub download_dir: PathBuf,
    pub input_wait: Duration,
}

/// Carries out [`Action`]s against the terminal and replies in chat.
/// Every message it receives is already authorized.
pub struct CommandDispatcher<T: ?Sized, C: ?Sized> {
    terminal: Arc<T>,
    chat: Arc<C>,
    started_at: Instant,
    settings: DispatchSettings,
}

impl<T, C> CommandDispatcher<T, C>
where
    T: Terminal + ?Sized,
    C: ChatTransport + ?Sized,
{
    pub fn new(terminal: Arc<T>, chat: Arc<C>, started_at: Instant, settings: DispatchSettings) -> Self {
        Self {
            terminal,
            chat,
            started_at,
            settings,
        }
    }

    pub async fn dispatch(&self, action: Action) {
        match action {
            Action::Ping => {
                let uptime = format_uptime(self.started_at.elapsed());
                self.reply(&format!("🏓 pong, uptime {}", uptime), Markup::Plain)
                    .await;
            }
            Action::Status => self.status().await,
            Action::View => self.view().await,
            Action::Escape => match self.terminal.send_key("Escape").await {
                Ok(()) => self.reply("⏏️ Escape sent", Markup::Plain).await,
                Err(e) => self.report(e).await,
            },
            Action::Help => self.reply(HELP_TEXT, Markup::Html).await,
            Action::ChangeDir(path) => self.inject_and_ack(&format!("cd {}", path)).await,
            Action::Shell(command) => self.inject_and_ack(&command).await,
            Action::Choice {
                callback_id,
                option,
            } => {
                let ack = match self.terminal.inject(&option.to_string()).await {
                    Ok(()) => {
                        info!("Sent option {} to the session", option);
                        format!("Sent: {}", option)
                    }
                    Err(e) => {
                        warn!("Choice {} not delivered: {}", option, e);
                        format!("Error: {}", e)
                    }
                };
                if let Err(e) = self.chat.acknowledge_choice(&callback_id, &ack).await {
                    warn!("Could not acknowledge choice: {}", e);
                }
            }
            Action::Literal(text) => match self.terminal.inject(&text).await {
                Ok(()) => {
                    debug!("Injected: {}", preview(&text));
                    self.reply(SENT_ACK, Markup::Plain).await;
                }
                Err(e) => self.report(e).await,
            },
            Action::Attachment(attachment) => self.forward_attachments(&[attachment]).await,
            Action::MissingArgument { usage } => {
                self.reply(&format!("Usage: {}", usage), Markup::Plain).await
            }
            Action::Unknown(name) => {
                self.reply(
                    &format!("❔ unknown command /{}. Send /help for the list.", name),
                    Markup::Plain,
                )
                .await
            }
            Action::Ignore => {}
        }
    }

    /// Download attachments and hand them to the agent as one message
    pub async fn forward_attachments(&self, attachments: &[Attachment]) {
        let mut saved = Vec::new();
        for attachment in attachments {
            match self.chat.download(attachment, &self.settings.download_dir).await {
                Ok(path) => saved.push((path, attachment.caption.clone())),
                Err(e) => {
                    warn!("Attachment download failed: {}", e);
                    let what = match attachment.kind {
                        AttachmentKind::Photo => "Photo",
                        AttachmentKind::Document => "File",
                    };
                    self.reply(&format!("❌ {} error: {}", what, e), Markup::Plain)
                        .await;
                }
            }
        }
        if saved.is_empty() {
            return;
        }

        let ready = tmux::wait_for_input(
            self.terminal.as_ref(),
            self.settings.input_wait,
            INPUT_POLL.min(self.settings.input_wait),
        )
        .await;
        if !ready {
            warn!("Timed out waiting for the input line, sending anyway");
            self.reply(
                "⚠️ Agent not at its input line, the file may need a manual Enter",
                Markup::Plain,
            )
            .await;
        }

        let prompt = attachment_prompt(&saved);
        match self.terminal.inject(&prompt).await {
            Ok(()) => {
                info!("Forwarded {} attachment(s)", saved.len());
                let label = if saved.len() == 1 {
                    "File".to_string()
                } else {
                    format!("{} files", saved.len())
                };
                self.reply(&format!("📷 {} sent to the agent", label), Markup::Plain)
                    .await;
            }
            Err(e) => self.report(e).await,
        }
    }

    async fn status(&self) {
        let status = self.terminal.query_status().await;
        let body = if status.alive {
            format!(
                "🟢 Session: <code>{}</code>\n📂 CWD: <code>{}</code>\n⚙️ Command: <code>{}</code>\n⏱ Uptime: {}",
                escape_html(&status.session),
                escape_html(or_unknown(&status.cwd)),
                escape_html(or_unknown(&status.foreground_command)),
                format_uptime(self.started_at.elapsed()),
            )
        } else {
            format!(
                "🔴 tmux session <code>{}</code> not found",
                escape_html(&status.session)
            )
        };
        self.reply(&body, Markup::Html).await;
    }

    async fn view(&self) {
        let screen = match self.terminal.capture(VIEW_LINES).await {
            Ok(screen) => screen,
            Err(e) => return self.report(e).await,
        };
        let clean = heuristics::sanitize(&screen);
        let clean = clean.trim();
        let body = if clean.is_empty() { "(empty screen)" } else { clean };
        let body = truncate(body, self.settings.max_message_length);
        self.reply(&body, Markup::Plain).await;
    }

    async fn inject_and_ack(&self, text: &str) {
        match self.terminal.inject(text).await {
            Ok(()) => {
                self.reply(&format!("📨 Sent: {}", text), Markup::Plain)
                    .await
            }
            Err(e) => self.report(e).await,
        }
    }

    async fn report(&self, error: TerminalError) {
        warn!("Terminal action failed: {}", error);
        self.reply(&format!("❌ {}", error), Markup::Plain).await;
    }

    async fn reply(&self, body: &str, markup: Markup) {
        if let Err(e) = self.chat.send_text(body, markup).await {
            warn!("Reply not delivered: {}", e);
        }
    }
}

/// "1h 2m 3s", "4m 5s" or "6s"
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Text typed into the session to hand over downloaded files
fn attachment_prompt(saved: &[(PathBuf, String)]) -> String {
    let paths: Vec<String> = saved.iter().map(|(p, _)| p.display().to_string()).collect();
    let captions: Vec<&str> = saved
        .iter()
        .map(|(_, c)| c.trim())
        .filter(|c| !c.is_empty())
        .collect();

    let files = if paths.len() == 1 {
        format!("file attached from Telegram, saved at: {}", paths[0])
    } else {
        format!(
            "{} files attached from Telegram, saved at: {}",
            paths.len(),
            paths.join(" and ")
        )
    };

    if captions.is_empty() {
        format!("The user sent a {}", files)
    } else {
        format!("{} ({})", captions.join(" | "), files)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
