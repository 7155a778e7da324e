use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::actions::Action;
use crate::config::{self, Config, CursorSeed};
use crate::dedup::DedupGuard;
use crate::dispatch::{CommandDispatcher, DispatchSettings};
use crate::telegram::{truncate, ChatMessage, ChatTransport, Choice, Markup, MessageBody, CHOICE_MARKER};
use crate::tmux::heuristics::{Observation, SNAPSHOT_LINES};
use crate::tmux::{PromptDetector, PromptEvent, RateLimitNotice, RateLimitWatch, Terminal};

/// Button prefixes, by option position
const OPTION_EMOJIS: &[&str] = &["✅", "🔄", "✍️", "💬", "⭐", "🔗", "🔧", "⚙️"];

const ONLINE_TEXT: &str = "🟢 couch-relay online";
const OFFLINE_TEXT: &str = "🔴 couch-relay offline";

/// Timing and policy for one bridge instance
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// The only chat whose messages are dispatched
    pub authorized_chat: i64,
    pub long_poll_wait: Duration,
    pub scan_interval: Duration,
    pub cursor_seed: CursorSeed,
    /// Bound on each startup / shutdown announcement
    pub announce_timeout: Duration,
    pub dispatch: DispatchSettings,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            authorized_chat: config.chat_id,
            long_poll_wait: config.long_poll_wait(),
            scan_interval: config.scan_interval(),
            cursor_seed: config.cursor_seed,
            announce_timeout: Duration::from_secs(5),
            dispatch: DispatchSettings {
                max_message_length: config.max_message_length,
                download_dir: config::download_dir(),
                input_wait: config.input_wait(),
            },
        }
    }
}

/// Next update id to ask for. Only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollCursor {
    next: Option<i64>,
}

impl PollCursor {
    /// Starting cursor under `policy`
    pub async fn seed<C: ChatTransport + ?Sized>(policy: CursorSeed, chat: &C) -> Self {
        match policy {
            CursorSeed::Replay => Self::default(),
            CursorSeed::SkipBacklog => match chat.newest_pending().await {
                Some(newest) => {
                    info!("Skipping backlog up to update {}", newest);
                    Self {
                        next: Some(newest + 1),
                    }
                }
                None => Self::default(),
            },
        }
    }

    pub fn offset(&self) -> Option<i64> {
        self.next
    }

    /// Move past every message of a fully dispatched batch
    pub fn advance(&mut self, batch: &[ChatMessage]) {
        if let Some(max) = batch.iter().map(|m| m.id).max() {
            self.next = Some(self.next.map_or(max + 1, |n| n.max(max + 1)));
        }
    }
}

/// Updates handed from the poll task; `done` fires once all are dispatched
struct Batch {
    messages: Vec<ChatMessage>,
    done: oneshot::Sender<()>,
}

/// Long-poll forever, advancing the cursor only after each batch is acknowledged
async fn poll_updates<C: ChatTransport + ?Sized>(
    chat: Arc<C>,
    mut cursor: PollCursor,
    wait: Duration,
    tx: mpsc::Sender<Batch>,
) {
    loop {
        let messages = chat.fetch_updates(cursor.offset(), wait).await;
        if messages.is_empty() {
            continue;
        }

        let (done, dispatched) = oneshot::channel();
        let batch = Batch {
            messages: messages.clone(),
            done,
        };
        if tx.send(batch).await.is_err() || dispatched.await.is_err() {
            break;
        }
        cursor.advance(&messages);
    }
}

/// The relay daemon: polls chat, dispatches commands and forwards prompts
pub struct Bridge<T: ?Sized, C: ?Sized> {
    terminal: Arc<T>,
    chat: Arc<C>,
    dispatcher: CommandDispatcher<T, C>,
    detector: PromptDetector,
    dedup: DedupGuard,
    rate_limit: RateLimitWatch,
    settings: BridgeSettings,
}

impl<T, C> Bridge<T, C>
where
    T: Terminal + ?Sized + 'static,
    C: ChatTransport + ?Sized + 'static,
{
    pub fn new(terminal: Arc<T>, chat: Arc<C>, settings: BridgeSettings) -> Self {
        let dispatcher = CommandDispatcher::new(
            terminal.clone(),
            chat.clone(),
            Instant::now(),
            settings.dispatch.clone(),
        );
        Self {
            terminal,
            chat,
            dispatcher,
            detector: PromptDetector::new(),
            dedup: DedupGuard::new(),
            rate_limit: RateLimitWatch::new(),
            settings,
        }
    }

    /// Run until `shutdown` resolves, announcing online and offline
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.announce(ONLINE_TEXT).await;

        let cursor = PollCursor::seed(self.settings.cursor_seed, self.chat.as_ref()).await;
        let (tx, mut rx) = mpsc::channel(1);
        let poller = tokio::spawn(poll_updates(
            self.chat.clone(),
            cursor,
            self.settings.long_poll_wait,
            tx,
        ));

        let mut scan_tick = tokio::time::interval(self.settings.scan_interval);
        scan_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "Polling started (chat_id={}, scan every {:?})",
            self.settings.authorized_chat, self.settings.scan_interval
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(batch) = rx.recv() => {
                    self.handle_batch(&batch.messages).await;
                    let _ = batch.done.send(());
                }
                _ = scan_tick.tick() => self.scan().await,
            }
        }

        poller.abort();
        self.announce(OFFLINE_TEXT).await;
        info!("Polling stopped");
        Ok(())
    }

    /// Dispatch the authorized messages of one batch, in order.
    /// Returns how many reached the dispatcher.
    pub async fn handle_batch(&mut self, messages: &[ChatMessage]) -> usize {
        let mut dispatched = 0;
        let mut attachments = Vec::new();

        for message in messages {
            if message.sender != self.settings.authorized_chat {
                debug!("Ignoring update {} from chat {}", message.id, message.sender);
                continue;
            }
            if let MessageBody::Text(text) = &message.body {
                info!("Received: {}", text.chars().take(100).collect::<String>());
            }

            dispatched += 1;
            match Action::from_message(&message.body) {
                Action::Attachment(attachment) => attachments.push(attachment),
                action => self.dispatcher.dispatch(action).await,
            }
        }

        if !attachments.is_empty() {
            self.dispatcher.forward_attachments(&attachments).await;
        }
        dispatched
    }

    /// One screen check: forward new prompts and usage-limit changes
    pub async fn scan(&mut self) {
        let snapshot = match self.terminal.capture(SNAPSHOT_LINES).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Scan skipped: {}", e);
                return;
            }
        };

        match self.detector.observe(&snapshot) {
            Observation::Prompt(event) => {
                if self.dedup.should_send(&event) {
                    self.notify_prompt(&event).await;
                }
            }
            Observation::Cleared => self.dedup.reset(),
            Observation::Malformed => debug!("Prompt marker without options, retrying next scan"),
            Observation::Quiet => {}
        }

        if let Some(notice) = self.rate_limit.observe(&snapshot) {
            self.notify_rate_limit(notice).await;
        }
    }

    async fn notify_prompt(&mut self, event: &PromptEvent) {
        info!("Prompt detected, forwarding");
        debug!("Prompt: {}", event.render());

        let body = format!("❓ *Prompt*\n\n{}", event.render());
        let body = truncate(&body, self.settings.dispatch.max_message_length);
        let choices: Vec<Choice> = event
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| Choice {
                label: format!("{} {}", OPTION_EMOJIS.get(i).unwrap_or(&"▶️"), option.label),
                data: format!("{}{}", CHOICE_MARKER, option.number),
            })
            .collect();

        if let Err(e) = self.chat.send_choice(&body, &choices).await {
            warn!("Prompt notify failed: {}", e);
            // Try again on the next scan
            self.dedup.reset();
        }
    }

    async fn notify_rate_limit(&self, notice: RateLimitNotice) {
        let (body, markup) = match notice {
            RateLimitNotice::Reached { summary, reset } => {
                info!("Rate limit detected");
                let reset = reset.map(|r| format!("\n⏰ {}", r)).unwrap_or_default();
                (format!("🛑 *Rate limit reached*\n\n{}{}", summary, reset), Markup::Markdown)
            }
            RateLimitNotice::Cleared => {
                info!("Rate limit cleared");
                ("✅ Rate limit reset, the agent is ready again".to_string(), Markup::Plain)
            }
        };
        let body = truncate(&body, self.settings.dispatch.max_message_length);
        if let Err(e) = self.chat.send_text(&body, markup).await {
            warn!("Rate limit notify failed: {}", e);
        }
    }

    /// Best-effort send bounded by `announce_timeout`
    async fn announce(&self, text: &str) {
        let send = self.chat.send_text(text, Markup::Plain);
        match tokio::time::timeout(self.settings.announce_timeout, send).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Could not send \"{}\": {}", text, e),
            Err(_) => warn!("Timed out sending \"{}\"", text),
        }
    }
}
