//! In-memory terminal and chat endpoint for tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::telegram::{
    Attachment, ChatMessage, ChatTransport, Choice, Delivery, Markup, MessageBody, TransportError,
};
use crate::tmux::{SessionStatus, Terminal, TerminalError};

pub struct FakeTerminal {
    pub alive: bool,
    pub screen: Mutex<String>,
    pub injected: Mutex<Vec<String>>,
    pub keys: Mutex<Vec<String>>,
}

impl FakeTerminal {
    pub fn new(screen: &str) -> Self {
        Self {
            alive: true,
            screen: Mutex::new(screen.to_string()),
            injected: Mutex::new(Vec::new()),
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn dead() -> Self {
        Self {
            alive: false,
            ..Self::new("")
        }
    }

    pub fn set_screen(&self, screen: &str) {
        *self.screen.lock().unwrap() = screen.to_string();
    }

    pub fn injected(&self) -> Vec<String> {
        self.injected.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), TerminalError> {
        if self.alive {
            Ok(())
        } else {
            Err(TerminalError::Unavailable {
                session: "claude".to_string(),
            })
        }
    }
}

#[async_trait]
impl Terminal for FakeTerminal {
    async fn capture(&self, lines: usize) -> Result<String, TerminalError> {
        self.check()?;
        let screen = self.screen.lock().unwrap();
        let all: Vec<&str> = screen.lines().collect();
        Ok(all[all.len().saturating_sub(lines)..].join("\n"))
    }

    async fn inject(&self, text: &str) -> Result<(), TerminalError> {
        self.check()?;
        self.injected.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_key(&self, key: &str) -> Result<(), TerminalError> {
        self.check()?;
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn query_status(&self) -> SessionStatus {
        SessionStatus {
            session: "claude".to_string(),
            alive: self.alive,
            cwd: if self.alive { "/work".to_string() } else { String::new() },
            foreground_command: if self.alive { "claude".to_string() } else { String::new() },
        }
    }
}

#[derive(Default)]
pub struct FakeChat {
    pub inbox: Mutex<VecDeque<Vec<ChatMessage>>>,
    pub pending: Option<i64>,
    pub offsets: Mutex<Vec<Option<i64>>>,
    pub texts: Mutex<Vec<(String, Markup)>>,
    pub choices: Mutex<Vec<(String, Vec<Choice>)>>,
    pub acks: Mutex<Vec<(String, String)>>,
    pub fail_sends: bool,
}

impl FakeChat {
    pub fn with_inbox(batches: Vec<Vec<ChatMessage>>) -> Self {
        Self {
            inbox: Mutex::new(batches.into()),
            ..Default::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn choice_count(&self) -> usize {
        self.choices.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn fetch_updates(&self, since: Option<i64>, wait: Duration) -> Vec<ChatMessage> {
        self.offsets.lock().unwrap().push(since);
        let next = self.inbox.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(wait).await;
                Vec::new()
            }
        }
    }

    async fn newest_pending(&self) -> Option<i64> {
        self.pending
    }

    async fn send_text(&self, body: &str, markup: Markup) -> Result<Delivery, TransportError> {
        if self.fail_sends {
            return Err(TransportError::Failure("offline".into()));
        }
        self.texts.lock().unwrap().push((body.to_string(), markup));
        Ok(Delivery::Sent)
    }

    async fn send_choice(&self, body: &str, choices: &[Choice]) -> Result<Delivery, TransportError> {
        if self.fail_sends {
            return Err(TransportError::Failure("offline".into()));
        }
        self.choices
            .lock()
            .unwrap()
            .push((body.to_string(), choices.to_vec()));
        Ok(Delivery::Sent)
    }

    async fn acknowledge_choice(&self, callback_id: &str, text: &str) -> Result<(), TransportError> {
        self.acks
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn download(&self, attachment: &Attachment, dir: &Path) -> Result<PathBuf, TransportError> {
        Ok(dir.join(format!("{}.jpg", attachment.file_id)))
    }
}

pub fn text_message(id: i64, sender: i64, text: &str) -> ChatMessage {
    ChatMessage {
        id,
        sender,
        body: MessageBody::Text(text.to_string()),
        timestamp: 0,
    }
}
