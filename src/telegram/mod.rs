mod api;
mod transport;
pub mod types;

pub use api::{BotApi, HttpBotApi};
pub use transport::TelegramTransport;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix of the callback data carried by prompt buttons
pub const CHOICE_MARKER: &str = "choice:";

/// Inserted between the kept head and tail of an over-long message
pub const ELLIPSIS_MARKER: &str = "\n\n… [truncated] …\n\n";

/// Errors from the chat endpoint
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level failure: connect, timeout, bad body
    #[error("request failed: {0}")]
    Failure(String),
    /// The endpoint answered but refused the request
    #[error("Bot API error {code}: {description}")]
    Api { code: i64, description: String },
    /// The endpoint could not parse the message's markup
    #[error("formatted message rejected: {0}")]
    MarkupRejected(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Worth retrying after the backoff interval
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Failure(_) => true,
            TransportError::Api { code, .. } => *code == 429 || *code >= 500,
            TransportError::MarkupRejected(_) | TransportError::Io(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Failure(err.to_string())
    }
}

/// How a message body should be interpreted by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Plain,
    Html,
    Markdown,
}

static RE_HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());

impl Markup {
    pub fn parse_mode(self) -> Option<&'static str> {
        match self {
            Markup::Plain => None,
            Markup::Html => Some("HTML"),
            Markup::Markdown => Some("Markdown"),
        }
    }

    /// Readable plain-text version of a body written in this markup
    pub fn strip(self, body: &str) -> String {
        match self {
            Markup::Plain => body.to_string(),
            Markup::Html => RE_HTML_TAG
                .replace_all(body, "")
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&amp;", "&"),
            Markup::Markdown => body.chars().filter(|c| !matches!(c, '*' | '`')).collect(),
        }
    }
}

/// Outcome of a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Markup was rejected; the message went out as plain text
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Document,
}

/// A file sent from the chat, not yet downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub file_id: String,
    pub file_name: Option<String>,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    /// A prompt button was pressed; `data` carries the choice marker
    Choice { callback_id: String, data: String },
    Attachment(Attachment),
    /// Anything else; only advances the cursor
    Other,
}

/// One inbound update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Monotonic update id, drives the poll cursor
    pub id: i64,
    /// Chat the update came from
    pub sender: i64,
    pub body: MessageBody,
    /// Unix seconds, 0 if the endpoint gave none
    pub timestamp: i64,
}

/// One interactive control attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub data: String,
}

/// Outbound-only client for one fixed recipient
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Long-poll for updates with id >= `since`. Returns empty on timeout;
    /// failures are retried internally after the backoff interval.
    async fn fetch_updates(&self, since: Option<i64>, wait: Duration) -> Vec<ChatMessage>;

    /// Id of the newest update still held by the endpoint, if any
    async fn newest_pending(&self) -> Option<i64>;

    async fn send_text(&self, body: &str, markup: Markup) -> Result<Delivery, TransportError>;

    /// Send `body` (markdown) with one control per choice
    async fn send_choice(&self, body: &str, choices: &[Choice]) -> Result<Delivery, TransportError>;

    /// Acknowledge a control press so the client stops its spinner
    async fn acknowledge_choice(&self, callback_id: &str, text: &str) -> Result<(), TransportError>;

    /// Fetch an attachment into `dir`, returning the saved path
    async fn download(&self, attachment: &Attachment, dir: &Path) -> Result<PathBuf, TransportError>;
}

/// Shorten `body` to at most `max_len` characters, keeping both ends
pub fn truncate(body: &str, max_len: usize) -> Cow<'_, str> {
    let len = body.chars().count();
    if len <= max_len {
        return Cow::Borrowed(body);
    }

    let marker_len = ELLIPSIS_MARKER.chars().count();
    if max_len <= marker_len {
        return Cow::Owned(body.chars().take(max_len).collect());
    }

    let available = max_len - marker_len;
    let tail = available / 2;
    let head = available - tail;

    let mut out: String = body.chars().take(head).collect();
    out.push_str(ELLIPSIS_MARKER);
    out.extend(body.chars().skip(len - tail));
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_bodies_unchanged() {
        for body in ["", "hello", "exactly ten"] {
            assert_eq!(truncate(body, 11), body);
            assert!(matches!(truncate(body, 11), Cow::Borrowed(_)));
        }
    }

    #[test]
    fn test_long_body_keeps_both_ends() {
        let body: String = (0..500).map(|i| format!("line {}\n", i)).collect();
        let out = truncate(&body, 200);

        assert!(out.chars().count() <= 200);
        let (head, tail) = out.split_once(ELLIPSIS_MARKER).unwrap();
        assert!(body.starts_with(head));
        assert!(body.ends_with(tail));
        assert!(head.starts_with("line 0"));
        assert!(tail.ends_with("line 499\n"));
        assert!(head.len().abs_diff(tail.len()) <= 1);
    }

    #[test]
    fn test_multibyte_text() {
        let body = "é".repeat(100);
        let out = truncate(&body, 40);
        assert_eq!(out.chars().count(), 40);
        assert!(out.contains(ELLIPSIS_MARKER));
    }

    #[test]
    fn test_tiny_limit_hard_cuts() {
        assert_eq!(truncate("abcdefghijklmnopqrstuvwxyz", 5), "abcde");
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(
            Markup::Html.strip("<b>cd</b> &lt;path&gt; <code>x</code>"),
            "cd <path> x"
        );
        assert_eq!(Markup::Markdown.strip("❓ *Prompt*\n`a_b`"), "❓ Prompt\na_b");
    }

    #[test]
    fn test_transient_errors() {
        assert!(TransportError::Failure("reset".into()).is_transient());
        assert!(TransportError::Api { code: 502, description: "Bad Gateway".into() }.is_transient());
        assert!(!TransportError::Api { code: 403, description: "Forbidden".into() }.is_transient());
        assert!(!TransportError::MarkupRejected("entities".into()).is_transient());
    }
}
