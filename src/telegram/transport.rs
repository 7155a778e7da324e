use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::types::{AnswerCallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, SendMessage};
use super::{
    Attachment, AttachmentKind, BotApi, ChatMessage, ChatTransport, Choice, Delivery, Markup,
    TransportError,
};

/// Attempts per outbound request before giving up on transient failures
const SEND_ATTEMPTS: usize = 3;

/// Telegram delivery policy over a raw [`BotApi`]: retries with backoff,
/// markup fallback, and the fixed recipient.
pub struct TelegramTransport<A> {
    api: A,
    chat_id: i64,
    backoff: Duration,
}

impl<A: BotApi> TelegramTransport<A> {
    pub fn new(api: A, chat_id: i64, backoff: Duration) -> Self {
        Self {
            api,
            chat_id,
            backoff,
        }
    }

    async fn send_with_retry(&self, request: &SendMessage) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            match self.api.send_message(request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < SEND_ATTEMPTS => {
                    warn!("sendMessage attempt {} failed: {}", attempt, e);
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send with markup; on a markup rejection resend once as plain text
    async fn deliver(&self, mut request: SendMessage, markup: Markup) -> Result<Delivery, TransportError> {
        match self.send_with_retry(&request).await {
            Ok(()) => Ok(Delivery::Sent),
            Err(TransportError::MarkupRejected(reason)) if request.parse_mode.is_some() => {
                warn!("Markup rejected, resending as plain text: {}", reason);
                request.parse_mode = None;
                request.text = markup.strip(&request.text);
                self.send_with_retry(&request).await?;
                Ok(Delivery::Degraded)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<A: BotApi> ChatTransport for TelegramTransport<A> {
    async fn fetch_updates(&self, since: Option<i64>, wait: Duration) -> Vec<ChatMessage> {
        loop {
            match self.api.get_updates(since, wait).await {
                Ok(updates) => return updates.into_iter().map(ChatMessage::from).collect(),
                Err(e) => {
                    warn!("Polling error: {}", e);
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    async fn newest_pending(&self) -> Option<i64> {
        match self.api.get_updates(Some(-1), Duration::ZERO).await {
            Ok(updates) => updates.last().map(|u| u.update_id),
            Err(e) => {
                warn!("Could not read pending updates: {}", e);
                None
            }
        }
    }

    async fn send_text(&self, body: &str, markup: Markup) -> Result<Delivery, TransportError> {
        let request = SendMessage {
            chat_id: self.chat_id,
            text: body.to_string(),
            parse_mode: markup.parse_mode(),
            reply_markup: None,
        };
        self.deliver(request, markup).await
    }

    async fn send_choice(&self, body: &str, choices: &[Choice]) -> Result<Delivery, TransportError> {
        let keyboard = InlineKeyboardMarkup {
            inline_keyboard: choices
                .iter()
                .map(|choice| {
                    vec![InlineKeyboardButton {
                        text: choice.label.clone(),
                        callback_data: choice.data.clone(),
                    }]
                })
                .collect(),
        };
        let request = SendMessage {
            chat_id: self.chat_id,
            text: body.to_string(),
            parse_mode: Markup::Markdown.parse_mode(),
            reply_markup: Some(keyboard),
        };
        self.deliver(request, Markup::Markdown).await
    }

    async fn acknowledge_choice(&self, callback_id: &str, text: &str) -> Result<(), TransportError> {
        let request = AnswerCallbackQuery {
            callback_query_id: callback_id.to_string(),
            text: text.to_string(),
        };
        self.api.answer_callback_query(&request).await
    }

    async fn download(&self, attachment: &Attachment, dir: &Path) -> Result<PathBuf, TransportError> {
        let remote_path = self.api.get_file(&attachment.file_id).await?;
        let bytes = self.api.download_file(&remote_path).await?;

        tokio::fs::create_dir_all(dir).await?;
        let local_path = dir.join(local_file_name(attachment, &remote_path));
        tokio::fs::write(&local_path, bytes).await?;
        debug!("Downloaded {} to {}", attachment.file_id, local_path.display());
        Ok(local_path)
    }
}

/// Name for a downloaded attachment; never escapes the download directory
fn local_file_name(attachment: &Attachment, remote_path: &str) -> String {
    match attachment.kind {
        AttachmentKind::Photo => {
            let ext = Path::new(remote_path)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_else(|| ".jpg".to_string());
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let id = &attachment.file_id;
            let suffix = id.get(id.len().saturating_sub(6)..).unwrap_or(id);
            format!("photo_{}_{}{}", stamp, suffix, ext)
        }
        AttachmentKind::Document => attachment
            .file_name
            .as_deref()
            .and_then(|name| Path::new(name).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::types::Update;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted Bot API that records every request
    #[derive(Default)]
    struct ScriptedApi {
        send_results: Mutex<VecDeque<Result<(), TransportError>>>,
        sent: Mutex<Vec<SendMessage>>,
        updates: Mutex<VecDeque<Result<Vec<Update>, TransportError>>>,
        offsets: Mutex<Vec<Option<i64>>>,
    }

    impl ScriptedApi {
        fn with_send_results(results: Vec<Result<(), TransportError>>) -> Self {
            Self {
                send_results: Mutex::new(results.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BotApi for ScriptedApi {
        async fn get_updates(
            &self,
            offset: Option<i64>,
            _wait: Duration,
        ) -> Result<Vec<Update>, TransportError> {
            self.offsets.lock().unwrap().push(offset);
            self.updates
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn send_message(&self, request: &SendMessage) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            self.send_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn answer_callback_query(&self, _request: &AnswerCallbackQuery) -> Result<(), TransportError> {
            Ok(())
        }

        async fn get_file(&self, file_id: &str) -> Result<String, TransportError> {
            Ok(format!("photos/{}.png", file_id))
        }

        async fn download_file(&self, _file_path: &str) -> Result<Vec<u8>, TransportError> {
            Ok(b"PNG".to_vec())
        }
    }

    fn transport(api: ScriptedApi) -> TelegramTransport<ScriptedApi> {
        TelegramTransport::new(api, 42, Duration::ZERO)
    }

    fn update(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_plain_send() {
        let t = transport(ScriptedApi::default());
        assert_eq!(t.send_text("hi", Markup::Plain).await.unwrap(), Delivery::Sent);

        let sent = t.api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 42);
        assert!(sent[0].parse_mode.is_none());
    }

    #[tokio::test]
    async fn test_markup_rejection_retries_once_as_plain() {
        let t = transport(ScriptedApi::with_send_results(vec![Err(
            TransportError::MarkupRejected("can't parse entities".into()),
        )]));

        let result = t.send_text("*Done* with `x_y`", Markup::Markdown).await;
        assert_eq!(result.unwrap(), Delivery::Degraded);

        let sent = t.api.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].parse_mode, Some("Markdown"));
        assert_eq!(sent[1].parse_mode, None);
        assert_eq!(sent[1].text, "Done with x_y");
    }

    #[tokio::test]
    async fn test_network_failure_is_retried_not_downgraded() {
        let t = transport(ScriptedApi::with_send_results(vec![
            Err(TransportError::Failure("connection reset".into())),
            Err(TransportError::Failure("connection reset".into())),
        ]));

        assert_eq!(t.send_text("<b>hi</b>", Markup::Html).await.unwrap(), Delivery::Sent);

        let sent = t.api.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|r| r.parse_mode == Some("HTML")));
    }

    #[tokio::test]
    async fn test_persistent_failure_gives_up() {
        let t = transport(ScriptedApi::with_send_results(
            (0..SEND_ATTEMPTS)
                .map(|_| Err(TransportError::Failure("down".into())))
                .collect(),
        ));

        assert!(t.send_text("hi", Markup::Plain).await.is_err());
        assert_eq!(t.api.sent.lock().unwrap().len(), SEND_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_choice_keyboard_has_one_row_per_option() {
        let t = transport(ScriptedApi::default());
        let choices = vec![
            Choice { label: "✅ Yes".into(), data: "choice:1".into() },
            Choice { label: "🔄 No".into(), data: "choice:2".into() },
        ];
        t.send_choice("❓ *Prompt*", &choices).await.unwrap();

        let sent = t.api.sent.lock().unwrap();
        let keyboard = sent[0].reply_markup.as_ref().unwrap();
        assert_eq!(keyboard.inline_keyboard.len(), 2);
        assert_eq!(keyboard.inline_keyboard[1][0].callback_data, "choice:2");
    }

    #[tokio::test]
    async fn test_fetch_retries_after_failure() {
        let api = ScriptedApi::default();
        api.updates.lock().unwrap().extend([
            Err(TransportError::Failure("timeout".into())),
            Ok(vec![update(
                r#"{"update_id": 7, "message": {"date": 1, "chat": {"id": 42}, "text": "hi"}}"#,
            )]),
        ]);
        let t = transport(api);

        let messages = t.fetch_updates(Some(7), Duration::from_secs(5)).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 7);
        assert_eq!(*t.api.offsets.lock().unwrap(), vec![Some(7), Some(7)]);
    }

    #[tokio::test]
    async fn test_newest_pending() {
        let api = ScriptedApi::default();
        api.updates.lock().unwrap().push_back(Ok(vec![update(r#"{"update_id": 31}"#)]));
        let t = transport(api);

        assert_eq!(t.newest_pending().await, Some(31));
        assert_eq!(t.newest_pending().await, None);
        assert_eq!(t.api.offsets.lock().unwrap()[0], Some(-1));
    }

    #[tokio::test]
    async fn test_download_writes_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(ScriptedApi::default());
        let attachment = Attachment {
            kind: AttachmentKind::Document,
            file_id: "doc1".into(),
            file_name: Some("../../etc/report.pdf".into()),
            caption: String::new(),
        };

        let path = t.download(&attachment, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("report.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PNG");
    }

    #[test]
    fn test_photo_file_name() {
        let attachment = Attachment {
            kind: AttachmentKind::Photo,
            file_id: "AgACAgQAAxkBAAIBabcdef".into(),
            file_name: None,
            caption: String::new(),
        };
        let name = local_file_name(&attachment, "photos/file_3.png");
        assert!(name.starts_with("photo_"));
        assert!(name.ends_with("_abcdef.png"));
    }
}
