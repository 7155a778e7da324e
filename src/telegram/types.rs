//! Bot API wire types, limited to the fields the relay reads or writes.

use serde::{Deserialize, Serialize};

use super::{Attachment, AttachmentKind, ChatMessage, MessageBody};

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    pub timeout: u64,
    pub allowed_updates: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerCallbackQuery {
    pub callback_query_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetFile {
    pub file_id: String,
}

impl Message {
    fn body(self) -> MessageBody {
        let caption = self.caption.clone().unwrap_or_default();

        if let Some(largest) = self.photo.and_then(|sizes| sizes.into_iter().last()) {
            return MessageBody::Attachment(Attachment {
                kind: AttachmentKind::Photo,
                file_id: largest.file_id,
                file_name: None,
                caption,
            });
        }
        if let Some(doc) = self.document {
            return MessageBody::Attachment(Attachment {
                kind: AttachmentKind::Document,
                file_id: doc.file_id,
                file_name: doc.file_name,
                caption,
            });
        }

        match self.text.or(self.caption) {
            Some(text) if !text.is_empty() => MessageBody::Text(text),
            _ => MessageBody::Other,
        }
    }
}

impl From<Update> for ChatMessage {
    fn from(update: Update) -> Self {
        if let Some(query) = update.callback_query {
            let (sender, timestamp) = query
                .message
                .as_ref()
                .map(|m| (m.chat.id, m.date))
                .unwrap_or((0, 0));
            return ChatMessage {
                id: update.update_id,
                sender,
                body: MessageBody::Choice {
                    callback_id: query.id,
                    data: query.data.unwrap_or_default(),
                },
                timestamp,
            };
        }

        match update.message {
            Some(message) => ChatMessage {
                id: update.update_id,
                sender: message.chat.id,
                timestamp: message.date,
                body: message.body(),
            },
            None => ChatMessage {
                id: update.update_id,
                sender: 0,
                body: MessageBody::Other,
                timestamp: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ChatMessage {
        serde_json::from_str::<Update>(json).unwrap().into()
    }

    #[test]
    fn test_text_message() {
        let msg = parse(
            r#"{"update_id": 10, "message": {"message_id": 1, "date": 1700000000,
                "chat": {"id": 42}, "text": "/status"}}"#,
        );
        assert_eq!(msg.id, 10);
        assert_eq!(msg.sender, 42);
        assert_eq!(msg.timestamp, 1700000000);
        assert_eq!(msg.body, MessageBody::Text("/status".into()));
    }

    #[test]
    fn test_photo_uses_largest_size() {
        let msg = parse(
            r#"{"update_id": 11, "message": {"message_id": 2, "date": 0, "chat": {"id": 42},
                "caption": "what is this?",
                "photo": [{"file_id": "small"}, {"file_id": "large"}]}}"#,
        );
        match msg.body {
            MessageBody::Attachment(a) => {
                assert_eq!(a.kind, AttachmentKind::Photo);
                assert_eq!(a.file_id, "large");
                assert_eq!(a.caption, "what is this?");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_callback_query() {
        let msg = parse(
            r#"{"update_id": 12, "callback_query": {"id": "cb1", "data": "choice:2",
                "message": {"message_id": 3, "date": 5, "chat": {"id": 42}}}}"#,
        );
        assert_eq!(msg.sender, 42);
        assert_eq!(
            msg.body,
            MessageBody::Choice {
                callback_id: "cb1".into(),
                data: "choice:2".into()
            }
        );
    }

    #[test]
    fn test_unknown_update_kind() {
        let msg = parse(r#"{"update_id": 13, "edited_message": {"message_id": 4}}"#);
        assert_eq!(msg.id, 13);
        assert_eq!(msg.body, MessageBody::Other);
    }

    #[test]
    fn test_error_envelope() {
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: can't parse entities"}"#,
        )
        .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error_code, Some(400));
        assert!(resp.result.is_none());
    }
}
