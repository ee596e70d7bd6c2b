//! Bot API object model.
//!
//! Raw update payloads are classified into [`UpdateKind`] and decoded into
//! typed objects. Unknown fields are ignored; missing required fields make
//! the update malformed.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors produced while decoding a raw update.
#[derive(Debug, Error)]
pub enum MalformedUpdateError {
    #[error("Update has no numeric update_id")]
    MissingUpdateId,

    #[error("Update {update_id} has an invalid {kind} payload: {source}")]
    InvalidPayload {
        update_id: i64,
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl MalformedUpdateError {
    /// Returns the update id, when the payload carried one.
    #[must_use]
    pub const fn update_id(&self) -> Option<i64> {
        match self {
            Self::MissingUpdateId => None,
            Self::InvalidPayload { update_id, .. } => Some(*update_id),
        }
    }
}

/// A Telegram user or bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl User {
    /// Returns `"First (@username)"` for log lines.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("{} (@{username})", self.first_name),
            None => self.first_name.clone(),
        }
    }
}

/// A chat a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// `private`, `group`, `supergroup` or `channel`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A special span in message text (command, mention, URL...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

/// An incoming message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "message_id")]
    pub id: i64,

    pub chat: Chat,

    /// Sender; absent for channel posts.
    #[serde(rename = "from", default)]
    pub sender: Option<User>,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,

    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

impl Message {
    /// Chat the message was sent to.
    #[must_use]
    pub const fn chat_id(&self) -> i64 {
        self.chat.id
    }

    /// Sender id, if the message has a sender.
    #[must_use]
    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|u| u.id)
    }

    /// Message text, or an empty string for non-text messages.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// True when Telegram marked the leading entity as a bot command.
    #[must_use]
    pub fn is_bot_command(&self) -> bool {
        self.entities
            .first()
            .is_some_and(|e| e.kind == "bot_command" && e.offset == 0)
    }
}

/// An inline keyboard button press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,

    #[serde(rename = "from")]
    pub sender: User,

    /// Message carrying the pressed button, if still available.
    #[serde(default)]
    pub message: Option<Message>,

    #[serde(default)]
    pub data: Option<String>,

    #[serde(default)]
    pub chat_instance: Option<String>,
}

/// Payload of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    CallbackQuery(CallbackQuery),
    /// Any other update type, identified by its payload key.
    Unsupported(String),
}

/// One unit of incoming data from `getUpdates`.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub id: i64,
    pub kind: UpdateKind,
}

impl Update {
    /// Reads the update id without decoding the payload.
    #[must_use]
    pub fn peek_id(raw: &Value) -> Option<i64> {
        raw.get("update_id").and_then(Value::as_i64)
    }

    /// Decodes a raw `getUpdates` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the update id is missing or the payload lacks
    /// required fields.
    pub fn from_value(raw: &Value) -> Result<Self, MalformedUpdateError> {
        let id = Self::peek_id(raw).ok_or(MalformedUpdateError::MissingUpdateId)?;

        let kind = if let Some(payload) = raw.get("message") {
            UpdateKind::Message(decode(id, "message", payload)?)
        } else if let Some(payload) = raw.get("callback_query") {
            UpdateKind::CallbackQuery(decode(id, "callback_query", payload)?)
        } else {
            let name = raw
                .as_object()
                .and_then(|obj| obj.keys().find(|k| k.as_str() != "update_id").cloned())
                .unwrap_or_else(|| "empty".to_owned());
            UpdateKind::Unsupported(name)
        };

        Ok(Self { id, kind })
    }
}

fn decode<T: DeserializeOwned>(
    update_id: i64,
    kind: &'static str,
    payload: &Value,
) -> Result<T, MalformedUpdateError> {
    T::deserialize(payload).map_err(|source| MalformedUpdateError::InvalidPayload {
        update_id,
        kind,
        source,
    })
}

/// Formatting mode for outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    Markdown,
    MarkdownV2,
}

/// Command entry as used by `getMyCommands` / `setMyCommands`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCommand {
    /// Command name without the leading slash.
    pub command: String,
    pub description: String,
}

impl BotCommand {
    #[must_use]
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

/// Extra information attached to some failed responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// Envelope every Bot API response is wrapped in.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message_update() -> Value {
        json!({
            "update_id": 10,
            "message": {
                "message_id": 7,
                "date": 1_700_000_000,
                "chat": {"id": 42, "type": "private", "username": "alice"},
                "from": {"id": 99, "is_bot": false, "first_name": "Alice", "username": "alice"},
                "text": "/start hello",
                "entities": [{"type": "bot_command", "offset": 0, "length": 6}]
            }
        })
    }

    #[test]
    fn test_parse_message_update() {
        let update = Update::from_value(&message_update()).unwrap();
        assert_eq!(update.id, 10);

        let UpdateKind::Message(msg) = update.kind else {
            panic!("expected a message");
        };
        assert_eq!(msg.id, 7);
        assert_eq!(msg.chat_id(), 42);
        assert_eq!(msg.sender_id(), Some(99));
        assert_eq!(msg.text(), "/start hello");
        assert_eq!(msg.date.timestamp(), 1_700_000_000);
        assert!(msg.is_bot_command());
        assert_eq!(msg.sender.unwrap().display_name(), "Alice (@alice)");
    }

    #[test]
    fn test_parse_callback_query_update() {
        let raw = json!({
            "update_id": 11,
            "callback_query": {
                "id": "4382bfdwdsb323b2d9",
                "from": {"id": 99, "first_name": "Alice"},
                "data": "vote:yes",
                "chat_instance": "-123"
            }
        });

        let update = Update::from_value(&raw).unwrap();
        let UpdateKind::CallbackQuery(query) = update.kind else {
            panic!("expected a callback query");
        };
        assert_eq!(query.id, "4382bfdwdsb323b2d9");
        assert_eq!(query.data.as_deref(), Some("vote:yes"));
        assert!(query.message.is_none());
    }

    #[test]
    fn test_missing_update_id() {
        let err = Update::from_value(&json!({"message": {}})).unwrap_err();
        assert!(matches!(err, MalformedUpdateError::MissingUpdateId));
        assert_eq!(err.update_id(), None);
    }

    #[test]
    fn test_message_without_chat_is_malformed() {
        let raw = json!({
            "update_id": 12,
            "message": {"message_id": 1, "date": 0, "text": "hi"}
        });
        let err = Update::from_value(&raw).unwrap_err();
        assert_eq!(err.update_id(), Some(12));
        assert!(err.to_string().contains("message"));
    }

    #[test]
    fn test_unsupported_update_kind() {
        let raw = json!({"update_id": 13, "poll": {"id": "1"}});
        let update = Update::from_value(&raw).unwrap();
        assert_eq!(update.kind, UpdateKind::Unsupported("poll".to_owned()));
    }

    #[test]
    fn test_plain_text_is_not_bot_command() {
        let mut raw = message_update();
        raw["message"]["text"] = json!("just chatting");
        raw["message"]["entities"] = json!([]);

        let UpdateKind::Message(msg) = Update::from_value(&raw).unwrap().kind else {
            panic!("expected a message");
        };
        assert!(!msg.is_bot_command());
    }

    #[test]
    fn test_parse_mode_serialization() {
        assert_eq!(serde_json::to_value(ParseMode::Html).unwrap(), json!("HTML"));
        assert_eq!(serde_json::to_value(ParseMode::MarkdownV2).unwrap(), json!("MarkdownV2"));
    }
}
