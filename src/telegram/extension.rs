//! Optional user-client capability.
//!
//! Some operations (uploading large files, reading chat history) are not
//! available to bots through the HTTP API. An embedding application can
//! inject a client speaking the user protocol; the facade delegates to it.

use std::path::Path;

use async_trait::async_trait;

use super::{Message, TelegramError};

/// Capability offered by an external user client.
#[async_trait]
pub trait UserClientExtension: Send + Sync {
    /// Uploads a local file to a chat.
    async fn send_document(&self, chat_id: i64, path: &Path) -> Result<(), TelegramError>;

    /// Returns up to `limit` most recent messages of a chat.
    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<Message>, TelegramError>;
}
