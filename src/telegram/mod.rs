//! Telegram Bot API client module.
//!
//! Provides the outbound facade, the update model, and the abstraction the
//! dispatcher polls updates through.

mod client;
mod extension;
mod rate_limiter;
mod types;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use client::{TelegramBot, TelegramError};
pub use extension::UserClientExtension;
pub use rate_limiter::RateLimiter;
pub use types::{
    ApiResponse, BotCommand, CallbackQuery, Chat, MalformedUpdateError, Message, MessageEntity,
    ParseMode, ResponseParameters, Update, UpdateKind, User,
};

/// Source of raw updates for the dispatcher.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Returns updates with id >= `offset`, in ascending order.
    ///
    /// Blocks up to `timeout` waiting for at least one update.
    async fn fetch_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
        allowed_updates: &[String],
    ) -> Result<Vec<Value>, TelegramError>;
}

#[async_trait]
impl UpdateSource for TelegramBot {
    async fn fetch_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
        allowed_updates: &[String],
    ) -> Result<Vec<Value>, TelegramError> {
        self.get_updates(offset, timeout, allowed_updates).await
    }
}
