//! Handler capability traits and their invocation contexts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::telegram::{CallbackQuery, Message, TelegramBot, TelegramError};

/// Failure raised inside a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type returned by every handler.
pub type HandlerResult = Result<(), HandlerError>;

/// Everything a command handler gets when it is invoked.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Outbound facade.
    pub bot: Arc<TelegramBot>,

    /// Message that triggered the command.
    pub message: Message,

    /// Matched command token, e.g. `/start`.
    pub command: String,

    /// Words following the command token.
    pub args: Vec<String>,
}

impl CommandContext {
    /// Sends a text message back to the originating chat.
    pub async fn reply(&self, text: &str) -> Result<Value, TelegramError> {
        self.bot.send_message(self.message.chat_id(), text).await
    }

    /// Arguments joined back with single spaces.
    #[must_use]
    pub fn args_text(&self) -> String {
        self.args.join(" ")
    }
}

/// Context for handlers that see every non-command message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub bot: Arc<TelegramBot>,
    pub message: Message,
}

/// Context for the callback query handler.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    pub bot: Arc<TelegramBot>,
    pub query: CallbackQuery,
}

impl CallbackContext {
    /// Acknowledges the query so the client stops showing a spinner.
    pub async fn answer(&self, text: Option<&str>) -> Result<bool, TelegramError> {
        self.bot.answer_callback_query(&self.query.id, text).await
    }
}

/// A command bound to a token in the [`CommandRegistry`](super::CommandRegistry).
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Runs the command.
    async fn execute(&self, ctx: CommandContext) -> HandlerResult;

    /// One-line description used for `setMyCommands` and help output.
    fn description(&self) -> &str {
        ""
    }
}

/// Runs for every message that is not a command.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: MessageContext) -> HandlerResult;
}

/// Runs for inline keyboard button presses.
#[async_trait]
pub trait CallbackQueryHandler: Send + Sync {
    async fn handle(&self, ctx: CallbackContext) -> HandlerResult;
}

/// Runs once at the start of every polling iteration.
#[async_trait]
pub trait LoopTask: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    async fn run(&self, bot: Arc<TelegramBot>) -> HandlerResult;
}
