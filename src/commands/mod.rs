//! Command handling module.
//!
//! Parses command tokens out of message text, keeps the token-to-handler
//! registry, and defines the handler capability traits.

mod builtin;
mod handler;
mod registry;
mod types;

pub use builtin::{HelpCommand, StartCommand};
pub use handler::{
    CallbackContext, CallbackQueryHandler, CommandContext, CommandHandler, HandlerError,
    HandlerResult, LoopTask, MessageContext, MessageHandler,
};
pub use registry::CommandRegistry;
pub use types::ParsedCommand;
