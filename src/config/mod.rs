//! Configuration module for the bot.
//!
//! Handles loading and validation of the access token, API endpoint,
//! polling parameters, and logging verbosity.

mod settings;

pub use settings::{BotConfig, ConfigError, DEFAULT_API_URL, LogLevel, mask_token, validate_token};
