//! Telegram Command Bot Library
//!
//! A small client for the Telegram Bot HTTP API built around long polling.
//!
//! This crate provides the core functionality for:
//! - Loading bot configuration from the environment
//! - Calling Bot API methods (`sendMessage`, `sendDocument`, ...)
//! - Decoding updates into messages and callback queries
//! - Routing `/command` messages to registered handlers
//! - Polling `getUpdates` with a persistent cursor

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod telegram;
