//! Example Bot - Main Entry Point
//!
//! A long-polling bot that answers a handful of commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use telegram_command_bot::commands::{
    CallbackContext, CallbackQueryHandler, CommandContext, CommandHandler, CommandRegistry,
    HandlerResult, HelpCommand, StartCommand,
};
use telegram_command_bot::config::{BotConfig, LogLevel};
use telegram_command_bot::dispatcher::{Dispatcher, DispatcherMessage};
use telegram_command_bot::telegram::TelegramBot;

const KANYE_URL: &str = "https://api.kanye.rest";

/// Example Telegram bot answering commands over long polling.
#[derive(Parser, Debug)]
#[command(name = "example_bot")]
#[command(about = "Answer Telegram commands over long polling")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error). Overrides `LOG_LEVEL`.
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// File to keep the last processed update id in. Overrides `STATE_PATH`.
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Verify the access token and exit.
    #[arg(long)]
    check: bool,

    /// Publish the command list with `setMyCommands` before polling.
    #[arg(long)]
    publish_commands: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load environment variables
    let env_loaded = dotenvy::from_filename(&args.env_file);

    let mut config =
        BotConfig::from_env().context("Failed to load bot configuration from environment")?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(path) = args.state_path {
        config.state_path = Some(path);
    }

    init_logging(config.log_level);

    if let Err(e) = env_loaded {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }
    debug!("Loaded configuration: {:?}", config);

    let bot = Arc::new(TelegramBot::new(&config).context("Failed to create bot client")?);

    // Fail fast on a bad token
    let me = bot.verify().await.context("Failed to verify access token")?;

    if args.check {
        println!("✓ Access token is valid for {}", me.display_name());
        return Ok(());
    }

    let help = HelpCommand::new();
    let mut registry = CommandRegistry::new(&config.command_prefix);
    if let Some(username) = &me.username {
        registry = registry.with_bot_username(username);
    }
    registry.register("start", Arc::new(StartCommand::new(help.clone())));
    registry.register("help", Arc::new(help));
    registry.register("echo", Arc::new(EchoCommand));
    registry.register("kanye", Arc::new(KanyeCommand));

    if args.publish_commands {
        let commands = registry.published_commands();
        bot.set_my_commands(&commands)
            .await
            .context("Failed to publish commands")?;
        info!("Published {} commands", commands.len());
    }

    let dispatcher = Dispatcher::new(Arc::clone(&bot), registry, &config)
        .with_callback_handler(Arc::new(AcknowledgeCallback));

    let (dispatcher_tx, dispatcher_rx) = mpsc::channel::<DispatcherMessage>(4);
    let run = dispatcher.run(dispatcher_rx);
    tokio::pin!(run);

    info!("Bot is running. Use Ctrl+C to stop.");

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            let _ = dispatcher_tx.send(DispatcherMessage::Shutdown).await;
            run.await
        }
    };

    let cursor = result.context("Dispatcher stopped with an error")?;
    info!("Stopped after update {:?}", cursor.last_update_id());

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Repeats the arguments back.
struct EchoCommand;

#[async_trait]
impl CommandHandler for EchoCommand {
    async fn execute(&self, ctx: CommandContext) -> HandlerResult {
        let text = if ctx.args.is_empty() {
            format!("Usage: {} <text>", ctx.command)
        } else {
            ctx.args_text()
        };
        ctx.reply(&text).await?;
        Ok(())
    }

    fn description(&self) -> &str {
        "Repeat your text"
    }
}

#[derive(Deserialize)]
struct KanyeQuote {
    quote: String,
}

/// Replies with a random Kanye West quote.
struct KanyeCommand;

impl KanyeCommand {
    async fn fetch_quote(bot: &TelegramBot) -> Result<String> {
        let quote: KanyeQuote = bot
            .http_client()
            .get(KANYE_URL)
            .send()
            .await
            .context("Failed to reach quote service")?
            .error_for_status()
            .context("Quote service returned an error")?
            .json()
            .await
            .context("Failed to parse quote")?;
        Ok(quote.quote)
    }
}

#[async_trait]
impl CommandHandler for KanyeCommand {
    async fn execute(&self, ctx: CommandContext) -> HandlerResult {
        let quote = Self::fetch_quote(&ctx.bot).await?;
        ctx.reply(&format!("\u{201c}{quote}\u{201d} - Kanye West")).await?;
        Ok(())
    }

    fn description(&self) -> &str {
        "Random Kanye West quote"
    }
}

/// Stops the loading spinner on inline keyboard buttons.
struct AcknowledgeCallback;

#[async_trait]
impl CallbackQueryHandler for AcknowledgeCallback {
    async fn handle(&self, ctx: CallbackContext) -> HandlerResult {
        info!(
            "Button pressed by {}: {:?}",
            ctx.query.sender.display_name(),
            ctx.query.data
        );
        ctx.answer(None).await?;
        Ok(())
    }
}
