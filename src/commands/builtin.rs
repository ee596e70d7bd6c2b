//! Commands most bots want out of the box.

use async_trait::async_trait;
use tracing::warn;

use super::handler::{CommandContext, CommandHandler, HandlerResult};
use crate::telegram::BotCommand;

/// Lists available commands.
///
/// Shows `extra` first, followed by the list Telegram has on record
/// (`getMyCommands`).
#[derive(Debug, Clone, Default)]
pub struct HelpCommand {
    extra: Vec<BotCommand>,
}

impl HelpCommand {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds commands that are not published through `setMyCommands`.
    #[must_use]
    pub fn with_extra(mut self, extra: Vec<BotCommand>) -> Self {
        self.extra = extra;
        self
    }

    async fn render(&self, ctx: &CommandContext) -> String {
        let mut commands = self.extra.clone();

        match ctx.bot.get_my_commands().await {
            Ok(published) => commands.extend(published),
            Err(e) => warn!("Could not fetch command list: {}", e),
        }

        if commands.is_empty() {
            return "No commands available.".to_owned();
        }

        commands
            .iter()
            .map(|c| format!("/{} {}", c.command, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn execute(&self, ctx: CommandContext) -> HandlerResult {
        let text = self.render(&ctx).await;
        ctx.reply(&text).await?;
        Ok(())
    }

    fn description(&self) -> &str {
        "Show available commands"
    }
}

/// Greets the sender, then shows help.
#[derive(Debug, Clone, Default)]
pub struct StartCommand {
    help: HelpCommand,
}

impl StartCommand {
    #[must_use]
    pub fn new(help: HelpCommand) -> Self {
        Self { help }
    }
}

#[async_trait]
impl CommandHandler for StartCommand {
    async fn execute(&self, ctx: CommandContext) -> HandlerResult {
        let greeting = ctx
            .message
            .sender
            .as_ref()
            .map_or_else(|| "Hello".to_owned(), |u| format!("Hello {}", u.first_name));
        ctx.reply(&greeting).await?;

        self.help.execute(ctx).await
    }

    fn description(&self) -> &str {
        "Start talking to the bot"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::config::BotConfig;
    use crate::telegram::{Chat, Message, TelegramBot, User};

    const TOKEN: &str = "123456:TEST-token_abc";

    fn context(server: &mockito::ServerGuard, command: &str) -> CommandContext {
        let mut config = BotConfig::new(TOKEN).unwrap();
        config.api_url = server.url();

        CommandContext {
            bot: Arc::new(TelegramBot::new(&config).unwrap()),
            message: Message {
                id: 1,
                chat: Chat {
                    id: 42,
                    kind: "private".to_owned(),
                    title: None,
                    username: None,
                },
                sender: Some(User {
                    id: 99,
                    is_bot: false,
                    first_name: "Alice".to_owned(),
                    last_name: None,
                    username: None,
                    language_code: None,
                }),
                text: Some(command.to_owned()),
                date: Utc::now(),
                entities: Vec::new(),
            },
            command: command.to_owned(),
            args: Vec::new(),
        }
    }

    fn ok_message() -> &'static str {
        r#"{"ok":true,"result":{"message_id":2}}"#
    }

    #[tokio::test]
    async fn test_help_lists_extra_and_published() {
        let mut server = mockito::Server::new_async().await;
        let _commands = server
            .mock("POST", format!("/bot{TOKEN}/getMyCommands").as_str())
            .with_body(r#"{"ok":true,"result":[{"command":"echo","description":"Repeat text"}]}"#)
            .create_async()
            .await;
        let reply = server
            .mock("POST", format!("/bot{TOKEN}/sendMessage").as_str())
            .match_body(Matcher::PartialJson(json!({
                "chat_id": 42,
                "text": "/about Who we are\n/echo Repeat text"
            })))
            .with_body(ok_message())
            .create_async()
            .await;

        let help = HelpCommand::new().with_extra(vec![BotCommand::new("about", "Who we are")]);
        help.execute(context(&server, "/help")).await.unwrap();

        reply.assert_async().await;
    }

    #[tokio::test]
    async fn test_help_without_commands() {
        let mut server = mockito::Server::new_async().await;
        let _commands = server
            .mock("POST", format!("/bot{TOKEN}/getMyCommands").as_str())
            .with_body(r#"{"ok":true,"result":[]}"#)
            .create_async()
            .await;
        let reply = server
            .mock("POST", format!("/bot{TOKEN}/sendMessage").as_str())
            .match_body(Matcher::PartialJson(json!({"text": "No commands available."})))
            .with_body(ok_message())
            .create_async()
            .await;

        HelpCommand::new()
            .execute(context(&server, "/help"))
            .await
            .unwrap();

        reply.assert_async().await;
    }

    #[tokio::test]
    async fn test_start_greets_then_helps() {
        let mut server = mockito::Server::new_async().await;
        let _commands = server
            .mock("POST", format!("/bot{TOKEN}/getMyCommands").as_str())
            .with_body(r#"{"ok":true,"result":[{"command":"start","description":"Say hi"}]}"#)
            .create_async()
            .await;
        let greeting = server
            .mock("POST", format!("/bot{TOKEN}/sendMessage").as_str())
            .match_body(Matcher::PartialJson(json!({"text": "Hello Alice"})))
            .with_body(ok_message())
            .create_async()
            .await;
        let help = server
            .mock("POST", format!("/bot{TOKEN}/sendMessage").as_str())
            .match_body(Matcher::PartialJson(json!({"text": "/start Say hi"})))
            .with_body(ok_message())
            .create_async()
            .await;

        StartCommand::default()
            .execute(context(&server, "/start"))
            .await
            .unwrap();

        greeting.assert_async().await;
        help.assert_async().await;
    }
}
