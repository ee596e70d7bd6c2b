//! Command registry.
//!
//! Maps invocation tokens to handlers. Registration happens at startup;
//! the polling loop only reads from it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::handler::CommandHandler;
use super::types::ParsedCommand;
use crate::telegram::BotCommand;

/// Holds command handlers keyed by their token.
pub struct CommandRegistry {
    /// Prefix every token starts with.
    prefix: String,

    /// Bot username used to accept `/cmd@BotName` tokens.
    bot_username: Option<String>,

    /// Registered handlers.
    commands: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    /// Creates an empty registry for the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            bot_username: None,
            commands: HashMap::new(),
        }
    }

    /// Sets the bot username accepted in `/cmd@BotName` tokens.
    #[must_use]
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Registers a handler under `name`.
    ///
    /// The prefix is added when `name` does not already carry it. A second
    /// registration of the same token replaces the first.
    pub fn register(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        let token = if name.starts_with(&self.prefix) {
            name.to_owned()
        } else {
            format!("{}{name}", self.prefix)
        };

        if self.commands.insert(token.clone(), handler).is_some() {
            warn!("Command {} registered twice, keeping the latest handler", token);
        } else {
            debug!("Registered command {}", token);
        }
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_command(mut self, name: &str, handler: Arc<dyn CommandHandler>) -> Self {
        self.register(name, handler);
        self
    }

    /// Command prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True if `text` starts like a command, registered or not.
    #[must_use]
    pub fn looks_like_command(&self, text: &str) -> bool {
        ParsedCommand::parse(text, &self.prefix).is_some()
    }

    /// Finds the handler for a message text.
    ///
    /// Returns `None` for plain text, unknown tokens, and commands
    /// addressed to another bot.
    #[must_use]
    pub fn resolve(&self, text: &str) -> Option<(Arc<dyn CommandHandler>, ParsedCommand)> {
        let parsed = ParsedCommand::parse(text, &self.prefix)?;

        if !parsed.is_addressed_to(self.bot_username.as_deref()) {
            debug!("Ignoring {} addressed to another bot", parsed.token);
            return None;
        }

        let handler = self.commands.get(&parsed.token)?;
        Some((Arc::clone(handler), parsed))
    }

    /// Registered tokens, sorted.
    #[must_use]
    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        tokens.sort_unstable();
        tokens
    }

    /// Commands with a description, in `setMyCommands` form.
    #[must_use]
    pub fn published_commands(&self) -> Vec<BotCommand> {
        let mut commands: Vec<BotCommand> = self
            .commands
            .iter()
            .filter(|(_, handler)| !handler.description().is_empty())
            .map(|(token, handler)| {
                let name = token.strip_prefix(&self.prefix).unwrap_or(token);
                BotCommand::new(name, handler.description())
            })
            .collect();
        commands.sort_by(|a, b| a.command.cmp(&b.command));
        commands
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new("/")
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("prefix", &self.prefix)
            .field("bot_username", &self.bot_username)
            .field("commands", &self.tokens())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::commands::handler::{CommandContext, HandlerResult};

    struct Named(&'static str);

    #[async_trait]
    impl CommandHandler for Named {
        async fn execute(&self, _ctx: CommandContext) -> HandlerResult {
            Ok(())
        }

        fn description(&self) -> &str {
            self.0
        }
    }

    fn describe(registry: &CommandRegistry, text: &str) -> Option<String> {
        registry
            .resolve(text)
            .map(|(handler, _)| handler.description().to_owned())
    }

    #[test]
    fn test_register_adds_prefix() {
        let registry = CommandRegistry::default()
            .with_command("start", Arc::new(Named("a")))
            .with_command("/help", Arc::new(Named("b")));
        assert_eq!(registry.tokens(), vec!["/help", "/start"]);
    }

    #[test]
    fn test_resolve_returns_args() {
        let registry = CommandRegistry::default().with_command("/start", Arc::new(Named("a")));
        let (_, parsed) = registry.resolve("/start hello world").unwrap();
        assert_eq!(parsed.args, vec!["hello", "world"]);
    }

    #[test]
    fn test_resolve_unknown_and_plain_text() {
        let registry = CommandRegistry::default().with_command("/start", Arc::new(Named("a")));
        assert!(registry.resolve("/unknown").is_none());
        assert!(registry.resolve("hello there").is_none());
        assert!(registry.resolve("/starter").is_none());
        assert!(registry.looks_like_command("/unknown"));
        assert!(!registry.looks_like_command("hello there"));
    }

    #[test]
    fn test_later_registration_overwrites() {
        let registry = CommandRegistry::default()
            .with_command("/start", Arc::new(Named("first")))
            .with_command("start", Arc::new(Named("second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(describe(&registry, "/start").as_deref(), Some("second"));
    }

    #[test]
    fn test_mentions() {
        let registry = CommandRegistry::default()
            .with_bot_username("MyBot")
            .with_command("/start", Arc::new(Named("a")));
        assert!(registry.resolve("/start@mybot").is_some());
        assert!(registry.resolve("/start@OtherBot").is_none());

        let anonymous = CommandRegistry::default().with_command("/start", Arc::new(Named("a")));
        assert!(anonymous.resolve("/start@MyBot").is_none());
    }

    #[test]
    fn test_published_commands() {
        let registry = CommandRegistry::new("!")
            .with_command("roll", Arc::new(Named("Roll dice")))
            .with_command("hidden", Arc::new(Named("")))
            .with_command("about", Arc::new(Named("About this bot")));

        assert_eq!(
            registry.published_commands(),
            vec![
                BotCommand::new("about", "About this bot"),
                BotCommand::new("roll", "Roll dice"),
            ]
        );
    }
}
