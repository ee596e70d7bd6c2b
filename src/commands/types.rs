//! Command token parsing.

use std::fmt;

/// A command extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Leading token including the prefix, e.g. `/start`.
    pub token: String,

    /// Bot username from a `/cmd@BotName` token, if present.
    pub mention: Option<String>,

    /// Remaining whitespace-separated words.
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the text does not start with `prefix` or the
    /// prefix is not followed by a command name.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let first = words.next()?;

        let name = first.strip_prefix(prefix)?;
        let (name, mention) = match name.split_once('@') {
            Some((name, bot)) => (name, Some(bot.to_owned())),
            None => (name, None),
        };

        if name.is_empty() {
            return None;
        }

        Some(Self {
            token: format!("{prefix}{name}"),
            mention,
            args: words.map(str::to_owned).collect(),
        })
    }

    /// True when the command is addressed to no bot in particular or to
    /// `username` (case-insensitive).
    #[must_use]
    pub fn is_addressed_to(&self, username: Option<&str>) -> bool {
        match (&self.mention, username) {
            (None, _) => true,
            (Some(mention), Some(username)) => mention.eq_ignore_ascii_case(username),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/";

    #[test]
    fn test_parse_with_args() {
        let cmd = ParsedCommand::parse("/start hello world", PREFIX).unwrap();
        assert_eq!(cmd.token, "/start");
        assert_eq!(cmd.args, vec!["hello", "world"]);
        assert_eq!(cmd.mention, None);
    }

    #[test]
    fn test_parse_without_args() {
        let cmd = ParsedCommand::parse("/help", PREFIX).unwrap();
        assert_eq!(cmd.token, "/help");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_parse_wrong_prefix() {
        assert_eq!(ParsedCommand::parse("start hello", PREFIX), None);
        assert_eq!(ParsedCommand::parse("!start", PREFIX), None);
        assert_eq!(ParsedCommand::parse("", PREFIX), None);
    }

    #[test]
    fn test_parse_bare_prefix() {
        assert_eq!(ParsedCommand::parse("/", PREFIX), None);
        assert_eq!(ParsedCommand::parse("/@bot", PREFIX), None);
    }

    #[test]
    fn test_parse_with_extra_whitespace() {
        let cmd = ParsedCommand::parse("  /echo   a \n b  ", PREFIX).unwrap();
        assert_eq!(cmd.token, "/echo");
        assert_eq!(cmd.args, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        let cmd = ParsedCommand::parse("/Start", PREFIX).unwrap();
        assert_eq!(cmd.token, "/Start");
    }

    #[test]
    fn test_parse_custom_prefix() {
        let cmd = ParsedCommand::parse("!roll 2d6", "!").unwrap();
        assert_eq!(cmd.token, "!roll");
        assert_eq!(cmd.args, vec!["2d6"]);
        assert_eq!(ParsedCommand::parse("/roll", "!"), None);
    }

    #[test]
    fn test_parse_mention() {
        let cmd = ParsedCommand::parse("/start@MyBot now", PREFIX).unwrap();
        assert_eq!(cmd.token, "/start");
        assert_eq!(cmd.mention.as_deref(), Some("MyBot"));
        assert!(cmd.is_addressed_to(Some("mybot")));
        assert!(!cmd.is_addressed_to(Some("OtherBot")));
        assert!(!cmd.is_addressed_to(None));
    }

    #[test]
    fn test_display() {
        let cmd = ParsedCommand::parse("/echo a b", PREFIX).unwrap();
        assert_eq!(cmd.to_string(), "/echo a b");
    }
}
