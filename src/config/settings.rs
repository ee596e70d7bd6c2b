//! Bot settings loaded from the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Logging verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as an `EnvFilter` directive.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" | "success" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "critical" => Ok(Self::Error),
            _ => Err(ConfigError::InvalidValue {
                key: "LOG_LEVEL",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Configuration of the bot facade and its polling loop.
#[derive(Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot access token issued by `@BotFather`.
    pub access_token: String,

    /// Base URL of the Bot API, without the `/bot<token>` suffix.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Minimum spacing between two `getUpdates` calls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delay before polling again after a transport failure.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Prefix that marks a message as a command.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Update kinds requested from `getUpdates`.
    #[serde(default = "default_allowed_updates")]
    pub allowed_updates: Vec<String>,

    /// File holding the last processed update id, if any.
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// Log level for the application.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Run handlers as independent tasks instead of one after another.
    #[serde(default)]
    pub concurrent_handlers: bool,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_owned()
}

const fn default_poll_timeout() -> u64 {
    30
}

const fn default_poll_interval() -> u64 {
    500
}

const fn default_retry_delay() -> u64 {
    5
}

fn default_command_prefix() -> String {
    "/".to_owned()
}

fn default_allowed_updates() -> Vec<String> {
    vec!["message".to_owned(), "callback_query".to_owned()]
}

impl BotConfig {
    /// Creates a configuration with default settings for the given token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed.
    pub fn new(access_token: impl Into<String>) -> Result<Self, ConfigError> {
        let access_token = access_token.into();
        validate_token(&access_token)?;

        Ok(Self {
            access_token,
            api_url: default_api_url(),
            poll_timeout_secs: default_poll_timeout(),
            poll_interval_ms: default_poll_interval(),
            retry_delay_secs: default_retry_delay(),
            command_prefix: default_command_prefix(),
            allowed_updates: default_allowed_updates(),
            state_path: None,
            log_level: LogLevel::default(),
            concurrent_handlers: false,
        })
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TELEGRAM_BOT_TOKEN` (or `BOT_TOKEN`) to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or a value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("TELEGRAM_BOT_TOKEN")
            .or_else(|| lookup("BOT_TOKEN"))
            .ok_or(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN"))?;

        let mut config = Self::new(token.trim())?;

        if let Some(url) = lookup("TELEGRAM_API_URL") {
            config.api_url = url.trim_end_matches('/').to_owned();
        }
        if let Some(value) = lookup("POLL_TIMEOUT_SECS") {
            config.poll_timeout_secs = parse_number("POLL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_number("POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("RETRY_DELAY_SECS") {
            config.retry_delay_secs = parse_number("RETRY_DELAY_SECS", &value)?;
        }
        if let Some(prefix) = lookup("COMMAND_PREFIX").filter(|p| !p.trim().is_empty()) {
            config.command_prefix = prefix.trim().to_owned();
        }
        if let Some(list) = lookup("ALLOWED_UPDATES") {
            config.allowed_updates = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        config.state_path = lookup("STATE_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level.parse()?;
        }
        if let Some(value) = lookup("CONCURRENT_HANDLERS") {
            config.concurrent_handlers = parse_bool("CONCURRENT_HANDLERS", &value)?;
        }

        Ok(config)
    }

    /// Long-poll timeout as a [`Duration`].
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Poll spacing as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Transport failure back-off as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("access_token", &mask_token(&self.access_token))
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("command_prefix", &self.command_prefix)
            .field("state_path", &self.state_path)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

/// Checks the `<bot id>:<secret>` shape of an access token.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidToken`] if the token is malformed.
pub fn validate_token(token: &str) -> Result<(), ConfigError> {
    let Some((bot_id, secret)) = token.split_once(':') else {
        return Err(ConfigError::InvalidToken("missing ':' separator"));
    };

    if bot_id.is_empty() || !bot_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidToken("bot id must be numeric"));
    }

    if secret.is_empty()
        || !secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::InvalidToken("secret part is empty or contains invalid characters"));
    }

    Ok(())
}

/// Masks a token for logging (keeps only the bot id).
#[must_use]
pub fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((bot_id, _)) if !bot_id.is_empty() => format!("{bot_id}:***"),
        _ => "***".to_owned(),
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid access token: {0}")]
    InvalidToken(&'static str),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const TOKEN: &str = "123456:TEST-token_abc";

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_settings() {
        let config = BotConfig::new(TOKEN).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.command_prefix, "/");
        assert_eq!(config.poll_timeout(), Duration::from_secs(30));
        assert_eq!(config.allowed_updates, vec!["message", "callback_query"]);
        assert!(config.state_path.is_none());
        assert!(!config.concurrent_handlers);
    }

    #[test]
    fn test_from_lookup_missing_token() {
        let err = BotConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn test_from_lookup_falls_back_to_bot_token() {
        let config = BotConfig::from_lookup(lookup_from(&[("BOT_TOKEN", TOKEN)])).unwrap();
        assert_eq!(config.access_token, TOKEN);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = BotConfig::from_lookup(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", TOKEN),
            ("TELEGRAM_API_URL", "http://localhost:8081/"),
            ("POLL_TIMEOUT_SECS", "5"),
            ("COMMAND_PREFIX", "!"),
            ("ALLOWED_UPDATES", "message, edited_message"),
            ("STATE_PATH", "cursor.json"),
            ("LOG_LEVEL", "WARNING"),
            ("CONCURRENT_HANDLERS", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "http://localhost:8081");
        assert_eq!(config.poll_timeout_secs, 5);
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.allowed_updates, vec!["message", "edited_message"]);
        assert_eq!(config.state_path, Some(PathBuf::from("cursor.json")));
        assert_eq!(config.log_level, LogLevel::Warn);
        assert!(config.concurrent_handlers);
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let err = BotConfig::from_lookup(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", TOKEN),
            ("POLL_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "POLL_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_token() {
        assert!(validate_token(TOKEN).is_ok());
        assert!(validate_token("no-separator").is_err());
        assert!(validate_token("abc:secret").is_err());
        assert!(validate_token("123:").is_err());
        assert!(validate_token("123:has space").is_err());
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token(TOKEN), "123456:***");
        assert_eq!(mask_token("garbage"), "***");
        assert!(!format!("{:?}", BotConfig::new(TOKEN).unwrap()).contains("TEST-token_abc"));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("critical".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("success".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
