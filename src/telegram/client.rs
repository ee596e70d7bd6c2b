//! Bot API facade.
//!
//! Every outbound operation is a single HTTP call to
//! `<api_url>/bot<token>/<method>`. There are no retries here; callers
//! decide what to do with a [`TelegramError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{ApiResponse, BotCommand, Message, ParseMode, User};
use super::UserClientExtension;
use crate::config::{BotConfig, ConfigError, mask_token, validate_token};

/// Extra time granted to a long-poll request on top of its server-side timeout.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

/// Errors that can occur during Bot API calls.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Access token rejected by Telegram")]
    Unauthorized,

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u64),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    /// Network or HTTP failure. The request URL is stripped, since it
    /// carries the access token.
    #[error("Transport error: {0}")]
    Transport(reqwest::Error),

    #[error("Unexpected response from {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.without_url())
    }
}

impl TelegramError {
    /// True for failures worth polling again after a pause.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::FloodWait(_) | Self::Decode { .. } => true,
            Self::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct GetUpdatesParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'a [String],
}

#[derive(Serialize)]
struct SendMessageParams<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
}

/// Outbound side of the bot.
///
/// New operations can be layered on top of [`TelegramBot::call`] and
/// [`TelegramBot::call_multipart`] without touching the polling loop.
pub struct TelegramBot {
    /// Shared HTTP client.
    http: reqwest::Client,

    /// API base URL without trailing slash.
    api_url: String,

    /// Bot access token.
    token: String,

    /// Injected user client for operations the Bot API lacks.
    extension: Option<Arc<dyn UserClientExtension>>,
}

impl TelegramBot {
    /// Creates the facade. Performs no network I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed or the HTTP client
    /// cannot be built.
    pub fn new(config: &BotConfig) -> Result<Self, TelegramError> {
        validate_token(&config.access_token)?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            token: config.access_token.clone(),
            extension: None,
        })
    }

    /// Attaches a user-client extension.
    #[must_use]
    pub fn with_extension(mut self, extension: Arc<dyn UserClientExtension>) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Returns the underlying HTTP client for handlers that call other services.
    #[must_use]
    pub const fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Full URL of a Bot API method.
    #[must_use]
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.token)
    }

    /// Calls a Bot API method with a JSON body and decodes its `result`.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TelegramError>
    where
        P: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.call_json(method, params, None).await
    }

    /// Calls a Bot API method with a multipart body and decodes its `result`.
    pub async fn call_multipart<R>(&self, method: &str, form: Form) -> Result<R, TelegramError>
    where
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;
        decode_response(method, response).await
    }

    async fn call_json<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<R, TelegramError>
    where
        P: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.http.post(self.method_url(method)).json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        decode_response(method, response).await
    }

    /// Returns the bot's own user object.
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &json!({})).await
    }

    /// Checks the token against Telegram.
    ///
    /// Meant to run once before polling starts; an
    /// [`TelegramError::Unauthorized`] here is fatal.
    pub async fn verify(&self) -> Result<User, TelegramError> {
        match self.get_me().await {
            Ok(me) => {
                info!("Authorized as {} (id {})", me.display_name(), me.id);
                Ok(me)
            }
            Err(e) => {
                warn!("Token check failed for {}: {}", mask_token(&self.token), e);
                Err(e)
            }
        }
    }

    /// Long-polls for updates with id >= `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
        allowed_updates: &[String],
    ) -> Result<Vec<Value>, TelegramError> {
        let params = GetUpdatesParams {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates,
        };
        self.call_json("getUpdates", &params, Some(timeout + LONG_POLL_GRACE))
            .await
    }

    /// Sends a plain text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Value, TelegramError> {
        self.send_message_with(chat_id, text, None).await
    }

    /// Sends a text message with an optional formatting mode.
    pub async fn send_message_with(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<Value, TelegramError> {
        debug!(chat_id, "Sending message \"{}\"", truncate_for_log(text, 40));

        let params = SendMessageParams {
            chat_id,
            text,
            parse_mode,
        };
        self.call("sendMessage", &params).await
    }

    /// Uploads a local file as a document.
    ///
    /// Goes through the user-client extension when one is attached, in which
    /// case the returned value is `null`.
    pub async fn send_document(&self, chat_id: i64, path: &Path) -> Result<Value, TelegramError> {
        if let Some(extension) = &self.extension {
            debug!(chat_id, "Sending document {} via extension", path.display());
            extension.send_document(chat_id, path).await?;
            return Ok(Value::Null);
        }

        debug!(chat_id, "Uploading document {}", path.display());

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| TelegramError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map_or_else(|| "document".to_owned(), |n| n.to_string_lossy().into_owned());

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", Part::bytes(bytes).file_name(file_name));

        self.call_multipart("sendDocument", form).await
    }

    /// Deletes a message.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<bool, TelegramError> {
        self.call(
            "deleteMessage",
            &json!({"chat_id": chat_id, "message_id": message_id}),
        )
        .await
    }

    /// Acknowledges a callback query, optionally showing a notification.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<bool, TelegramError> {
        let mut params = json!({"callback_query_id": callback_query_id});
        if let Some(text) = text {
            params["text"] = Value::from(text);
        }
        self.call("answerCallbackQuery", &params).await
    }

    /// Returns the command list shown in Telegram clients.
    pub async fn get_my_commands(&self) -> Result<Vec<BotCommand>, TelegramError> {
        self.call("getMyCommands", &json!({})).await
    }

    /// Replaces the command list shown in Telegram clients.
    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<bool, TelegramError> {
        self.call("setMyCommands", &json!({"commands": commands}))
            .await
    }

    /// Reads recent chat history through the user-client extension.
    pub async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<Message>, TelegramError> {
        match &self.extension {
            Some(extension) => extension.get_history(chat_id, limit).await,
            None => Err(TelegramError::Unsupported(
                "get_history requires a user client extension",
            )),
        }
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("api_url", &self.api_url)
            .field("token", &mask_token(&self.token))
            .field("has_extension", &self.extension.is_some())
            .finish_non_exhaustive()
    }
}

/// Unwraps the response envelope.
async fn decode_response<R: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<R, TelegramError> {
    let status = response.status();
    let body = response.bytes().await?;

    let envelope: ApiResponse<R> = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(source) => {
            if status == StatusCode::UNAUTHORIZED {
                return Err(TelegramError::Unauthorized);
            }
            if !status.is_success() {
                return Err(TelegramError::Api {
                    code: i64::from(status.as_u16()),
                    description: status.canonical_reason().unwrap_or("unknown").to_owned(),
                });
            }
            return Err(TelegramError::Decode {
                method: method.to_owned(),
                source,
            });
        }
    };

    if envelope.ok {
        return envelope.result.ok_or_else(|| TelegramError::Api {
            code: i64::from(status.as_u16()),
            description: format!("{method} returned no result"),
        });
    }

    let code = envelope
        .error_code
        .unwrap_or_else(|| i64::from(status.as_u16()));

    match code {
        401 => Err(TelegramError::Unauthorized),
        429 => {
            let retry_after = envelope
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            Err(TelegramError::FloodWait(retry_after))
        }
        _ => Err(TelegramError::Api {
            code,
            description: envelope.description.unwrap_or_default(),
        }),
    }
}

/// Truncates a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
