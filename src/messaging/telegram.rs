use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

use super::{Messenger, StatusHandle};
use crate::extractors::AUDIO_MIME_TYPE;
use crate::{RelayError, Result};

/// Plain API calls should answer quickly
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Audio uploads can take a while on slow links
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub username: Option<String>,
}

/// Telegram Bot API client over HTTPS
pub struct TelegramClient {
    client: Client,
    endpoint: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(api_base: &str, bot_token: &str, poll_timeout_secs: u64) -> Result<Self> {
        if bot_token.trim().is_empty() {
            return Err(RelayError::Config("telegram.bot_token is not set".into()).into());
        }

        let client = Client::builder()
            .user_agent(concat!("audio-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), bot_token.trim()),
            poll_timeout_secs,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    /// Decode a Bot API response, turning `ok: false` into an error
    async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Invalid {} response (HTTP {})", method, status))?;

        if !body.ok {
            let description = body.description.unwrap_or_else(|| format!("HTTP {}", status));
            return Err(RelayError::Messaging(format!("{}: {}", method, description)).into());
        }

        body.result
            .ok_or_else(|| RelayError::Messaging(format!("{}: empty result", method)).into())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: serde_json::Value, timeout: Duration) -> Result<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", method))?;

        Self::decode(method, response).await
    }

    /// Check the token and return the bot's own account
    pub async fn get_me(&self) -> Result<BotUser> {
        self.call("getMe", json!({}), REQUEST_TIMEOUT).await
    }

    /// Long-poll for updates newer than `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        let timeout = Duration::from_secs(self.poll_timeout_secs) + REQUEST_TIMEOUT;

        self.call("getUpdates", payload, timeout).await
    }
}

/// Telegram refuses edits that would not change the message
fn is_not_modified(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<RelayError>()
        .is_some_and(|e| matches!(e, RelayError::Messaging(message) if message.contains("message is not modified")))
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn reply(&self, chat_id: i64, text: &str) -> Result<StatusHandle> {
        let sent: IncomingMessage = self
            .call(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": text, "parse_mode": "HTML" }),
                REQUEST_TIMEOUT,
            )
            .await?;

        Ok(StatusHandle {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    async fn edit(&self, handle: StatusHandle, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.call::<serde_json::Value>("editMessageText", payload, REQUEST_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn send_audio(&self, chat_id: i64, path: &Path, title: &str) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.mp3", title));

        let audio = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(AUDIO_MIME_TYPE)
            .context("Invalid audio MIME type")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("title", title.to_string())
            .part("audio", audio);

        let response = self
            .client
            .post(self.method_url("sendAudio"))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .context("Failed to call sendAudio")?;

        Self::decode::<IncomingMessage>("sendAudio", response).await?;
        Ok(())
    }
}
