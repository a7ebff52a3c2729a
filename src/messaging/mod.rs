use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub mod telegram;

pub use telegram::TelegramClient;

use crate::Result;

/// Identifies a message the bot sent and may later edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Outbound side of the chat transport
///
/// Texts use Telegram's HTML subset.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a new message to the chat
    async fn reply(&self, chat_id: i64, text: &str) -> Result<StatusHandle>;

    /// Replace the text of an earlier message; an unchanged text is not an error
    async fn edit(&self, handle: StatusHandle, text: &str) -> Result<()>;

    /// Send a local audio file as an attachment tagged with `title`
    async fn send_audio(&self, chat_id: i64, path: &Path, title: &str) -> Result<()>;
}

/// The single status message a job keeps editing
///
/// Identical consecutive texts are dropped before reaching the transport and
/// failed sends or edits are logged, so status reporting never fails a job.
pub struct StatusMessage {
    messenger: Arc<dyn Messenger>,
    handle: Option<StatusHandle>,
    last_text: String,
}

impl StatusMessage {
    /// Post the initial status text
    ///
    /// When the message cannot be sent, later updates are dropped.
    pub async fn open(messenger: Arc<dyn Messenger>, chat_id: i64, text: &str) -> Self {
        let handle = match messenger.reply(chat_id, text).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Failed to send status message: {:#}", e);
                None
            }
        };

        Self {
            messenger,
            handle,
            last_text: text.to_string(),
        }
    }

    pub fn handle(&self) -> Option<StatusHandle> {
        self.handle
    }

    /// Replace the status text
    pub async fn update(&mut self, text: &str) {
        let Some(handle) = self.handle else {
            return;
        };
        if text == self.last_text {
            return;
        }

        match self.messenger.edit(handle, text).await {
            Ok(()) => self.last_text = text.to_string(),
            Err(e) => tracing::warn!("Failed to update status message: {:#}", e),
        }
    }
}
