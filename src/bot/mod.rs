use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::job::{JobCoordinator, JobOutcome};
use crate::messaging::telegram::IncomingMessage;
use crate::messaging::{Messenger, TelegramClient};
use crate::Result;

/// Pause before polling again after a failed getUpdates
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub const WELCOME_TEXT: &str = "👋 <b>Welcome!</b>\n\n\
    Send me a YouTube link (video, short, or playlist) and I will:\n\
    1️⃣  Download the audio as MP3\n\
    2️⃣  Upload it to cloud storage, or send it right back here\n\n\
    Only YouTube links are accepted.";

pub const HELP_TEXT: &str = "📖 <b>How to use this bot</b>\n\n\
    • Send a YouTube <b>video</b> link → downloads as a single MP3.\n\
    • Send a YouTube <b>playlist</b> link → downloads all tracks and \
    organises them in a storage folder named after the playlist.\n\n\
    <b>Supported URL formats:</b>\n\
    - https://youtube.com/watch?v=...\n\
    - https://youtu.be/...\n\
    - https://youtube.com/shorts/...\n\
    - https://youtube.com/playlist?list=...\n";

/// Chat commands the bot answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Unknown(String),
}

/// Parse a `/command`, with or without an `@botname` suffix
pub fn parse_command(text: &str) -> Option<BotCommand> {
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);

    Some(match name.to_ascii_lowercase().as_str() {
        "start" => BotCommand::Start,
        "help" => BotCommand::Help,
        _ => BotCommand::Unknown(name.to_string()),
    })
}

/// Answer a chat command; unknown commands are ignored
pub async fn respond_to_command(messenger: &dyn Messenger, chat_id: i64, command: &BotCommand) -> Result<()> {
    let text = match command {
        BotCommand::Start => WELCOME_TEXT,
        BotCommand::Help => HELP_TEXT,
        BotCommand::Unknown(name) => {
            tracing::debug!("Ignoring unknown command /{}", name);
            return Ok(());
        }
    };

    messenger.reply(chat_id, text).await?;
    Ok(())
}

/// Long-polls Telegram and hands messages to the job coordinator
pub struct Dispatcher {
    client: Arc<TelegramClient>,
    coordinator: Arc<JobCoordinator>,
}

impl Dispatcher {
    pub fn new(client: Arc<TelegramClient>, coordinator: Arc<JobCoordinator>) -> Self {
        Self { client, coordinator }
    }

    /// Poll until `shutdown` fires, then cancel and wait for in-flight jobs
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let me = self.client.get_me().await?;
        tracing::info!(
            "Bot @{} started, listening for messages",
            me.username.as_deref().unwrap_or("unknown")
        );

        let mut offset = 0;
        let mut jobs = JoinSet::new();

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.client.get_updates(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.dispatch(message, &mut jobs, &shutdown).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Polling failed: {:#}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }

            while let Some(finished) = jobs.try_join_next() {
                log_job_result(finished);
            }
        }

        if !jobs.is_empty() {
            tracing::info!("Waiting for {} job(s) to stop", jobs.len());
        }
        while let Some(finished) = jobs.join_next().await {
            log_job_result(finished);
        }

        tracing::info!("Bot stopped");
        Ok(())
    }

    async fn dispatch(&self, message: IncomingMessage, jobs: &mut JoinSet<JobOutcome>, shutdown: &CancellationToken) {
        let chat_id = message.chat.id;
        let Some(text) = message.text else {
            return;
        };

        if let Some(command) = parse_command(&text) {
            if let Err(e) = respond_to_command(self.client.as_ref(), chat_id, &command).await {
                tracing::warn!("Failed to answer command: {:#}", e);
            }
            return;
        }

        let coordinator = self.coordinator.clone();
        let cancel = shutdown.child_token();
        jobs.spawn(async move { coordinator.handle_text(chat_id, &text, cancel).await });
    }
}

fn log_job_result(result: std::result::Result<JobOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => tracing::debug!("Job finished: {:?}", outcome),
        Err(e) => tracing::error!("Job task failed: {}", e),
    }
}
