use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "audio-relay",
    about = "Audio Relay - a Telegram bot that turns YouTube links into MP3 files",
    version,
    long_about = "Send a YouTube video, short or playlist link to the bot and it downloads the audio as MP3 with yt-dlp, \
                  cleans up the file names and uploads the result to S3-compatible storage, or sends it straight back \
                  to the chat when no storage is configured."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators and informational logs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Telegram bot
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Download a link once, without the bot
    Fetch {
        /// YouTube video, short or playlist URL
        #[arg(value_name = "URL")]
        url: String,

        /// Directory to download into (a timestamped directory if not specified)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Upload the result to the configured storage
        #[arg(long)]
        upload: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Tell whether a text is a video link, a playlist link, or neither
    Classify {
        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Show the file name a video title would be saved under
    Sanitize {
        #[arg(value_name = "TITLE")]
        title: String,
    },

    /// Show or locate the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

/// Settings that can be given on the command line or through the environment
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// S3 bucket receiving uploads
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: Option<String>,

    /// Folder (key prefix) inside the bucket
    #[arg(long, env = "S3_FOLDER")]
    pub folder: Option<String>,

    /// AWS shared credentials file
    #[arg(long, env = "AWS_SHARED_CREDENTIALS_FILE", value_name = "FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Netscape cookie file passed to yt-dlp
    #[arg(long, env = "COOKIES_FILE", value_name = "FILE")]
    pub cookies_file: Option<PathBuf>,
}

impl Overrides {
    /// Replace config values with the ones given here
    pub fn apply(&self, config: &mut Config) {
        if let Some(token) = &self.token {
            config.telegram.bot_token = token.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.storage.bucket = Some(bucket.clone());
        }
        if let Some(folder) = &self.folder {
            config.storage.folder = folder.clone();
        }
        if let Some(credentials_file) = &self.credentials_file {
            config.storage.credentials_file = credentials_file.clone();
        }
        if let Some(cookies_file) = &self.cookies_file {
            config.downloader.cookies_file = Some(cookies_file.clone());
        }
    }
}
