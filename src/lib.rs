//! Audio Relay - a Telegram bot that turns YouTube links into MP3 files
//!
//! This library provides the download-and-delivery pipeline: link classification,
//! yt-dlp driven audio extraction with filename sanitization, and delivery of the
//! resulting tracks either to S3-compatible storage or straight back to the chat.

pub mod bot;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod extractors;
pub mod fetch;
pub mod job;
pub mod messaging;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_helpers;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use delivery::{DeliveryReport, DeliveryTarget};
pub use extractors::{ExtractError, ExtractOptions, Extractor};
pub use fetch::{FetchProgress, FetchRequest, Track};
pub use job::{FailureCategory, JobCoordinator, JobOutcome};
pub use messaging::Messenger;
pub use storage::RemoteStore;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the relay
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("Not a recognized YouTube link: {0}")]
    InvalidInput(String),

    #[error("Remote storage is not configured")]
    StoreUnconfigured,

    #[error("Remote storage operation failed: {0}")]
    Store(String),

    #[error("Messaging operation failed: {0}")]
    Messaging(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}
