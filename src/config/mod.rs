use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extractors::ExtractOptions;
use crate::storage::s3::{normalize_prefix, MIN_CHUNK_SIZE};
use crate::RelayError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telegram bot settings
    pub telegram: TelegramConfig,

    /// yt-dlp settings
    pub downloader: DownloaderConfig,

    /// Remote storage settings
    pub storage: StorageConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    pub bot_token: String,

    /// Long-polling timeout for getUpdates
    pub poll_timeout_secs: u64,

    /// Bot API base URL, overridable for a self-hosted Bot API server
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Path or name of the yt-dlp executable
    pub yt_dlp_path: String,

    /// Netscape cookie file used when YouTube asks for sign-in
    pub cookies_file: Option<PathBuf>,

    /// MP3 bitrate in kbps
    pub audio_bitrate_kbps: u32,

    /// Retries for a whole item
    pub retries: u32,

    /// Retries for a single fragment
    pub fragment_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Target bucket; uploads are disabled when unset
    pub bucket: Option<String>,

    /// Folder (key prefix) inside the bucket that receives uploads
    pub folder: String,

    /// AWS region
    pub region: String,

    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,

    /// AWS shared credentials file
    pub credentials_file: PathBuf,

    /// Multipart chunk size in MiB
    pub chunk_size_mib: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Parent directory for job workspaces (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,

    /// Cancel a job that runs longer than this
    pub job_timeout_secs: Option<u64>,
}

/// Resolved settings for store mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub bucket: String,
    /// Root folder identifier (normalized key prefix)
    pub root_folder: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials_file: PathBuf,
    pub chunk_size_bytes: usize,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            poll_timeout_secs: 30,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            cookies_file: Some(PathBuf::from("cookies.txt")),
            audio_bitrate_kbps: 192,
            retries: 3,
            fragment_retries: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let credentials_file = dirs::home_dir()
            .map(|home| home.join(".aws").join("credentials"))
            .unwrap_or_else(|| PathBuf::from("credentials"));

        Self {
            bucket: None,
            folder: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            credentials_file,
            chunk_size_mib: 8,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save().await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Load and validate configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("audio-relay").join("config.yaml"))
    }

    /// Multipart chunk size in bytes
    pub fn chunk_size_bytes(&self) -> std::result::Result<usize, RelayError> {
        self.storage
            .chunk_size_mib
            .checked_mul(1024 * 1024)
            .ok_or_else(|| {
                RelayError::Config(format!(
                    "storage.chunk_size_mib is too large: {}",
                    self.storage.chunk_size_mib
                ))
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), RelayError> {
        if self.chunk_size_bytes()? < MIN_CHUNK_SIZE {
            return Err(RelayError::Config(format!(
                "storage.chunk_size_mib must be at least {}",
                MIN_CHUNK_SIZE / (1024 * 1024)
            )));
        }

        if !(32..=320).contains(&self.downloader.audio_bitrate_kbps) {
            return Err(RelayError::Config(format!(
                "downloader.audio_bitrate_kbps must be between 32 and 320, got {}",
                self.downloader.audio_bitrate_kbps
            )));
        }

        if self.telegram.poll_timeout_secs == 0 {
            return Err(RelayError::Config("telegram.poll_timeout_secs must be positive".into()));
        }

        if let Err(e) = url::Url::parse(&self.telegram.api_base) {
            return Err(RelayError::Config(format!("telegram.api_base is not a valid URL: {}", e)));
        }

        if let Some(endpoint) = &self.storage.endpoint {
            if let Err(e) = url::Url::parse(endpoint) {
                return Err(RelayError::Config(format!("storage.endpoint is not a valid URL: {}", e)));
            }
        }

        Ok(())
    }

    /// Settings for store mode, or `None` when uploads are not configured
    ///
    /// Store mode needs a designated bucket and an existing credentials file;
    /// anything else falls back to sending files straight back to the chat.
    pub fn store_settings(&self) -> Option<StoreSettings> {
        let bucket = self
            .storage
            .bucket
            .as_deref()
            .map(str::trim)
            .filter(|bucket| !bucket.is_empty())?;

        if !self.storage.credentials_file.is_file() {
            tracing::debug!(
                "Credentials file {} not found, storage disabled",
                self.storage.credentials_file.display()
            );
            return None;
        }

        let chunk_size_bytes = match self.chunk_size_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("{}, storage disabled", e);
                return None;
            }
        };

        Some(StoreSettings {
            bucket: bucket.to_string(),
            root_folder: normalize_prefix(&self.storage.folder),
            region: self.storage.region.clone(),
            endpoint: self.storage.endpoint.clone(),
            credentials_file: self.storage.credentials_file.clone(),
            chunk_size_bytes,
        })
    }

    /// Like [`Config::store_settings`] but as an error for commands that need storage
    pub fn require_store_settings(&self) -> std::result::Result<StoreSettings, RelayError> {
        self.store_settings().ok_or(RelayError::StoreUnconfigured)
    }

    /// Extraction options derived from the downloader section
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            audio_bitrate_kbps: self.downloader.audio_bitrate_kbps,
            retries: self.downloader.retries,
            fragment_retries: self.downloader.fragment_retries,
            cookies_file: self.downloader.cookies_file.clone(),
            ..ExtractOptions::default()
        }
    }

    /// Overall job time limit, if configured
    pub fn job_timeout(&self) -> Option<Duration> {
        self.app.job_timeout_secs.map(Duration::from_secs)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!(
            "  Bot Token: {}",
            if self.telegram.bot_token.is_empty() { "(not set)" } else { "(set)" }
        );
        println!("  yt-dlp: {}", self.downloader.yt_dlp_path);
        if let Some(cookies) = &self.downloader.cookies_file {
            println!("  Cookies File: {}", cookies.display());
        }
        println!("  Bitrate: {} kbps", self.downloader.audio_bitrate_kbps);
        match self.store_settings() {
            Some(store) => {
                println!("  Storage: s3://{}/{}", store.bucket, store.root_folder);
                println!("  Region: {}", store.region);
            }
            None => println!("  Storage: not configured (files are sent back to the chat)"),
        }
        if let Some(timeout) = self.app.job_timeout_secs {
            println!("  Job Timeout: {}s", timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_storage(bucket: Option<&str>, credentials_file: PathBuf) -> Config {
        let mut config = Config::default();
        config.storage.bucket = bucket.map(str::to_string);
        config.storage.credentials_file = credentials_file;
        config.storage.folder = "/music/".to_string();
        config
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "telegram:\n  bot_token: \"123:abc\"\nstorage:\n  bucket: tunes\n").unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.poll_timeout_secs, 30);
        assert_eq!(config.storage.bucket.as_deref(), Some("tunes"));
        assert_eq!(config.storage.chunk_size_mib, 8);
        assert_eq!(config.downloader.audio_bitrate_kbps, 192);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.storage.chunk_size_mib = 1;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = Config::default();
        config.storage.chunk_size_mib = usize::MAX;
        assert!(matches!(config.chunk_size_bytes(), Err(RelayError::Config(_))));
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = Config::default();
        config.downloader.audio_bitrate_kbps = 1000;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = Config::default();
        config.storage.endpoint = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_store_unconfigured_without_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("credentials");
        std::fs::write(&credentials, "[default]\n").unwrap();

        assert_eq!(config_with_storage(None, credentials.clone()).store_settings(), None);
        assert_eq!(config_with_storage(Some("  "), credentials).store_settings(), None);
    }

    #[test]
    fn test_store_unconfigured_without_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_storage(Some("tunes"), dir.path().join("missing"));

        assert_eq!(config.store_settings(), None);
        assert!(matches!(config.require_store_settings(), Err(RelayError::StoreUnconfigured)));
    }

    #[test]
    fn test_store_unconfigured_with_oversized_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("credentials");
        std::fs::write(&credentials, "[default]\n").unwrap();

        let mut config = config_with_storage(Some("tunes"), credentials);
        config.storage.chunk_size_mib = usize::MAX / 2;

        assert_eq!(config.store_settings(), None);
    }

    #[test]
    fn test_store_settings_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("credentials");
        std::fs::write(&credentials, "[default]\n").unwrap();

        let settings = config_with_storage(Some("tunes"), credentials.clone())
            .store_settings()
            .unwrap();

        assert_eq!(settings.bucket, "tunes");
        assert_eq!(settings.root_folder, "music/");
        assert_eq!(settings.credentials_file, credentials);
        assert_eq!(settings.chunk_size_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_extract_options_follow_downloader_section() {
        let mut config = Config::default();
        config.downloader.audio_bitrate_kbps = 320;
        config.downloader.cookies_file = None;

        let options = config.extract_options();
        assert_eq!(options.audio_bitrate_kbps, 320);
        assert_eq!(options.cookies_file, None);
        assert!(options.ignore_item_errors);
    }
}
