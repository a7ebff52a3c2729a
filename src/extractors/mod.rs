use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub mod links;
pub mod ytdlp;

pub use links::{classify, is_collection_link, is_recognized_link, LinkKind};
pub use ytdlp::YtDlpExtractor;

/// Audio container produced by the extractor after transcoding
pub const AUDIO_EXTENSION: &str = "mp3";

/// MIME type of the produced audio files
pub const AUDIO_MIME_TYPE: &str = "audio/mpeg";

/// Options handed to the extraction engine for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    /// Format selector, best audio with a fallback to best overall
    pub format: String,

    /// Output filename template relative to the working directory
    pub output_template: String,

    /// Codec the audio is transcoded to
    pub audio_codec: String,

    /// Transcoding bitrate in kbps
    pub audio_bitrate_kbps: u32,

    pub embed_metadata: bool,
    pub embed_thumbnail: bool,

    /// Expand playlists into their items
    pub expand_collections: bool,

    /// Retries for a whole item
    pub retries: u32,

    /// Retries for a single fragment of an item
    pub fragment_retries: u32,

    /// Skip items that fail inside a playlist instead of aborting
    pub ignore_item_errors: bool,

    /// Netscape cookie file, only passed on when it exists
    pub cookies_file: Option<PathBuf>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            format: "bestaudio/best".to_string(),
            output_template: "%(title)s.%(ext)s".to_string(),
            audio_codec: AUDIO_EXTENSION.to_string(),
            audio_bitrate_kbps: 192,
            embed_metadata: true,
            embed_thumbnail: true,
            expand_collections: true,
            retries: 3,
            fragment_retries: 3,
            ignore_item_errors: true,
            cookies_file: None,
        }
    }
}

impl ExtractOptions {
    /// Cookie file to use, if one is configured and present on disk
    pub fn usable_cookies_file(&self) -> Option<&Path> {
        self.cookies_file.as_deref().filter(|path| path.is_file())
    }
}

/// One item the extraction engine finished writing to disk
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedItem {
    /// Raw, unsanitized title as reported by the source
    pub title: String,

    /// Source identifier (video id)
    pub source_id: String,

    /// Raw title of the enclosing playlist, if any
    pub collection_title: Option<String>,

    /// Number of entries in the enclosing playlist, if known
    pub collection_size: Option<usize>,

    /// Final path of the produced file, when the engine reports it
    pub reported_path: Option<PathBuf>,
}

/// Result of a finished extraction run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractSummary {
    pub collection_title: Option<String>,
    pub item_count: usize,
}

/// Failures raised by the extraction engine
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// The engine gave up on the URL; carries its diagnostic text verbatim
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Extraction was cancelled")]
    Cancelled,

    #[error("Failed to launch extractor: {0}")]
    Launch(String),

    #[error("Extraction worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Blocking extraction engine contract
///
/// Implementations write files into `workdir` using title-derived names and
/// call `on_item` once per finished item. They run on a blocking worker
/// thread and must return promptly once `cancel` fires.
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        url: &str,
        options: &ExtractOptions,
        workdir: &Path,
        cancel: &CancellationToken,
        on_item: &mut dyn FnMut(ExtractedItem),
    ) -> Result<ExtractSummary, ExtractError>;

    /// Get the name of this engine
    fn name(&self) -> &'static str;
}
