use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::extractors::AUDIO_MIME_TYPE;
use crate::fetch::{FetchProgress, Track};
use crate::messaging::Messenger;
use crate::storage::{ensure_folder, upload_unique, RemoteStore};
use crate::{RelayError, Result};

/// Where fetched tracks end up
#[derive(Clone)]
pub enum DeliveryTarget {
    /// Send each file back to the chat
    Direct,

    /// Upload into a remote store below `root_folder`
    Store {
        store: Arc<dyn RemoteStore>,
        root_folder: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Direct,
    Store,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Direct => write!(f, "direct"),
            DeliveryMode::Store => write!(f, "store"),
        }
    }
}

/// What a delivery run did with each track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub mode: DeliveryMode,

    /// Tracks sent to the chat or newly uploaded
    pub delivered: usize,

    /// Tracks whose file was missing
    pub skipped: usize,

    /// Tracks not uploaded because the store already had them
    pub already_present: usize,

    /// Collection folder the tracks were placed in
    pub folder: Option<String>,
}

impl DeliveryReport {
    fn new(mode: DeliveryMode) -> Self {
        Self {
            mode,
            delivered: 0,
            skipped: 0,
            already_present: 0,
            folder: None,
        }
    }

    /// Tracks that are now available at the destination
    pub fn available(&self) -> usize {
        self.delivered + self.already_present
    }

    pub fn is_degraded(&self) -> bool {
        self.skipped > 0
    }
}

impl DeliveryTarget {
    /// Store mode when a store is configured, direct mode otherwise
    pub fn new(store: Option<Arc<dyn RemoteStore>>, root_folder: impl Into<String>) -> Self {
        match store {
            Some(store) => DeliveryTarget::Store {
                store,
                root_folder: root_folder.into(),
            },
            None => DeliveryTarget::Direct,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        match self {
            DeliveryTarget::Direct => DeliveryMode::Direct,
            DeliveryTarget::Store { .. } => DeliveryMode::Store,
        }
    }
}

/// Deliver fetched tracks to the chat or the remote store
///
/// Tracks whose file is missing are skipped and counted; the first transport
/// or store error aborts the remaining batch. Cancellation is honoured between
/// tracks and between upload chunks, and fails with [`RelayError::Cancelled`].
pub async fn deliver(
    target: &DeliveryTarget,
    tracks: &[Track],
    is_collection: bool,
    messenger: &dyn Messenger,
    chat_id: i64,
    progress: Option<UnboundedSender<FetchProgress>>,
    cancel: &CancellationToken,
) -> Result<DeliveryReport> {
    match target {
        DeliveryTarget::Direct => deliver_direct(tracks, messenger, chat_id, cancel).await,
        DeliveryTarget::Store { store, root_folder } => {
            deliver_to_store(store.as_ref(), root_folder, tracks, is_collection, progress, cancel).await
        }
    }
}

async fn deliver_direct(
    tracks: &[Track],
    messenger: &dyn Messenger,
    chat_id: i64,
    cancel: &CancellationToken,
) -> Result<DeliveryReport> {
    let mut report = DeliveryReport::new(DeliveryMode::Direct);

    for track in tracks {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled.into());
        }
        if !track.is_materialized() {
            tracing::warn!("Skipping '{}': {} does not exist", track.title, track.filepath.display());
            report.skipped += 1;
            continue;
        }

        messenger.send_audio(chat_id, &track.filepath, &track.title).await?;
        tracing::info!("Sent '{}' to chat {}", track.title, chat_id);
        report.delivered += 1;
    }

    Ok(report)
}

/// Upload tracks below `root_folder`, inside a collection folder for collection requests
pub async fn deliver_to_store(
    store: &dyn RemoteStore,
    root_folder: &str,
    tracks: &[Track],
    is_collection: bool,
    progress: Option<UnboundedSender<FetchProgress>>,
    cancel: &CancellationToken,
) -> Result<DeliveryReport> {
    let mut report = DeliveryReport::new(DeliveryMode::Store);

    let collection_name = tracks.iter().find_map(|track| track.collection_name.as_deref());
    let parent = match collection_name {
        Some(name) if is_collection => {
            let folder = ensure_folder(store, name, root_folder).await?;
            report.folder = Some(name.to_string());
            folder
        }
        _ => root_folder.to_string(),
    };

    let total = tracks.len();
    for (position, track) in tracks.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled.into());
        }
        if !track.is_materialized() {
            tracing::warn!("Skipping '{}': {} does not exist", track.title, track.filepath.display());
            report.skipped += 1;
            continue;
        }

        if let Some(progress) = &progress {
            let _ = progress.send(FetchProgress {
                index: position + 1,
                total,
                title: track.title.clone(),
            });
        }

        let title = track.title.as_str();
        let upload = upload_unique(
            store,
            &track.filepath,
            &parent,
            AUDIO_MIME_TYPE,
            &|fraction| tracing::debug!("Uploading '{}': {:.0}%", title, fraction * 100.0),
            cancel,
        )
        .await?;

        if upload.skipped {
            report.already_present += 1;
        } else {
            report.delivered += 1;
        }
    }

    tracing::info!(
        "Delivered {} new, {} already present, {} skipped via {}",
        report.delivered,
        report.already_present,
        report.skipped,
        store.name()
    );

    Ok(report)
}
