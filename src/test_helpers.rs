//! Shared fakes for the extraction engine and the remote store used in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::extractors::{ExtractError, ExtractOptions, ExtractSummary, ExtractedItem, Extractor};
use crate::storage::{RemoteMetadata, RemoteStore};
use crate::{RelayError, Result};

/// One item the fake extractor pretends to download
#[derive(Debug, Clone)]
pub(crate) struct FakeItem {
    pub title: String,
    /// File written into the working directory, `None` for a file that never materializes
    pub file_name: Option<String>,
    pub report_path: bool,
}

impl FakeItem {
    /// Written under its raw title, like yt-dlp's `%(title)s.%(ext)s`
    pub fn named(title: &str) -> Self {
        Self {
            title: title.to_string(),
            file_name: Some(format!("{}.mp3", title)),
            report_path: false,
        }
    }

    /// Written under a name that does not match its title
    pub fn written_as(title: &str, file_name: &str) -> Self {
        Self {
            title: title.to_string(),
            file_name: Some(file_name.to_string()),
            report_path: false,
        }
    }

    pub fn missing(title: &str) -> Self {
        Self {
            title: title.to_string(),
            file_name: None,
            report_path: false,
        }
    }

    pub fn reported(mut self) -> Self {
        self.report_path = true;
        self
    }
}

/// Extractor that writes placeholder files instead of running yt-dlp
#[derive(Default)]
pub(crate) struct FakeExtractor {
    items: Vec<FakeItem>,
    collection: Option<String>,
    failure: Option<String>,
    block_until_cancelled: bool,
    stop_delay: Option<Duration>,
    seen_workdir: Mutex<Option<PathBuf>>,
}

impl FakeExtractor {
    pub fn single(item: FakeItem) -> Self {
        Self {
            items: vec![item],
            ..Default::default()
        }
    }

    pub fn playlist(title: &str, items: Vec<FakeItem>) -> Self {
        Self {
            items,
            collection: Some(title.to_string()),
            ..Default::default()
        }
    }

    pub fn failing(diagnostic: &str) -> Self {
        Self {
            failure: Some(diagnostic.to_string()),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Hangs until the cancellation token fires
    pub fn stalled(item: FakeItem) -> Self {
        Self {
            items: vec![item],
            block_until_cancelled: true,
            ..Default::default()
        }
    }

    /// Like [`FakeExtractor::stalled`], but keeps writing into the workspace for
    /// `delay` after cancellation, the way yt-dlp does before its watcher
    /// notices
    pub fn slow_to_stop(item: FakeItem, delay: Duration) -> Self {
        Self {
            stop_delay: Some(delay),
            ..Self::stalled(item)
        }
    }

    pub fn seen_workdir(&self) -> Option<PathBuf> {
        self.seen_workdir.lock().unwrap().clone()
    }
}

impl Extractor for FakeExtractor {
    fn extract(
        &self,
        _url: &str,
        _options: &ExtractOptions,
        workdir: &Path,
        cancel: &CancellationToken,
        on_item: &mut dyn FnMut(ExtractedItem),
    ) -> std::result::Result<ExtractSummary, ExtractError> {
        *self.seen_workdir.lock().unwrap() = Some(workdir.to_path_buf());

        if let Some(diagnostic) = &self.failure {
            return Err(ExtractError::DownloadFailed(diagnostic.clone()));
        }

        for (index, item) in self.items.iter().enumerate() {
            let written = match &item.file_name {
                Some(file_name) => {
                    let path = workdir.join(file_name);
                    std::fs::write(&path, b"ID3fake-audio")?;
                    Some(path)
                }
                None => None,
            };

            if self.block_until_cancelled {
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(10));
                }
                if let Some(delay) = self.stop_delay {
                    std::thread::sleep(delay);
                    std::fs::create_dir_all(workdir)?;
                    std::fs::write(workdir.join(format!("{}.mp3.part", item.title)), b"partial")?;
                }
                return Err(ExtractError::Cancelled);
            }

            on_item(ExtractedItem {
                title: item.title.clone(),
                source_id: format!("id{}", index),
                collection_title: self.collection.clone(),
                collection_size: self.collection.as_ref().map(|_| self.items.len()),
                reported_path: written.filter(|_| item.report_path),
            });
        }

        Ok(ExtractSummary {
            collection_title: self.collection.clone(),
            item_count: self.items.len(),
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<(String, String), String>,
    created: Vec<RemoteMetadata>,
    uploads: Vec<(String, String)>,
    next_id: usize,
    reject_uploads: bool,
    cancelled_uploads: usize,
}

/// In-memory store that records every call made against it
#[derive(Default)]
pub(crate) struct RecordingStore {
    state: Mutex<StoreState>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose uploads always fail
    pub fn rejecting_uploads() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().reject_uploads = true;
        store
    }

    pub fn insert(&self, parent: &str, name: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((parent.to_string(), name.to_string()), id.to_string());
    }

    pub fn created(&self) -> Vec<RemoteMetadata> {
        self.state.lock().unwrap().created.clone()
    }

    /// Uploads that stopped because of cancellation
    pub fn cancelled_uploads(&self) -> usize {
        self.state.lock().unwrap().cancelled_uploads
    }

    /// `(parent, name)` of every upload call
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    async fn find_by_name(&self, name: &str, parent: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .get(&(parent.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, metadata: &RemoteMetadata) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("folder-{}", state.next_id);
        state
            .objects
            .insert((metadata.parent.clone(), metadata.name.clone()), id.clone());
        state.created.push(metadata.clone());
        Ok(id)
    }

    async fn upload_resumable(
        &self,
        _local_path: &Path,
        name: &str,
        parent: &str,
        _mime_type: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            self.state.lock().unwrap().cancelled_uploads += 1;
            return Err(RelayError::Cancelled.into());
        }
        if self.state.lock().unwrap().reject_uploads {
            return Err(RelayError::Store("storage quota exceeded".into()).into());
        }

        progress(0.5);
        progress(1.0);

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("file-{}", state.next_id);
        state
            .objects
            .insert((parent.to_string(), name.to_string()), id.clone());
        state.uploads.push((parent.to_string(), name.to_string()));
        Ok(id)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
