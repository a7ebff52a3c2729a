use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::extractors::{ExtractError, ExtractOptions, ExtractedItem, Extractor, AUDIO_EXTENSION};
use crate::utils::{file_stem_or_placeholder, sanitize_filename};

/// One fetched audio file in the job workspace
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Absolute path of the encoded file
    pub filepath: PathBuf,

    /// Sanitized title, also the file stem when the rename succeeded
    pub title: String,

    /// Sanitized playlist name, `None` for single videos
    pub collection_name: Option<String>,
}

impl Track {
    /// Check that the backing file still exists
    pub fn is_materialized(&self) -> bool {
        self.filepath.is_file()
    }
}

/// Per-item progress
///
/// Fetch emits one once an item is on disk under its final name; delivery
/// reuses it to announce each upload before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchProgress {
    /// Position of the item, starting at 1
    pub index: usize,
    pub total: usize,
    pub title: String,
}

/// Input to a fetch: what to download, where, and who to tell
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,

    /// Existing directory used by this request only
    pub workdir: PathBuf,

    pub progress: Option<UnboundedSender<FetchProgress>>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            workdir: workdir.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: UnboundedSender<FetchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Run a fetch on the blocking thread pool
///
/// Progress events travel over the request's channel, so the caller consumes
/// them on its own task while the extractor runs.
pub async fn fetch(
    extractor: Arc<dyn Extractor>,
    options: ExtractOptions,
    request: FetchRequest,
    cancel: CancellationToken,
) -> Result<Vec<Track>, ExtractError> {
    tokio::task::spawn_blocking(move || fetch_blocking(extractor.as_ref(), &options, &request, &cancel))
        .await
        .map_err(|e| ExtractError::Worker(e.to_string()))?
}

/// Download everything behind `request.url` and rename the results to sanitized names
///
/// Returns an empty list when the extractor succeeds without producing
/// anything. Extractor failures are passed through untouched.
pub fn fetch_blocking(
    extractor: &dyn Extractor,
    options: &ExtractOptions,
    request: &FetchRequest,
    cancel: &CancellationToken,
) -> Result<Vec<Track>, ExtractError> {
    tracing::info!("Fetching {} with {}", request.url, extractor.name());

    let mut tracks: Vec<Track> = Vec::new();
    let mut on_item = |item: ExtractedItem| {
        let title = file_stem_or_placeholder(&sanitize_filename(&item.title)).to_string();
        let claimed: Vec<&Path> = tracks.iter().map(|t| t.filepath.as_path()).collect();
        let filepath = resolve_track_file(&request.workdir, &item, &title, &claimed);

        let collection_name = item
            .collection_title
            .as_deref()
            .map(sanitize_filename)
            .filter(|name| !name.is_empty());

        tracks.push(Track {
            filepath,
            title: title.clone(),
            collection_name,
        });

        let index = tracks.len();
        let total = item.collection_size.unwrap_or(1).max(index);
        tracing::debug!("Fetched {}/{}: {}", index, total, title);

        if let Some(progress) = &request.progress {
            // The receiver going away only means nobody is watching anymore
            let _ = progress.send(FetchProgress { index, total, title });
        }
    };

    let summary = extractor.extract(&request.url, options, &request.workdir, cancel, &mut on_item)?;

    tracing::info!(
        "Fetched {} track(s){}",
        tracks.len(),
        summary
            .collection_title
            .map(|title| format!(" from playlist '{}'", title))
            .unwrap_or_default()
    );

    Ok(tracks)
}

/// Find the file produced for `item` and move it to `<stem>.mp3`
///
/// The raw title (or the path the extractor reported) is the expected name.
/// When neither the raw nor the sanitized file exists, the first unclaimed
/// audio file in the directory is taken instead. The returned path may not
/// exist; delivery skips such tracks.
fn resolve_track_file(workdir: &Path, item: &ExtractedItem, stem: &str, claimed: &[&Path]) -> PathBuf {
    let final_path = workdir.join(format!("{}.{}", stem, AUDIO_EXTENSION));
    let raw_path = item
        .reported_path
        .clone()
        .filter(|path| path.is_file())
        .unwrap_or_else(|| workdir.join(format!("{}.{}", item.title, AUDIO_EXTENSION)));

    if raw_path.is_file() && raw_path != final_path && !claimed.contains(&raw_path.as_path()) {
        if final_path.exists() {
            tracing::warn!(
                "'{}' already exists, keeping '{}' under its original name",
                final_path.display(),
                raw_path.display()
            );
            return raw_path;
        }

        return match fs_err::rename(&raw_path, &final_path) {
            Ok(()) => final_path,
            Err(e) => {
                tracing::warn!("Could not rename to sanitized name: {}", e);
                raw_path
            }
        };
    }

    if final_path.is_file() && !claimed.contains(&final_path.as_path()) {
        return final_path;
    }

    match find_unclaimed_audio(workdir, claimed) {
        Some(fallback) => {
            tracing::warn!(
                "No file named after '{}', claiming {} instead",
                item.title,
                fallback.display()
            );
            fallback
        }
        None => {
            tracing::warn!("No file found for '{}'", item.title);
            final_path
        }
    }
}

/// First audio file in the directory that no track owns yet, in name order
fn find_unclaimed_audio(workdir: &Path, claimed: &[&Path]) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs_err::read_dir(workdir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(AUDIO_EXTENSION))
        })
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .find(|path| !claimed.contains(&path.as_path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeExtractor, FakeItem};
    use tokio::sync::mpsc;

    fn run(extractor: &FakeExtractor, workdir: &Path) -> (Result<Vec<Track>, ExtractError>, Vec<FetchProgress>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = FetchRequest::new("https://youtu.be/x", workdir).with_progress(tx);
        let result = fetch_blocking(extractor, &ExtractOptions::default(), &request, &CancellationToken::new());
        drop(request);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    #[test]
    fn test_single_item_is_renamed_to_sanitized_title() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::single(FakeItem::named("Linkin Park - Numb (Official Video)"));

        let (result, events) = run(&extractor, dir.path());
        let tracks = result.unwrap();

        assert_eq!(
            tracks,
            vec![Track {
                filepath: dir.path().join("Linkin Park - Numb.mp3"),
                title: "Linkin Park - Numb".to_string(),
                collection_name: None,
            }]
        );
        assert!(tracks[0].is_materialized());
        assert!(!dir.path().join("Linkin Park - Numb (Official Video).mp3").exists());
        assert_eq!(
            events,
            vec![FetchProgress {
                index: 1,
                total: 1,
                title: "Linkin Park - Numb".to_string()
            }]
        );
    }

    #[test]
    fn test_playlist_items_carry_collection_name() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::playlist(
            "My Mix 🎧 [HD]",
            vec![FakeItem::named("First Song"), FakeItem::named("Second Song (Lyrics)")],
        );

        let (result, events) = run(&extractor, dir.path());
        let tracks = result.unwrap();

        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.collection_name.as_deref() == Some("My Mix")));
        assert_eq!(tracks[1].filepath, dir.path().join("Second Song.mp3"));
        assert_eq!(
            events.iter().map(|e| (e.index, e.total)).collect::<Vec<_>>(),
            vec![(1, 2), (2, 2)]
        );
    }

    #[test]
    fn test_reported_path_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let extractor =
            FakeExtractor::single(FakeItem::written_as("Song: Title", "Song꞉ Title.mp3").reported());

        let (result, _) = run(&extractor, dir.path());
        let tracks = result.unwrap();

        assert_eq!(tracks[0].filepath, dir.path().join("Song Title.mp3"));
        assert!(tracks[0].is_materialized());
        assert!(!dir.path().join("Song꞉ Title.mp3").exists());
    }

    #[test]
    fn test_falls_back_to_unclaimed_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::playlist(
            "Mix",
            vec![
                FakeItem::written_as("A: One", "A꞉ One.mp3"),
                FakeItem::written_as("B: Two", "B꞉ Two.mp3"),
            ],
        );

        let (result, _) = run(&extractor, dir.path());
        let tracks = result.unwrap();

        // Each fallback claims a different file
        assert_eq!(tracks[0].filepath, dir.path().join("A꞉ One.mp3"));
        assert_eq!(tracks[1].filepath, dir.path().join("B꞉ Two.mp3"));
        assert_eq!(tracks[0].title, "A One");
    }

    #[test]
    fn test_missing_file_still_yields_track() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::single(FakeItem::missing("Ghost"));

        let (result, events) = run(&extractor, dir.path());
        let tracks = result.unwrap();

        assert_eq!(tracks.len(), 1);
        assert!(!tracks[0].is_materialized());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_existing_sanitized_name_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::playlist(
            "Mix",
            vec![FakeItem::named("Song"), FakeItem::named("Song (Live)")],
        );

        let (result, _) = run(&extractor, dir.path());
        let tracks = result.unwrap();

        assert_eq!(tracks[0].filepath, dir.path().join("Song.mp3"));
        assert_eq!(tracks[1].filepath, dir.path().join("Song (Live).mp3"));
        assert_eq!(tracks[1].title, "Song");
        assert!(tracks.iter().all(Track::is_materialized));
    }

    #[test]
    fn test_garbage_title_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::single(FakeItem::named("(Official Video)"));

        let (result, _) = run(&extractor, dir.path());
        let tracks = result.unwrap();

        assert_eq!(tracks[0].title, "Unknown");
        assert_eq!(tracks[0].filepath, dir.path().join("Unknown.mp3"));
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (result, events) = run(&FakeExtractor::empty(), dir.path());

        assert!(result.unwrap().is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn test_download_failure_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::failing("ERROR: Private video");

        let (result, _) = run(&extractor, dir.path());

        match result {
            Err(ExtractError::DownloadFailed(message)) => assert_eq!(message, "ERROR: Private video"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_runs_on_worker_and_streams_progress() {
        let dir = tempfile::tempdir().unwrap();
        let extractor: Arc<dyn Extractor> = Arc::new(FakeExtractor::playlist(
            "Mix",
            vec![FakeItem::named("One"), FakeItem::named("Two"), FakeItem::named("Three")],
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = FetchRequest::new("https://youtube.com/playlist?list=PL1", dir.path()).with_progress(tx);

        let tracks = fetch(extractor, ExtractOptions::default(), request, CancellationToken::new())
            .await
            .unwrap();

        let mut titles = Vec::new();
        while let Some(event) = rx.recv().await {
            titles.push(event.title);
        }
        assert_eq!(tracks.len(), 3);
        assert_eq!(titles, vec!["One", "Two", "Three"]);
    }
}
