use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::delivery::{self, DeliveryMode, DeliveryReport, DeliveryTarget};
use crate::extractors::{classify, ExtractError, ExtractOptions, Extractor, LinkKind};
use crate::fetch::{self, FetchProgress, FetchRequest, Track};
use crate::messaging::{Messenger, StatusMessage};
use crate::storage::s3::normalize_prefix;
use crate::storage::RemoteStore;
use crate::utils::{escape_html, progress_bar};

/// Prefix of every job workspace directory
pub const WORKSPACE_PREFIX: &str = "ytdl_";

const REJECTION_TEXT: &str = "🚫 Sorry, I only accept <b>YouTube</b> links.\n\
                              Please send a valid YouTube video, short, or playlist URL.";

/// Lifecycle of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Classified,
    Fetching,
    FetchFailed,
    Fetched,
    Delivering,
    DeliveryDegraded,
    Completed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// User-facing category of a download failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    Private,
    Unavailable,
    GeoRestricted,
    SignInRequired,
    FormatUnavailable,
    /// Anything else, with the diagnostic as reported
    Generic(String),
}

impl FailureCategory {
    pub fn user_message(&self) -> String {
        match self {
            FailureCategory::Private => "🔒 This video is private and cannot be downloaded.".to_string(),
            FailureCategory::Unavailable => "❌ This video is unavailable or has been removed.".to_string(),
            FailureCategory::GeoRestricted => "🌍 This video is geo-restricted in your region.".to_string(),
            FailureCategory::SignInRequired => "⚠️ YouTube is requesting sign-in verification. \
                 Please ensure a valid cookies file is configured."
                .to_string(),
            FailureCategory::FormatUnavailable => {
                "🎚️ No downloadable audio format is available for this video.".to_string()
            }
            FailureCategory::Generic(diagnostic) => format!("⚠️ Download error: {}", escape_html(diagnostic)),
        }
    }
}

/// Map an extractor diagnostic to a failure category
///
/// Matching is a case-insensitive substring search; the first matching rule wins.
pub fn categorize_failure(diagnostic: &str) -> FailureCategory {
    let lowered = diagnostic.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

    if mentions(&["private"]) {
        FailureCategory::Private
    } else if mentions(&["unavailable", "removed"]) {
        FailureCategory::Unavailable
    } else if mentions(&["geo", "country"]) {
        FailureCategory::GeoRestricted
    } else if mentions(&["sign in", "bot"]) {
        FailureCategory::SignInRequired
    } else if mentions(&["requested format", "format is not available"]) {
        FailureCategory::FormatUnavailable
    } else {
        FailureCategory::Generic(diagnostic.to_string())
    }
}

/// How a request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The text was not a recognized link
    Rejected,
    FetchFailed(FailureCategory),
    /// The download succeeded without producing any track
    NothingDownloaded,
    Completed(DeliveryReport),
    /// Sending or uploading failed part way, with the error chain
    DeliveryFailed(String),
    Cancelled,
}

/// Tracks the state of one job and logs each transition
struct JobTracker {
    state: JobState,
}

impl JobTracker {
    fn new() -> Self {
        tracing::debug!("Job state: {}", JobState::Received);
        Self {
            state: JobState::Received,
        }
    }

    fn advance(&mut self, next: JobState) {
        tracing::info!("Job state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Runs requests end to end: classify, fetch, deliver, clean up
pub struct JobCoordinator {
    extractor: Arc<dyn Extractor>,
    options: ExtractOptions,
    target: DeliveryTarget,
    messenger: Arc<dyn Messenger>,
    temp_dir: Option<PathBuf>,
    job_timeout: Option<Duration>,
}

impl JobCoordinator {
    /// Build a coordinator; without a store, files go straight back to the chat
    pub fn new(
        config: &Config,
        extractor: Arc<dyn Extractor>,
        store: Option<Arc<dyn RemoteStore>>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let target = DeliveryTarget::new(store, normalize_prefix(&config.storage.folder));
        tracing::info!("Delivery mode: {}", target.mode());

        Self {
            extractor,
            options: config.extract_options(),
            target,
            messenger,
            temp_dir: config.app.temp_dir.clone(),
            job_timeout: config.job_timeout(),
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.target.mode()
    }

    /// Handle one incoming chat text
    ///
    /// The returned outcome has already been reported to the chat. The job's
    /// workspace is gone by the time this returns, whatever the outcome.
    pub async fn handle_text(&self, chat_id: i64, text: &str, cancel: CancellationToken) -> JobOutcome {
        let span = tracing::info_span!("job", id = %Uuid::new_v4(), chat = chat_id);
        self.run(chat_id, text.trim(), cancel).instrument(span).await
    }

    async fn run(&self, chat_id: i64, text: &str, cancel: CancellationToken) -> JobOutcome {
        let mut job = JobTracker::new();

        let Some(kind) = classify(text) else {
            tracing::info!("Rejected message that is not a recognized link");
            if let Err(e) = self.messenger.reply(chat_id, REJECTION_TEXT).await {
                tracing::warn!("Failed to send rejection: {:#}", e);
            }
            return JobOutcome::Rejected;
        };
        job.advance(JobState::Classified);

        let mut status = StatusMessage::open(
            self.messenger.clone(),
            chat_id,
            &format!("⏳ Received a YouTube <b>{}</b> link. Starting download…", kind),
        )
        .await;

        let cancel = cancel.child_token();
        // Ends the timeout watcher together with the job
        let _job_done = cancel.clone().drop_guard();
        if let Some(limit) = self.job_timeout {
            spawn_timeout(limit, cancel.clone());
        }

        let workspace = match self.create_workspace() {
            Ok(workspace) => workspace,
            Err(e) => {
                tracing::error!("Failed to create workspace: {}", e);
                let category = FailureCategory::Generic("could not create a working directory".into());
                status.update(&category.user_message()).await;
                return JobOutcome::FetchFailed(category);
            }
        };
        tracing::debug!("Workspace: {}", workspace.path().display());

        let outcome = self
            .process(&mut job, &mut status, chat_id, text, kind, workspace.path(), &cancel)
            .await;

        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!("Failed to remove workspace {}: {}", path.display(), e);
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        job: &mut JobTracker,
        status: &mut StatusMessage,
        chat_id: i64,
        url: &str,
        kind: LinkKind,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        job.advance(JobState::Fetching);

        let (tx, rx) = mpsc::unbounded_channel();
        let request = FetchRequest::new(url, workdir).with_progress(tx);
        let fetching = fetch::fetch(self.extractor.clone(), self.options.clone(), request, cancel.clone());

        // The extractor may write into the workspace until it returns, so it is
        // awaited even after cancellation
        let (fetched, ()) = tokio::join!(
            fetching,
            until_cancelled(cancel, forward_progress(rx, status, "⬇️ Downloading"))
        );

        if cancel.is_cancelled() {
            return cancelled(status).await;
        }
        let tracks = match fetched {
            Err(ExtractError::Cancelled) => return cancelled(status).await,
            Err(ExtractError::DownloadFailed(diagnostic)) => {
                tracing::warn!("Download failed: {}", diagnostic);
                return fetch_failed(job, status, categorize_failure(&diagnostic)).await;
            }
            Err(e) => {
                tracing::error!("Extractor error: {}", e);
                return fetch_failed(job, status, FailureCategory::Generic(e.to_string())).await;
            }
            Ok(tracks) => tracks,
        };

        job.advance(JobState::Fetched);
        if tracks.is_empty() {
            status.update("⚠️ No tracks were downloaded.").await;
            return JobOutcome::NothingDownloaded;
        }

        let next_step = match self.target.mode() {
            DeliveryMode::Direct => "Sending files…",
            DeliveryMode::Store => "Starting upload…",
        };
        status
            .update(&format!("✅ Downloaded <b>{}</b> track(s). {}", tracks.len(), next_step))
            .await;

        job.advance(JobState::Delivering);
        self.deliver(job, status, chat_id, &tracks, kind, cancel).await
    }

    async fn deliver(
        &self,
        job: &mut JobTracker,
        status: &mut StatusMessage,
        chat_id: i64,
        tracks: &[Track],
        kind: LinkKind,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let (tx, rx) = mpsc::unbounded_channel();
        let delivering = delivery::deliver(
            &self.target,
            tracks,
            kind == LinkKind::Collection,
            self.messenger.as_ref(),
            chat_id,
            Some(tx),
            cancel,
        );

        // Delivery stops on its own between chunks, aborting any partial upload
        let (delivered, ()) = tokio::join!(
            delivering,
            until_cancelled(cancel, forward_progress(rx, status, "⬆️ Uploading"))
        );

        match delivered {
            Err(_) if cancel.is_cancelled() => cancelled(status).await,
            Ok(report) => {
                job.advance(if report.is_degraded() {
                    JobState::DeliveryDegraded
                } else {
                    JobState::Completed
                });
                status.update(&completion_text(&report)).await;
                JobOutcome::Completed(report)
            }
            Err(e) => {
                tracing::error!("Delivery failed: {:#}", e);
                status.update("❌ Delivery failed. Please try again later.").await;
                JobOutcome::DeliveryFailed(format!("{:#}", e))
            }
        }
    }

    fn create_workspace(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);

        match &self.temp_dir {
            Some(parent) => {
                fs_err::create_dir_all(parent)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
    }
}

/// Cancel `token` once `limit` has passed, unless it is cancelled first
fn spawn_timeout(limit: Duration, token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                tracing::warn!("Job exceeded {}s, cancelling", limit.as_secs());
                token.cancel();
            }
        }
    });
}

/// Drive `work` until it completes or `cancel` fires
async fn until_cancelled(cancel: &CancellationToken, work: impl Future<Output = ()>) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        () = work => {}
    }
}

/// Turn item events into status edits until the sender goes away
async fn forward_progress(mut events: UnboundedReceiver<FetchProgress>, status: &mut StatusMessage, verb: &str) {
    while let Some(event) = events.recv().await {
        let fraction = event.index as f64 / event.total.max(1) as f64;
        let text = format!(
            "{} <b>{}</b>\n{} {}/{}",
            verb,
            escape_html(&event.title),
            progress_bar(fraction),
            event.index,
            event.total
        );
        status.update(&text).await;
    }
}

async fn fetch_failed(job: &mut JobTracker, status: &mut StatusMessage, category: FailureCategory) -> JobOutcome {
    job.advance(JobState::FetchFailed);
    status.update(&category.user_message()).await;
    JobOutcome::FetchFailed(category)
}

async fn cancelled(status: &mut StatusMessage) -> JobOutcome {
    tracing::info!("Job cancelled");
    status.update("🛑 Cancelled.").await;
    JobOutcome::Cancelled
}

fn completion_text(report: &DeliveryReport) -> String {
    let mut text = match report.mode {
        DeliveryMode::Direct => format!(
            "✅ Done! <b>{}</b> track(s) sent directly (storage not configured).",
            report.delivered
        ),
        DeliveryMode::Store => match &report.folder {
            Some(folder) => format!(
                "✅ All done! <b>{}</b> track(s) uploaded to folder <b>{}</b>.",
                report.available(),
                escape_html(folder)
            ),
            None => format!("✅ All done! <b>{}</b> track(s) uploaded.", report.available()),
        },
    };

    if report.already_present > 0 {
        text.push_str(&format!("\n{} were already there.", report.already_present));
    }
    if report.skipped > 0 {
        text.push_str(&format!("\n⚠️ {} track(s) were missing and skipped.", report.skipped));
    }

    text
}
