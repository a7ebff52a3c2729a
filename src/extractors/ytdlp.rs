use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ExtractError, ExtractOptions, ExtractSummary, ExtractedItem, Extractor};

/// How often the watcher checks for cancellation while yt-dlp runs
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Per-item line printed by yt-dlp once the final file is in place
const ITEM_PRINT_TEMPLATE: &str =
    "after_move:%(.{id,title,playlist_title,playlist_count,filepath})j";

/// Fields of the per-item JSON line
#[derive(Debug, Deserialize)]
struct ItemLine {
    id: Option<String>,
    title: Option<String>,
    playlist_title: Option<String>,
    playlist_count: Option<usize>,
    filepath: Option<PathBuf>,
}

/// Audio extractor backed by the yt-dlp executable
pub struct YtDlpExtractor {
    yt_dlp_path: String,
}

impl YtDlpExtractor {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }

    /// Build the yt-dlp command line for one request
    pub fn build_args(&self, url: &str, options: &ExtractOptions, workdir: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--format".into(),
            options.format.clone(),
            "--paths".into(),
            workdir.to_string_lossy().into_owned(),
            "--output".into(),
            options.output_template.clone(),
            "--extract-audio".into(),
            "--audio-format".into(),
            options.audio_codec.clone(),
            "--audio-quality".into(),
            format!("{}K", options.audio_bitrate_kbps),
            "--retries".into(),
            options.retries.to_string(),
            "--fragment-retries".into(),
            options.fragment_retries.to_string(),
        ];

        if options.embed_metadata {
            args.push("--embed-metadata".into());
        }
        if options.embed_thumbnail {
            args.push("--embed-thumbnail".into());
        }

        let playlist_flag = if options.expand_collections { "--yes-playlist" } else { "--no-playlist" };
        args.push(playlist_flag.into());

        if options.ignore_item_errors {
            args.push("--ignore-errors".into());
        }

        if let Some(cookies) = options.usable_cookies_file() {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args.extend([
            "--no-simulate".into(),
            "--no-progress".into(),
            "--print".into(),
            ITEM_PRINT_TEMPLATE.into(),
            "--".into(),
            url.to_string(),
        ]);

        args
    }

    fn spawn(&self, args: &[String]) -> Result<Child, ExtractError> {
        let mut command = Command::new(&self.yt_dlp_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // yt-dlp leads its own group so ffmpeg can be stopped along with it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command
            .spawn()
            .map_err(|e| ExtractError::Launch(format!("{}: {}", self.yt_dlp_path, e)))
    }
}

/// Kill yt-dlp and every process it started
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: kill(2) has no memory effects; the group was created for this child
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl Extractor for YtDlpExtractor {
    fn extract(
        &self,
        url: &str,
        options: &ExtractOptions,
        workdir: &Path,
        cancel: &CancellationToken,
        on_item: &mut dyn FnMut(ExtractedItem),
    ) -> Result<ExtractSummary, ExtractError> {
        let args = self.build_args(url, options, workdir);
        tracing::debug!("Running {} {}", self.yt_dlp_path, args.join(" "));

        let mut child = self.spawn(&args)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Launch("yt-dlp stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::Launch("yt-dlp stderr was not captured".into()))?;

        // Drain stderr on its own thread so a chatty yt-dlp never blocks on a full pipe
        let stderr_reader = thread::spawn(move || {
            BufReader::new(stderr)
                .lines()
                .map_while(|line| line.ok())
                .collect::<Vec<_>>()
        });

        let child = Arc::new(Mutex::new(child));
        let finished = Arc::new(AtomicBool::new(false));
        let watcher = {
            let child = Arc::clone(&child);
            let finished = Arc::clone(&finished);
            let cancel = cancel.clone();
            thread::spawn(move || {
                while !finished.load(Ordering::Acquire) {
                    if cancel.is_cancelled() {
                        if let Ok(mut child) = child.lock() {
                            tracing::info!("Cancellation requested, stopping yt-dlp");
                            kill_process_tree(&mut child);
                        }
                        return;
                    }
                    thread::sleep(CANCEL_POLL_INTERVAL);
                }
            })
        };

        let mut summary = ExtractSummary::default();
        let mut read_error = None;
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };
            let Some(item) = parse_item_line(&line) else {
                tracing::trace!("yt-dlp: {}", line);
                continue;
            };

            if summary.collection_title.is_none() {
                summary.collection_title = item.collection_title.clone();
            }
            summary.item_count += 1;
            on_item(item);
        }

        finished.store(true, Ordering::Release);
        let _ = watcher.join();
        let mut child = child
            .lock()
            .map_err(|_| ExtractError::Launch("yt-dlp process handle poisoned".into()))?;
        if read_error.is_some() {
            kill_process_tree(&mut child);
        }
        let status = child.wait()?;
        drop(child);
        let stderr_lines = stderr_reader.join().unwrap_or_default();

        if let Some(e) = read_error {
            return Err(ExtractError::Io(e));
        }

        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        if !status.success() {
            let diagnostic = diagnostic_from_stderr(&stderr_lines);
            if summary.item_count == 0 {
                return Err(ExtractError::DownloadFailed(diagnostic));
            }
            tracing::warn!(
                "yt-dlp exited with {} after {} item(s): {}",
                status,
                summary.item_count,
                diagnostic
            );
        }

        Ok(summary)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Parse one `--print` line into an item, ignoring anything else on stdout
fn parse_item_line(line: &str) -> Option<ExtractedItem> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    let parsed: ItemLine = serde_json::from_str(line).ok()?;
    Some(ExtractedItem {
        title: parsed.title.unwrap_or_else(|| "Unknown".to_string()),
        source_id: parsed.id.unwrap_or_default(),
        collection_title: parsed.playlist_title,
        collection_size: parsed.playlist_count,
        reported_path: parsed.filepath,
    })
}

/// Prefer yt-dlp's `ERROR:` lines, falling back to the whole stderr
fn diagnostic_from_stderr(lines: &[String]) -> String {
    let errors: Vec<&str> = lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| line.starts_with("ERROR:"))
        .collect();

    if !errors.is_empty() {
        errors.join("\n")
    } else if lines.is_empty() {
        "yt-dlp exited without output".to_string()
    } else {
        lines.join("\n")
    }
}
