use anyhow::Result;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use audio_relay::bot::Dispatcher;
use audio_relay::delivery::deliver_to_store;
use audio_relay::extractors::{classify, LinkKind, YtDlpExtractor};
use audio_relay::fetch::fetch;
use audio_relay::messaging::TelegramClient;
use audio_relay::storage::{RemoteStore, S3Store};
use audio_relay::utils::{self, file_stem_or_placeholder, format_file_size, sanitize_filename};
use audio_relay::{Cli, Commands, Config, FetchRequest, JobCoordinator, RelayError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Run { overrides } => {
            let mut config = Config::load().await?;
            overrides.apply(&mut config);
            config.validate()?;

            warn_missing_dependencies(&config).await;
            run_bot(config).await?;
        }
        Commands::Fetch {
            url,
            output,
            upload,
            overrides,
        } => {
            let mut config = Config::load().await?;
            overrides.apply(&mut config);
            config.validate()?;

            warn_missing_dependencies(&config).await;
            run_fetch(&config, &url, output, upload, cli.quiet).await?;
        }
        Commands::Classify { text } => match classify(&text) {
            Some(kind) => println!("{}", kind),
            None => return Err(RelayError::InvalidInput(text).into()),
        },
        Commands::Sanitize { title } => {
            println!("{}", file_stem_or_placeholder(&sanitize_filename(&title)));
        }
        Commands::Config { show } => {
            let config = Config::load().await?;
            if show {
                config.display();
            } else {
                println!("Edit the configuration file to change settings:");
                println!("  {}", Config::config_path()?.display());
            }
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    let default_directive = if cli.verbose {
        "audio_relay=debug"
    } else if cli.quiet {
        "audio_relay=warn"
    } else {
        "audio_relay=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays clean
    if cli.json_logs {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn warn_missing_dependencies(config: &Config) {
    let missing = utils::check_dependencies(&config.downloader.yt_dlp_path).await;
    if !missing.is_empty() {
        eprintln!("{}", style("⚠️  Dependency check warnings:").yellow());
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            token.cancel();
        }
    });
}

async fn connect_store(config: &Config) -> Result<Option<Arc<dyn RemoteStore>>> {
    match config.store_settings() {
        Some(settings) => {
            let store = S3Store::connect(&settings).await?;
            tracing::info!("Uploading to s3://{}/{}", settings.bucket, settings.root_folder);
            Ok(Some(Arc::new(store)))
        }
        None => {
            tracing::info!("Storage not configured, files will be sent back to the chat");
            Ok(None)
        }
    }
}

async fn run_bot(config: Config) -> Result<()> {
    if config.telegram.bot_token.trim().is_empty() {
        return Err(RelayError::Config(
            "telegram.bot_token is not set (use --token or TELEGRAM_BOT_TOKEN)".into(),
        )
        .into());
    }

    let store = connect_store(&config).await?;
    let client = Arc::new(TelegramClient::new(
        &config.telegram.api_base,
        &config.telegram.bot_token,
        config.telegram.poll_timeout_secs,
    )?);
    let extractor = Arc::new(YtDlpExtractor::new(config.downloader.yt_dlp_path.clone()));
    let coordinator = Arc::new(JobCoordinator::new(&config, extractor, store, client.clone()));

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    Dispatcher::new(client, coordinator).run(shutdown).await
}

async fn run_fetch(config: &Config, url: &str, output: Option<PathBuf>, upload: bool, quiet: bool) -> Result<()> {
    let kind = classify(url).ok_or_else(|| RelayError::InvalidInput(url.to_string()))?;

    // Fail before downloading when the upload cannot happen anyway
    let store_settings = if upload {
        Some(config.require_store_settings()?)
    } else {
        None
    };

    let output = output.unwrap_or_else(default_output_dir);
    fs_err::create_dir_all(&output)?;
    let output = fs_err::canonicalize(&output)?;

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    progress.set_message(format!("Downloading {}…", kind));
    progress.enable_steady_tick(std::time::Duration::from_millis(120));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = FetchRequest::new(url, &output).with_progress(tx);
    let extractor = Arc::new(YtDlpExtractor::new(config.downloader.yt_dlp_path.clone()));
    let fetching = tokio::spawn(fetch(extractor, config.extract_options(), request, cancel.clone()));

    while let Some(event) = rx.recv().await {
        progress.set_length(event.total as u64);
        progress.set_position(event.index as u64);
        progress.set_message(event.title);
    }
    let tracks = fetching.await??;
    progress.finish_and_clear();

    if tracks.is_empty() {
        println!("{}", style("No tracks were downloaded.").yellow());
        return Ok(());
    }

    println!("{} {} track(s) in {}", style("✓").green(), tracks.len(), output.display());
    for track in &tracks {
        println!("  • {} ({})", track.title, describe_size(&track.filepath));
    }

    if let Some(settings) = store_settings {
        let store = S3Store::connect(&settings).await?;
        let report = deliver_to_store(
            &store,
            &settings.root_folder,
            &tracks,
            kind == LinkKind::Collection,
            None,
            &cancel,
        )
        .await?;

        println!(
            "{} Uploaded {} new, {} already present to s3://{}/{}{}",
            style("✓").green(),
            report.delivered,
            report.already_present,
            settings.bucket,
            settings.root_folder,
            report.folder.map(|folder| format!("{}/", folder)).unwrap_or_default()
        );
    }

    Ok(())
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(format!(
        "audio_relay_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

fn describe_size(path: &Path) -> String {
    match fs_err::metadata(path) {
        Ok(metadata) => format_file_size(metadata.len()),
        Err(_) => "missing".to_string(),
    }
}
