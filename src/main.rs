//! photomirror — incremental, resumable mirror of a remote photo library.
//!
//! Walks the remote paginated listing, downloads items whose creation time
//! falls inside the configured window, and persists a per-page checkpoint so
//! an interrupted run resumes without re-downloading anything. One cycle
//! runs at startup; afterwards a cycle runs daily at the configured time.

#![warn(clippy::all)]

mod classify;
mod cli;
mod config;
mod download;
mod error;
mod paginate;
mod remote;
pub mod retry;
mod schedule;
mod shutdown;
mod state;
mod sync;
mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use download::DownloadManager;
use remote::api::{HttpFetcher, LibraryClient};
use remote::auth::FileTokenProvider;
use remote::transport::TransportBuilder;
use state::CheckpointStore;
use sync::{CycleAbort, CycleOutcome, SyncConfig, SyncEngine};

/// Listing requests are small JSON exchanges; cap them hard. Download
/// requests stream for as long as the media takes and get no overall cap.
const LISTING_TIMEOUT: Duration = Duration::from_secs(30);

fn build_engine(config: &config::Config) -> anyhow::Result<SyncEngine> {
    let mut listing_transport = TransportBuilder::new().request_timeout(LISTING_TIMEOUT);
    let mut download_transport = TransportBuilder::new();
    for (host, addr) in &config.resolve {
        listing_transport = listing_transport.resolve(host.clone(), *addr);
        download_transport = download_transport.resolve(host.clone(), *addr);
    }

    let api = Arc::new(LibraryClient::new(
        listing_transport.build()?,
        config.base_url.clone(),
    ));
    let fetcher = Arc::new(HttpFetcher::new(download_transport.build()?));
    let auth = Arc::new(FileTokenProvider::new(config.token_file.clone()));
    let store = CheckpointStore::new(config.checkpoint_path.clone(), config.marker_path.clone());

    if let Some(last) = store.read_last_sync() {
        tracing::info!("Last successful sync completed at {last}");
    }

    let downloads = DownloadManager::new(
        fetcher,
        config.library_dir.clone(),
        config.concurrent_downloads,
        config.recovery.backoff,
    );

    Ok(SyncEngine::new(
        api,
        auth,
        downloads,
        store,
        SyncConfig {
            window: config.window,
            page_size: config.page_size,
            empty_page_streak: config.empty_page_streak,
            page_pace: config.page_pace,
            recovery: config.recovery,
            no_progress: config.no_progress_bar,
        },
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let filter = match cli.log_level {
        types::LogLevel::Debug => "debug",
        types::LogLevel::Info => "info",
        types::LogLevel::Warn => "warn",
        types::LogLevel::Error => "error",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::info!(
        window_start = %config.window.start,
        window_end = %config.window.end,
        concurrency = config.concurrent_downloads,
        "Starting photomirror"
    );

    let engine = build_engine(&config)?;
    let cancel = shutdown::install_signal_handler();

    // Startup cycle: run immediately so a freshly deployed mirror catches up
    // without waiting for the daily slot.
    let outcome = engine.run_cycle(cancel.clone()).await;

    if config.once {
        return match outcome {
            CycleOutcome::Completed(_) | CycleOutcome::Skipped => Ok(()),
            CycleOutcome::Aborted(CycleAbort::Cancelled) => Ok(()),
            CycleOutcome::Aborted(CycleAbort::Error(e)) => Err(e.into()),
        };
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let delay = schedule::next_run_delay(Local::now(), config.run_at);
        tracing::info!(
            "Next cycle at {} (in {}s)",
            config.run_at,
            delay.as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                tracing::info!("Shutdown during wait, exiting");
                break;
            }
        }
        // Outcome details are logged by the engine; an aborted cycle leaves
        // its checkpoint behind and the next trigger resumes it.
        engine.run_cycle(cancel.clone()).await;
    }

    Ok(())
}
