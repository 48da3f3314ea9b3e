//! Download engine — fetches item bytes on a bounded worker pool and makes
//! completed files visible atomically.
//!
//! Every transfer streams into a `.part` file and is renamed to the final
//! name only after the byte count matches the declared length, so a crash or
//! cancellation can never leave a wrong-size file at the final path.

pub mod error;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

pub use error::DownloadError;

use crate::remote::FetchClient;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::types::RemoteItem;

/// Result of one item transfer, reported back to the orchestrator which owns
/// the processed-id accumulator.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub item_id: String,
    /// Bytes written on success.
    pub result: Result<u64, DownloadError>,
}

pub struct DownloadManager {
    fetcher: Arc<dyn FetchClient>,
    library_root: PathBuf,
    concurrency: usize,
    retry: RetryConfig,
}

impl DownloadManager {
    pub fn new(
        fetcher: Arc<dyn FetchClient>,
        library_root: PathBuf,
        concurrency: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            fetcher,
            library_root,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn FetchClient> {
        &self.fetcher
    }

    /// Final path for an item: library root + original filename.
    pub fn target_path(&self, item: &RemoteItem) -> PathBuf {
        self.library_root.join(safe_filename(&item.filename))
    }

    /// Download one page's worth of items on the worker pool.
    ///
    /// Fetch workers run concurrently but completions are consumed here, one
    /// at a time, so the caller sees a strictly serialized outcome stream.
    /// Cancellation is honored between completions; in-flight transfers are
    /// dropped mid-stream, leaving only `.part` files behind.
    pub async fn download_page(
        &self,
        items: Vec<RemoteItem>,
        cancel: &CancellationToken,
        progress: &ProgressBar,
    ) -> Vec<DownloadOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        if items.is_empty() {
            return outcomes;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.library_root).await {
            // Library root unusable: every item fails the same way.
            for item in items {
                outcomes.push(DownloadOutcome {
                    item_id: item.id,
                    result: Err(DownloadError::Disk {
                        path: self.library_root.display().to_string(),
                        source: std::io::Error::new(e.kind(), e.to_string()),
                    }),
                });
            }
            return outcomes;
        }

        let mut completions = stream::iter(items)
            .map(|item| async move {
                let result = self.fetch_item(&item).await;
                (item, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((item, result)) = completions.next().await {
            match &result {
                Ok(bytes) => {
                    progress.inc(1);
                    progress.set_message(item.filename.clone());
                    tracing::debug!(
                        id = %item.id,
                        kind = item.kind.as_str(),
                        dimensions = ?item.dimensions,
                        bytes,
                        "downloaded {}",
                        item.filename
                    );
                }
                Err(e) => {
                    progress.suspend(|| {
                        tracing::warn!(id = %item.id, "download failed for {}: {e}", item.filename);
                    });
                }
            }
            outcomes.push(DownloadOutcome {
                item_id: item.id,
                result,
            });
            if cancel.is_cancelled() {
                progress.suspend(|| tracing::info!("Cancellation requested, draining page early"));
                break;
            }
        }
        outcomes
    }

    /// Fetch a single item with bounded retries on transient failures.
    async fn fetch_item(&self, item: &RemoteItem) -> Result<u64, DownloadError> {
        let final_path = self.target_path(item);
        let part_path = part_path_for(&self.library_root, &item.id);

        retry::retry_with_backoff(
            &self.retry,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || async {
                // Always restart from byte zero so the size check is valid.
                let _ = tokio::fs::remove_file(&part_path).await;
                self.attempt_fetch(item, &part_path, &final_path).await
            },
        )
        .await
    }

    /// Single transfer attempt: stream to the part file, verify, rename.
    async fn attempt_fetch(
        &self,
        item: &RemoteItem,
        part_path: &Path,
        final_path: &Path,
    ) -> Result<u64, DownloadError> {
        let disk = |path: &Path| {
            let path = path.display().to_string();
            move |source: std::io::Error| DownloadError::Disk {
                path: path.clone(),
                source,
            }
        };

        let response = self.fetcher.fetch(item).await?;
        let declared_len = response.declared_len;
        let mut body = response.stream;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(part_path)
            .await
            .map_err(disk(part_path))?;

        let mut bytes_written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(disk(part_path))?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await.map_err(disk(part_path))?;
        drop(file);

        if let Some(expected) = declared_len {
            if bytes_written != expected {
                let _ = tokio::fs::remove_file(part_path).await;
                return Err(DownloadError::SizeMismatch {
                    path: final_path.display().to_string(),
                    expected,
                    actual: bytes_written,
                });
            }
        }

        tokio::fs::rename(part_path, final_path)
            .await
            .map_err(disk(final_path))?;

        let mtime_path = final_path.to_path_buf();
        let created = item.created_at.timestamp();
        if let Ok(Err(e)) =
            tokio::task::spawn_blocking(move || set_file_mtime(&mtime_path, created)).await
        {
            tracing::warn!("could not set mtime on {}: {e}", final_path.display());
        }

        Ok(bytes_written)
    }
}

/// Deterministic hidden part-file name derived from the item id, so
/// concurrent transfers never collide and a crashed attempt's leftover is
/// overwritten by the next attempt for the same item.
fn part_path_for(library_root: &Path, item_id: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    item_id.hash(&mut hasher);
    library_root.join(format!(".{:016x}.part", hasher.finish()))
}

/// Keep only the final component of a remote-supplied filename; remote data
/// must not be able to write outside the library root.
fn safe_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        "unnamed".to_string()
    } else {
        name.to_string()
    }
}

/// Cycle-wide progress counter. Hidden for non-TTY output or when the user
/// disabled it; the total is unknown upfront, so this counts rather than
/// tracks a bar length.
pub fn create_progress_counter(disabled: bool) -> ProgressBar {
    if disabled || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {pos} downloaded {msg}")
            .expect("valid template"),
    );
    pb
}

/// Set modification and access times to the item's creation time. Pre-epoch
/// timestamps clamp to the epoch.
fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
    };
    let times = std::fs::FileTimes::new()
        .set_modified(time)
        .set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}
