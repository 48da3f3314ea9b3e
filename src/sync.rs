//! Sync orchestrator — one `run_cycle` per scheduler trigger.
//!
//! A cycle authenticates, resumes (or starts) a checkpoint, then walks the
//! listing page by page: classify, download on the worker pool, fold results
//! into the processed set, persist the checkpoint. Checkpoint granularity is
//! per page, trading a little re-work after a crash for far fewer disk
//! writes. A cycle ends `Completed` (checkpoint cleared, last-sync marker
//! written) or `Aborted` (checkpoint intact, next trigger resumes).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::{self, Decision, LocalFileState, SkipReason};
use crate::download::{create_progress_counter, DownloadError, DownloadManager};
use crate::error::{FailureClass, SyncError};
use crate::paginate::Paginator;
use crate::remote::{AuthProvider, ListingApi, SyncSession};
use crate::retry::{cancellable_sleep, RecoveryPolicy};
use crate::state::{Checkpoint, CheckpointStore, StateError};
use crate::types::{DateWindow, ItemPage, RemoteItem};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Inclusive creation-time window; required, never defaulted.
    pub window: DateWindow,
    pub page_size: usize,
    /// Consecutive no-op pages after which the cycle completes early.
    pub empty_page_streak: u32,
    /// Fixed inter-page pacing (politeness, not retry).
    pub page_pace: Duration,
    pub recovery: RecoveryPolicy,
    pub no_progress: bool,
}

/// Counters reported for a completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub pages: u32,
    pub items_seen: u64,
    pub out_of_window: u64,
    pub downloaded: u64,
    /// Items whose local copy already matched the remote size.
    pub confirmed_complete: u64,
    /// Per-item failures left for the next cycle to retry.
    pub failed_items: u64,
    pub checkpoints_written: u32,
}

#[derive(Debug)]
pub enum CycleAbort {
    /// Cancellation observed at a safe boundary.
    Cancelled,
    Error(SyncError),
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleStats),
    /// A cycle was already running; this trigger was coalesced.
    Skipped,
    /// Checkpoint left intact for the next trigger to resume.
    Aborted(CycleAbort),
}

pub struct SyncEngine {
    api: Arc<dyn ListingApi>,
    auth: Arc<dyn AuthProvider>,
    downloads: DownloadManager,
    store: CheckpointStore,
    config: SyncConfig,
    /// Guards against overlapping cycles racing on the checkpoint.
    cycle_gate: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn ListingApi>,
        auth: Arc<dyn AuthProvider>,
        downloads: DownloadManager,
        store: CheckpointStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            api,
            auth,
            downloads,
            store,
            config,
            cycle_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one sync cycle. Never panics and never returns `Err`: every
    /// failure mode is folded into the outcome so the scheduler loop can
    /// keep going.
    pub async fn run_cycle(&self, cancel: CancellationToken) -> CycleOutcome {
        let _gate = match self.cycle_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                warn!("A sync cycle is already running; coalescing this trigger");
                return CycleOutcome::Skipped;
            }
        };

        match self.cycle(&cancel).await {
            Ok(stats) => {
                info!(
                    pages = stats.pages,
                    items = stats.items_seen,
                    out_of_window = stats.out_of_window,
                    downloaded = stats.downloaded,
                    confirmed = stats.confirmed_complete,
                    failed = stats.failed_items,
                    "Sync cycle completed"
                );
                CycleOutcome::Completed(stats)
            }
            Err(CycleAbort::Cancelled) => {
                info!("Sync cycle cancelled; checkpoint kept for resume");
                CycleOutcome::Aborted(CycleAbort::Cancelled)
            }
            Err(CycleAbort::Error(e)) => {
                error!("Sync cycle aborted: {e}; checkpoint kept for resume");
                CycleOutcome::Aborted(CycleAbort::Error(e))
            }
        }
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleStats, CycleAbort> {
        // Authenticating
        let credential = self
            .auth
            .get_credential()
            .await
            .map_err(CycleAbort::Error)?;
        let mut session = SyncSession::new(credential);

        // Resume the previous cycle's position, if one was interrupted.
        let mut checkpoint = match self.store.load() {
            Ok(Some(cp)) => {
                info!(
                    processed = cp.processed.len(),
                    "Resuming interrupted cycle from checkpoint"
                );
                cp
            }
            Ok(None) => Checkpoint::new(),
            Err(e) => return Err(CycleAbort::Error(e.into())),
        };

        let mut paginator = Paginator::new(
            self.config.page_size,
            self.config.page_pace,
            self.config.empty_page_streak,
        );
        let progress = create_progress_counter(self.config.no_progress);
        let mut stats = CycleStats::default();

        loop {
            if cancel.is_cancelled() {
                return Err(CycleAbort::Cancelled);
            }

            // Listing
            let page = self
                .fetch_page_recovering(&mut session, &mut paginator, checkpoint.cursor.clone(), cancel)
                .await?;
            stats.pages += 1;
            stats.items_seen += page.items.len() as u64;

            if page.items.is_empty() {
                info!("Listing exhausted (empty page)");
                break;
            }

            // Filtering
            let (to_fetch, confirmed, in_scope_unprocessed) =
                self.partition_page(&page, &checkpoint, &mut stats).await;
            paginator.note_page_yield(in_scope_unprocessed);

            for id in confirmed {
                if checkpoint.processed.insert(id) {
                    stats.confirmed_complete += 1;
                }
            }

            // Downloading
            let outcomes = self.downloads.download_page(to_fetch, cancel, &progress).await;
            let mut storage_failure: Option<DownloadError> = None;
            for outcome in outcomes {
                match outcome.result {
                    Ok(_) => {
                        checkpoint.processed.insert(outcome.item_id);
                        stats.downloaded += 1;
                    }
                    Err(e) if e.is_storage() => {
                        stats.failed_items += 1;
                        storage_failure = Some(e);
                    }
                    Err(_) => {
                        // Logged by the download manager; the id stays out of
                        // `processed` so the next cycle retries it.
                        stats.failed_items += 1;
                    }
                }
            }
            if let Some(e) = storage_failure {
                return Err(storage_abort(e));
            }
            if cancel.is_cancelled() {
                // Downloads were cut short; advancing the cursor here would
                // skip the items that never ran.
                return Err(CycleAbort::Cancelled);
            }

            // Checkpointing
            match page.next_cursor {
                Some(next) if !paginator.streak_exhausted() => {
                    checkpoint.advance(Some(next));
                    self.store
                        .save(&checkpoint)
                        .map_err(|e| CycleAbort::Error(e.into()))?;
                    stats.checkpoints_written += 1;
                    debug!(
                        processed = checkpoint.processed.len(),
                        writes = stats.checkpoints_written,
                        "checkpoint persisted"
                    );
                }
                Some(_) => {
                    info!(
                        streak = self.config.empty_page_streak,
                        "No new items in the configured page streak; stopping the scan early"
                    );
                    break;
                }
                None => {
                    info!("Reached the last page of the listing");
                    break;
                }
            }
        }

        // Completed: forget the position, remember the success.
        progress.finish_and_clear();
        self.store
            .clear()
            .map_err(|e| CycleAbort::Error(e.into()))?;
        self.store
            .write_last_sync(Utc::now())
            .map_err(|e| CycleAbort::Error(e.into()))?;
        Ok(stats)
    }

    /// Classify one page into downloads and confirmed-complete skips.
    ///
    /// Returns the items to fetch, ids to record as already complete, and the
    /// in-scope unprocessed count that feeds the paginator's streak.
    async fn partition_page(
        &self,
        page: &ItemPage,
        checkpoint: &Checkpoint,
        stats: &mut CycleStats,
    ) -> (Vec<RemoteItem>, Vec<String>, usize) {
        let mut to_fetch = Vec::new();
        let mut confirmed = Vec::new();
        let mut in_scope_unprocessed = 0usize;

        for item in &page.items {
            if !classify::in_window(item, &self.config.window) {
                stats.out_of_window += 1;
                continue;
            }
            if checkpoint.processed.contains(&item.id) {
                continue;
            }
            in_scope_unprocessed += 1;

            let target = self.downloads.target_path(item);
            let local = if target.exists() {
                // The single remote size probe of the decision path.
                let remote_size = match self.downloads.fetcher().content_length(item).await {
                    Ok(size) => size,
                    Err(e) => {
                        warn!(id = %item.id, "size probe failed ({e}); will re-download");
                        None
                    }
                };
                classify::local_file_state(&target, remote_size)
            } else {
                LocalFileState::Absent
            };
            if let LocalFileState::SizeMismatch { expected, actual } = local {
                info!(
                    id = %item.id,
                    expected, actual,
                    "size mismatch, re-downloading {}", item.filename
                );
            }

            match classify::needs_download(item, &checkpoint.processed, local) {
                Decision::Skip(SkipReason::AlreadyProcessed) => {}
                Decision::Skip(SkipReason::AlreadyComplete) => {
                    debug!(id = %item.id, "local copy already complete: {}", item.filename);
                    confirmed.push(item.id.clone());
                }
                Decision::Fetch { .. } => to_fetch.push(item.clone()),
            }
        }

        (to_fetch, confirmed, in_scope_unprocessed)
    }

    /// Fetch one page, applying the per-class recovery policy.
    ///
    /// Attempt counters are scoped to this page: every page starts with the
    /// full re-auth and backoff allowance.
    async fn fetch_page_recovering(
        &self,
        session: &mut SyncSession,
        paginator: &mut Paginator,
        cursor: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<ItemPage, CycleAbort> {
        let policy = self.config.recovery;
        let mut auth_attempts = 0u32;
        let mut backoff_attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(CycleAbort::Cancelled);
            }
            let err = match paginator
                .next_page(self.api.as_ref(), session, cursor.as_deref())
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };

            match err.class() {
                FailureClass::Reauth => {
                    auth_attempts += 1;
                    if auth_attempts > policy.auth_attempts {
                        error!(
                            attempts = policy.auth_attempts,
                            "Re-authentication budget exhausted"
                        );
                        return Err(CycleAbort::Error(err));
                    }
                    warn!(
                        attempt = auth_attempts,
                        limit = policy.auth_attempts,
                        "Listing rejected the credential ({err}); re-authenticating"
                    );
                    let fresh = self
                        .auth
                        .refresh(session.credential())
                        .await
                        .map_err(CycleAbort::Error)?;
                    *session = session.clone().with_credential(fresh);
                }
                FailureClass::Backoff => {
                    if backoff_attempts >= policy.backoff.max_retries {
                        return Err(CycleAbort::Error(err));
                    }
                    let delay = policy.backoff.delay_for_retry(backoff_attempts);
                    backoff_attempts += 1;
                    warn!(
                        "Remote throttling ({err}); backing off {}s before re-requesting the page",
                        delay.as_secs()
                    );
                    if !cancellable_sleep(delay, cancel).await {
                        return Err(CycleAbort::Cancelled);
                    }
                }
                FailureClass::Cooldown => {
                    warn!(
                        "Network failure ({err}); retrying the page in {}s",
                        policy.network_cooldown.as_secs()
                    );
                    if !cancellable_sleep(policy.network_cooldown, cancel).await {
                        return Err(CycleAbort::Cancelled);
                    }
                }
                FailureClass::Fatal => return Err(CycleAbort::Error(err)),
            }
        }
    }
}

fn storage_abort(e: DownloadError) -> CycleAbort {
    match e {
        DownloadError::Disk { path, source } => CycleAbort::Error(SyncError::Storage(
            StateError::Write {
                path: path.into(),
                source,
            },
        )),
        other => CycleAbort::Error(SyncError::Data(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Credential, FetchClient, FetchResponse};
    use crate::retry::RetryConfig;
    use crate::types::MediaKind;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use futures_util::StreamExt as _;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    // ── mock collaborators ──

    struct ScriptedApi {
        responses: Mutex<VecDeque<Result<ItemPage, SyncError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<ItemPage, SyncError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ListingApi for ScriptedApi {
        async fn list_items(
            &self,
            _session: &SyncSession,
            _page_size: usize,
            _cursor: Option<&str>,
        ) -> Result<ItemPage, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ItemPage::default()))
        }
    }

    struct CountingAuth {
        gets: AtomicU32,
        refreshes: AtomicU32,
        fail_get: bool,
    }

    impl CountingAuth {
        fn new() -> Self {
            Self {
                gets: AtomicU32::new(0),
                refreshes: AtomicU32::new(0),
                fail_get: false,
            }
        }
    }

    #[async_trait]
    impl AuthProvider for CountingAuth {
        async fn get_credential(&self) -> Result<Credential, SyncError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get {
                return Err(SyncError::Auth("credential store unavailable".into()));
            }
            Ok(Credential {
                token: "t0".into(),
                obtained_at: Utc::now(),
            })
        }

        async fn refresh(&self, _stale: &Credential) -> Result<Credential, SyncError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                token: format!("t{}", n + 1),
                obtained_at: Utc::now(),
            })
        }
    }

    /// Serves per-id payloads and records which ids were actually fetched.
    struct RecordingFetcher {
        payloads: HashMap<String, Vec<u8>>,
        fetched: Mutex<Vec<String>>,
    }

    impl RecordingFetcher {
        fn new(payloads: HashMap<String, Vec<u8>>) -> Self {
            Self {
                payloads,
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched_ids(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FetchClient for RecordingFetcher {
        async fn content_length(&self, item: &RemoteItem) -> Result<Option<u64>, DownloadError> {
            Ok(self.payloads.get(&item.id).map(|p| p.len() as u64))
        }

        async fn fetch(&self, item: &RemoteItem) -> Result<FetchResponse, DownloadError> {
            self.fetched.lock().unwrap().push(item.id.clone());
            let payload = self.payloads.get(&item.id).cloned().ok_or_else(|| {
                DownloadError::HttpStatus {
                    status: 404,
                    url: item.download_url.clone(),
                }
            })?;
            let len = payload.len() as u64;
            Ok(FetchResponse {
                declared_len: Some(len),
                stream: futures_util::stream::iter(vec![Ok(Bytes::from(payload))]).boxed(),
            })
        }
    }

    // ── fixtures ──

    fn in_window_item(id: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            filename: format!("{id}.jpg"),
            created_at: Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap(),
            kind: MediaKind::Photo,
            dimensions: None,
            download_url: format!("https://media.example/{id}=d"),
        }
    }

    fn out_of_window_item(id: &str) -> RemoteItem {
        RemoteItem {
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            ..in_window_item(id)
        }
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            window: DateWindow {
                start: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2025, 2, 20, 23, 59, 59).unwrap(),
            },
            page_size: 100,
            empty_page_streak: 90,
            page_pace: Duration::ZERO,
            recovery: RecoveryPolicy {
                backoff: RetryConfig {
                    max_retries: 3,
                    base_delay_secs: 0,
                    max_delay_secs: 0,
                },
                auth_attempts: 3,
                network_cooldown: Duration::ZERO,
            },
            no_progress: true,
        }
    }

    struct Harness {
        engine: SyncEngine,
        api: Arc<ScriptedApi>,
        fetcher: Arc<RecordingFetcher>,
        auth: Arc<CountingAuth>,
        store: CheckpointStore,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn harness(
        api: ScriptedApi,
        payloads: HashMap<String, Vec<u8>>,
        config: SyncConfig,
    ) -> Harness {
        harness_with_auth(api, CountingAuth::new(), payloads, config)
    }

    fn harness_with_auth(
        api: ScriptedApi,
        auth: CountingAuth,
        payloads: HashMap<String, Vec<u8>>,
        config: SyncConfig,
    ) -> Harness {
        let library = tempfile::TempDir::new().unwrap();
        let state = tempfile::TempDir::new().unwrap();
        let store = CheckpointStore::new(
            state.path().join("checkpoint.json"),
            state.path().join(".last_sync"),
        );
        let api = Arc::new(api);
        let fetcher = Arc::new(RecordingFetcher::new(payloads));
        let auth = Arc::new(auth);
        let downloads = DownloadManager::new(
            fetcher.clone(),
            library.path().to_path_buf(),
            2,
            RetryConfig {
                max_retries: 0,
                base_delay_secs: 0,
                max_delay_secs: 0,
            },
        );
        let engine = SyncEngine::new(
            api.clone(),
            auth.clone(),
            downloads,
            store.clone(),
            config,
        );
        Harness {
            engine,
            api,
            fetcher,
            auth,
            store,
            _dirs: (library, state),
        }
    }

    fn library_root(h: &Harness) -> &Path {
        h._dirs.0.path()
    }

    fn payloads_for(ids: &[&str]) -> HashMap<String, Vec<u8>> {
        ids.iter()
            .map(|id| (id.to_string(), format!("bytes-of-{id}").into_bytes()))
            .collect()
    }

    // ── the §8 scenarios ──

    #[tokio::test]
    async fn page_with_three_in_window_items_downloads_exactly_three() {
        // 100 listed items, 3 in-window and unprocessed.
        let mut items: Vec<RemoteItem> = (0..97)
            .map(|i| out_of_window_item(&format!("old-{i}")))
            .collect();
        items.extend(["w1", "w2", "w3"].map(in_window_item));
        let api = ScriptedApi::new(vec![Ok(ItemPage {
            items,
            next_cursor: None,
        })]);
        let h = harness(api, payloads_for(&["w1", "w2", "w3"]), test_config());

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(stats.downloaded, 3);
        assert_eq!(stats.out_of_window, 97);

        // Window correctness: nothing out-of-window ever reached the fetcher.
        let fetched = h.fetcher.fetched_ids();
        assert_eq!(fetched.len(), 3);
        assert!(fetched.iter().all(|id| id.starts_with('w')));

        // Completed: checkpoint cleared, marker written.
        assert!(h.store.load().unwrap().is_none());
        assert!(h.store.read_last_sync().is_some());
        assert!(library_root(&h).join("w1.jpg").exists());
    }

    #[tokio::test]
    async fn rate_limit_retries_page_without_duplicate_checkpoint_write() {
        let page1 = ItemPage {
            items: vec![in_window_item("a")],
            next_cursor: Some("p2".into()),
        };
        let page2 = ItemPage {
            items: vec![in_window_item("b")],
            next_cursor: None,
        };
        let api = ScriptedApi::new(vec![
            Err(SyncError::RateLimit), // attempt 1 → backoff
            Ok(page1),                 // attempt 2 → same page succeeds
            Ok(page2),
        ]);
        let h = harness(api, payloads_for(&["a", "b"]), test_config());

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(stats.downloaded, 2);
        assert_eq!(stats.pages, 2);
        // The throttled page was re-requested: 1 failed + 2 successful calls.
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 3);
        // One persisted checkpoint (after page 1); the 429 attempt wrote none.
        assert_eq!(stats.checkpoints_written, 1);
    }

    #[tokio::test]
    async fn empty_page_streak_completes_early_despite_live_cursor() {
        let mut config = test_config();
        config.empty_page_streak = 2;
        // Every page is non-empty but yields nothing in-window, and always
        // offers another cursor.
        let pages = (0..4)
            .map(|i| {
                Ok(ItemPage {
                    items: vec![out_of_window_item(&format!("o{i}"))],
                    next_cursor: Some(format!("p{}", i + 1)),
                })
            })
            .collect();
        let h = harness(ScriptedApi::new(pages), HashMap::new(), config);

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        // Two no-op pages reach the streak limit, then the cycle stops even
        // though page 2 carried a next cursor.
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.downloaded, 0);
        assert!(h.store.load().unwrap().is_none());
        assert!(h.store.read_last_sync().is_some());
    }

    // ── resumability ──

    #[tokio::test]
    async fn interrupted_cycle_resumes_to_the_same_final_state() {
        let page1 = ItemPage {
            items: vec![in_window_item("a"), in_window_item("b")],
            next_cursor: Some("p2".into()),
        };
        let page2 = ItemPage {
            items: vec![in_window_item("c")],
            next_cursor: None,
        };
        let payloads = payloads_for(&["a", "b", "c"]);

        // Interrupt after page 1: page 2's fetch dies fatally.
        let api = ScriptedApi::new(vec![
            Ok(page1.clone()),
            Err(SyncError::Data("listing decode failed: truncated".into())),
        ]);
        let h = harness(api, payloads.clone(), test_config());
        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(CycleAbort::Error(SyncError::Data(_)))
        ));

        // Abort preserved the page-1 checkpoint.
        let cp = h.store.load().unwrap().expect("checkpoint must survive");
        assert_eq!(cp.cursor.as_deref(), Some("p2"));
        assert!(cp.processed.contains("a") && cp.processed.contains("b"));

        // Resume against a fresh engine sharing the same stores. The listing
        // serves page 1 again (remote replay) and then page 2.
        let api = ScriptedApi::new(vec![Ok(page1), Ok(page2)]);
        let fetcher = Arc::new(RecordingFetcher::new(payloads));
        let downloads = DownloadManager::new(
            fetcher.clone(),
            library_root(&h).to_path_buf(),
            2,
            RetryConfig {
                max_retries: 0,
                base_delay_secs: 0,
                max_delay_secs: 0,
            },
        );
        let resumed = SyncEngine::new(
            Arc::new(api),
            Arc::new(CountingAuth::new()),
            downloads,
            h.store.clone(),
            test_config(),
        );

        let outcome = resumed.run_cycle(CancellationToken::new()).await;
        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };

        // At-most-once: a and b were processed in the first run and are
        // fetched again by nobody; only c is downloaded on resume.
        assert_eq!(fetcher.fetched_ids(), vec!["c".to_string()]);
        assert_eq!(stats.downloaded, 1);

        // Same terminal state as an uninterrupted run.
        for f in ["a.jpg", "b.jpg", "c.jpg"] {
            assert!(library_root(&h).join(f).exists(), "{f} missing");
        }
        assert!(h.store.load().unwrap().is_none());
        assert!(h.store.read_last_sync().is_some());
    }

    #[tokio::test]
    async fn complete_local_copy_is_confirmed_without_fetching() {
        let api = ScriptedApi::new(vec![Ok(ItemPage {
            items: vec![in_window_item("a")],
            next_cursor: None,
        })]);
        let payloads = payloads_for(&["a"]);
        let h = harness(api, payloads.clone(), test_config());
        // Pre-seed the final path with the complete payload.
        std::fs::write(
            library_root(&h).join("a.jpg"),
            payloads.get("a").unwrap(),
        )
        .unwrap();

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(stats.downloaded, 0);
        assert_eq!(stats.confirmed_complete, 1);
        assert!(h.fetcher.fetched_ids().is_empty());
    }

    #[tokio::test]
    async fn stale_local_copy_is_refetched() {
        let api = ScriptedApi::new(vec![Ok(ItemPage {
            items: vec![in_window_item("a")],
            next_cursor: None,
        })]);
        let payloads = payloads_for(&["a"]);
        let h = harness(api, payloads.clone(), test_config());
        // Truncated leftover at the final path, as after a hard crash of an
        // older writer.
        std::fs::write(library_root(&h).join("a.jpg"), b"junk").unwrap();

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
        assert_eq!(h.fetcher.fetched_ids(), vec!["a".to_string()]);
        assert_eq!(
            std::fs::read(library_root(&h).join("a.jpg")).unwrap(),
            payloads.get("a").unwrap().clone()
        );
    }

    // ── failure policies ──

    #[tokio::test]
    async fn auth_failures_reauthenticate_then_abort_after_budget() {
        // The listing rejects every attempt; refresh always succeeds.
        let api = ScriptedApi::new(
            (0..8)
                .map(|_| Err(SyncError::Auth("HTTP 401".into())))
                .collect(),
        );
        let h = harness(api, HashMap::new(), test_config());

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(CycleAbort::Error(SyncError::Auth(_)))
        ));
        // 3 re-auth attempts were made before giving up.
        assert_eq!(h.auth.refreshes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unobtainable_credential_aborts_before_listing() {
        let api = ScriptedApi::new(vec![Ok(ItemPage::default())]);
        let mut auth = CountingAuth::new();
        auth.fail_get = true;
        let h = harness_with_auth(api, auth, HashMap::new(), test_config());

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(CycleAbort::Error(SyncError::Auth(_)))
        ));
        assert_eq!(h.auth.gets.load(Ordering::SeqCst), 1);
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backoff_budget_exhaustion_aborts_and_preserves_checkpoint() {
        let page1 = ItemPage {
            items: vec![in_window_item("a")],
            next_cursor: Some("p2".into()),
        };
        // Page 2 returns 503 forever; budget is 3 retries.
        let mut responses: Vec<Result<ItemPage, SyncError>> = vec![Ok(page1)];
        responses.extend((0..8).map(|_| Err(SyncError::TransientServer { status: 503 })));
        let h = harness(ScriptedApi::new(responses), payloads_for(&["a"]), test_config());

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(CycleAbort::Error(SyncError::TransientServer { .. }))
        ));
        let cp = h.store.load().unwrap().expect("checkpoint preserved");
        assert!(cp.processed.contains("a"));
        assert!(h.store.read_last_sync().is_none());
    }

    #[tokio::test]
    async fn network_failure_cools_down_and_retries_same_page() {
        let api = ScriptedApi::new(vec![
            Err(SyncError::Network("connection reset".into())),
            Err(SyncError::Network("connection reset".into())),
            Ok(ItemPage {
                items: vec![in_window_item("a")],
                next_cursor: None,
            }),
        ]);
        let h = harness(api, payloads_for(&["a"]), test_config());

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(stats.downloaded, 1);
    }

    #[tokio::test]
    async fn per_item_failure_skips_without_aborting() {
        // "missing" has no payload → 404 on fetch, left for the next cycle.
        let api = ScriptedApi::new(vec![Ok(ItemPage {
            items: vec![in_window_item("missing"), in_window_item("a")],
            next_cursor: None,
        })]);
        let h = harness(api, payloads_for(&["a"]), test_config());

        let outcome = h.engine.run_cycle(CancellationToken::new()).await;
        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.failed_items, 1);
        assert!(h.store.read_last_sync().is_some());
    }

    // ── concurrency & cancellation ──

    #[tokio::test]
    async fn overlapping_triggers_are_coalesced() {
        let mut api = ScriptedApi::new(vec![Ok(ItemPage::default()), Ok(ItemPage::default())]);
        api.delay = Duration::from_millis(50);
        let h = harness(api, HashMap::new(), test_config());

        let engine = &h.engine;
        let (first, second) = tokio::join!(
            engine.run_cycle(CancellationToken::new()),
            engine.run_cycle(CancellationToken::new()),
        );
        let outcomes = [first, second];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, CycleOutcome::Skipped))
                .count(),
            1,
            "exactly one trigger must be coalesced: {outcomes:?}"
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, CycleOutcome::Completed(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn pre_cancelled_cycle_aborts_without_listing() {
        let api = ScriptedApi::new(vec![Ok(ItemPage::default())]);
        let h = harness(api, HashMap::new(), test_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.engine.run_cycle(cancel).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(CycleAbort::Cancelled)
        ));
        // No listing call was made and no marker written.
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.read_last_sync().is_none());
    }
}
