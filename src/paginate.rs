//! Sequential cursor walk over the remote listing.
//!
//! Remote cursors are not parallelizable: exactly one page request is ever
//! in flight. Between requests the paginator waits a fixed pacing interval —
//! steady-state politeness toward the remote, not a retry mechanism. It also
//! tracks how many consecutive pages yielded nothing worth downloading, so a
//! scan whose window lies far from the listing order stops in bounded time.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::SyncError;
use crate::remote::{ListingApi, SyncSession};
use crate::types::ItemPage;

pub struct Paginator {
    page_size: usize,
    pace: Duration,
    empty_streak_limit: u32,
    empty_streak: u32,
    pages_fetched: u32,
    last_request_at: Option<Instant>,
}

impl Paginator {
    pub fn new(page_size: usize, pace: Duration, empty_streak_limit: u32) -> Self {
        Self {
            page_size,
            pace,
            empty_streak_limit,
            empty_streak: 0,
            pages_fetched: 0,
            last_request_at: None,
        }
    }

    /// Request the page at `cursor`, pacing relative to the previous request.
    pub async fn next_page(
        &mut self,
        api: &dyn ListingApi,
        session: &SyncSession,
        cursor: Option<&str>,
    ) -> Result<ItemPage, SyncError> {
        if let Some(last) = self.last_request_at {
            let since = last.elapsed();
            if since < self.pace {
                tokio::time::sleep(self.pace - since).await;
            }
        }
        self.last_request_at = Some(Instant::now());

        let page = api.list_items(session, self.page_size, cursor).await?;
        self.pages_fetched += 1;
        tracing::debug!(
            page = self.pages_fetched,
            items = page.items.len(),
            has_next = page.next_cursor.is_some(),
            "fetched listing page"
        );
        Ok(page)
    }

    /// Record how many in-scope, unprocessed items the page yielded. Zero
    /// extends the empty streak; anything else resets it.
    pub fn note_page_yield(&mut self, in_scope_unprocessed: usize) {
        if in_scope_unprocessed == 0 {
            self.empty_streak += 1;
        } else {
            self.empty_streak = 0;
        }
    }

    /// True once the configured number of consecutive no-op pages has been
    /// reached; the cycle then completes even though a cursor remains.
    pub fn streak_exhausted(&self) -> bool {
        self.empty_streak >= self.empty_streak_limit
    }
}
