//! Pure classification of listed items.
//!
//! Decides which items are in scope for the configured window and which of
//! those still need their bytes fetched. Nothing here mutates state or does
//! I/O; the orchestrator stats the local file and probes the remote size,
//! then hands the findings in as [`LocalFileState`].

use std::collections::BTreeSet;
use std::path::Path;

use crate::types::{DateWindow, RemoteItem};

/// What the local filesystem holds at an item's final path, compared against
/// the remote size probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFileState {
    /// Nothing at the final path.
    Absent,
    /// File present with exactly the remote-declared byte count.
    SizeMatch,
    /// File present but truncated or stale.
    SizeMismatch { expected: u64, actual: u64 },
    /// File present but the remote size could not be determined.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Id already has a terminal outcome this cycle (or a resumed one).
    AlreadyProcessed,
    /// Local file already complete; record the id as processed.
    AlreadyComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    /// Fetch the bytes. `replace` marks a stale or partial local copy.
    Fetch { replace: bool },
}

/// Whether the item's creation time falls inside the inclusive window.
///
/// Listing order is API-defined and not necessarily chronological, so this
/// is evaluated per item, never used to short-circuit a page.
pub fn in_window(item: &RemoteItem, window: &DateWindow) -> bool {
    window.contains(item.created_at)
}

/// Whether an in-window item still needs a download.
pub fn needs_download(
    item: &RemoteItem,
    processed: &BTreeSet<String>,
    local: LocalFileState,
) -> Decision {
    if processed.contains(&item.id) {
        return Decision::Skip(SkipReason::AlreadyProcessed);
    }
    match local {
        LocalFileState::Absent => Decision::Fetch { replace: false },
        LocalFileState::SizeMatch => Decision::Skip(SkipReason::AlreadyComplete),
        LocalFileState::SizeMismatch { .. } => Decision::Fetch { replace: true },
        // Probe failed: the original behavior is to re-download rather than
        // trust a file of unverifiable size.
        LocalFileState::Unknown => Decision::Fetch { replace: true },
    }
}

/// Compare the file at `path` against the remote-declared size.
pub fn local_file_state(path: &Path, remote_size: Option<u64>) -> LocalFileState {
    let actual = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return LocalFileState::Absent,
    };
    match remote_size {
        Some(expected) if expected == actual => LocalFileState::SizeMatch,
        Some(expected) => LocalFileState::SizeMismatch { expected, actual },
        None => LocalFileState::Unknown,
    }
}
