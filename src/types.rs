use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Media kind as reported by the remote listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }
}

/// Pixel dimensions, when the remote metadata includes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// One item of the remote library listing. Immutable once listed.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    /// Remote identifier, globally unique within the library.
    pub id: String,
    /// Original filename; the local copy keeps this name.
    pub filename: String,
    /// Creation timestamp from the remote metadata.
    pub created_at: DateTime<Utc>,
    pub kind: MediaKind,
    pub dimensions: Option<Dimensions>,
    /// Fully-shaped URL from which the item bytes can be fetched.
    pub download_url: String,
}

/// One page of the remote listing. `next_cursor = None` means the listing
/// is exhausted.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<RemoteItem>,
    pub next_cursor: Option<String>,
}

/// Inclusive creation-time window selecting which items are in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}
