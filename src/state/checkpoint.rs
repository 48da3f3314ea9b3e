use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::StateError;

/// Bumped when the on-disk layout changes; an unknown version is treated as
/// no checkpoint rather than a fatal error, so old state never wedges a sync.
const SCHEMA_VERSION: u32 = 1;

/// Resumable position of a sync cycle.
///
/// `processed` only grows within a cycle; the store persists it after every
/// page so a resumed cycle never re-downloads an item a previous run already
/// finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: u32,
    /// Pagination token for the NEXT page to request; `None` = start over.
    pub cursor: Option<String>,
    /// Ids with a terminal outcome (downloaded or confirmed complete).
    pub processed: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            cursor: None,
            processed: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Move to the next page. Called once per persisted page.
    pub fn advance(&mut self, next_cursor: Option<String>) {
        self.cursor = next_cursor;
        self.updated_at = Utc::now();
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// File-backed store for the checkpoint and the last-sync marker.
///
/// Both files are written atomically (temp file in the same directory, fsync,
/// rename) so a crash mid-write leaves either the old state or the new one,
/// never a torn file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    checkpoint_path: PathBuf,
    marker_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(checkpoint_path: PathBuf, marker_path: PathBuf) -> Self {
        Self {
            checkpoint_path,
            marker_path,
        }
    }

    /// Load the persisted checkpoint, if any.
    ///
    /// A missing file means a fresh cycle. An unreadable or wrong-version
    /// file is logged and also treated as fresh: resuming from nothing only
    /// costs re-scanning, while refusing to run would wedge the mirror.
    pub fn load(&self) -> Result<Option<Checkpoint>, StateError> {
        let raw = match std::fs::read_to_string(&self.checkpoint_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Read {
                    path: self.checkpoint_path.clone(),
                    source: e,
                })
            }
        };

        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(cp) if cp.schema_version == SCHEMA_VERSION => {
                debug!(
                    processed = cp.processed.len(),
                    has_cursor = cp.cursor.is_some(),
                    "Loaded checkpoint"
                );
                Ok(Some(cp))
            }
            Ok(cp) => {
                warn!(
                    found = cp.schema_version,
                    expected = SCHEMA_VERSION,
                    "Ignoring checkpoint with unknown schema version"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(
                    path = %self.checkpoint_path.display(),
                    error = %e,
                    "Ignoring unreadable checkpoint, starting fresh"
                );
                Ok(None)
            }
        }
    }

    /// Persist the checkpoint. Called once per completed page.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(checkpoint)?;
        self.write_atomic(&self.checkpoint_path, json.as_bytes())
    }

    /// Remove the checkpoint after a fully successful cycle.
    pub fn clear(&self) -> Result<(), StateError> {
        match std::fs::remove_file(&self.checkpoint_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Write {
                path: self.checkpoint_path.clone(),
                source: e,
            }),
        }
    }

    /// Completion time of the most recent fully successful cycle.
    pub fn read_last_sync(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(&self.marker_path).ok()?;
        match raw.trim().parse::<DateTime<Utc>>() {
            Ok(at) => Some(at),
            Err(e) => {
                warn!(path = %self.marker_path.display(), error = %e, "Unreadable last-sync marker");
                None
            }
        }
    }

    /// Record a fully successful cycle. Never partially updated: the marker
    /// is a single timestamp written atomically.
    pub fn write_last_sync(&self, at: DateTime<Utc>) -> Result<(), StateError> {
        self.write_atomic(&self.marker_path, at.to_rfc3339().as_bytes())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StateError> {
        let write_err = |source: std::io::Error| StateError::Write {
            path: path.to_path_buf(),
            source,
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        // The rename must also survive a crash of the directory entry.
        if let Ok(dir_handle) = std::fs::File::open(dir) {
            let _ = dir_handle.sync_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> CheckpointStore {
        CheckpointStore::new(dir.join("checkpoint.json"), dir.join(".last_sync"))
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(store_in(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        let mut cp = Checkpoint::new();
        cp.processed.insert("item-1".to_string());
        cp.processed.insert("item-2".to_string());
        cp.advance(Some("page-token-3".to_string()));
        store.save(&cp).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cursor.as_deref(), Some("page-token-3"));
        assert_eq!(loaded.processed.len(), 2);
        assert!(loaded.processed.contains("item-1"));
    }

    #[test]
    fn corrupt_checkpoint_is_treated_as_fresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());
        std::fs::write(dir.path().join("checkpoint.json"), "{not json").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn unknown_schema_version_is_treated_as_fresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        let mut cp = Checkpoint::new();
        cp.schema_version = SCHEMA_VERSION + 1;
        store.save(&cp).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn clear_removes_checkpoint_and_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        store.save(&Checkpoint::new()).unwrap();
        assert!(store.load().unwrap().is_some());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap(); // already gone
    }

    #[test]
    fn marker_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        assert!(store.read_last_sync().is_none());
        let at = "2025-02-20T03:00:00Z".parse::<DateTime<Utc>>().unwrap();
        store.write_last_sync(at).unwrap();
        assert_eq!(store.read_last_sync(), Some(at));
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = CheckpointStore::new(nested.join("checkpoint.json"), nested.join(".last_sync"));
        store.save(&Checkpoint::new()).unwrap();
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn processed_set_survives_resume_growth() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        let mut cp = Checkpoint::new();
        cp.processed.insert("a".to_string());
        store.save(&cp).unwrap();

        // Simulate the next page of the same cycle.
        let mut resumed = store.load().unwrap().unwrap();
        resumed.processed.insert("b".to_string());
        resumed.advance(None);
        store.save(&resumed).unwrap();

        let last = store.load().unwrap().unwrap();
        assert!(last.processed.contains("a") && last.processed.contains("b"));
        assert_eq!(last.cursor, None);
    }
}
