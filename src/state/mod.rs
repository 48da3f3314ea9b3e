//! Durable sync state: the resumable checkpoint and the last-sync marker.
//!
//! The checkpoint is a small JSON file holding the pagination cursor, the
//! set of processed item ids, and a timestamp. It is written after every
//! page and removed only when a cycle completes, so an interrupted cycle
//! resumes exactly where the last persisted page left off.

pub mod checkpoint;
pub mod error;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::StateError;
