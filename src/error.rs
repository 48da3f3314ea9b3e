//! Failure taxonomy for listing and cycle-level errors.
//!
//! Every remote failure is mapped to a typed variant so the orchestrator can
//! dispatch on [`FailureClass`] instead of inspecting error text. Per-item
//! download failures use [`crate::download::DownloadError`] and never reach
//! this level.

use thiserror::Error;

use crate::state::StateError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote rejected our credential (401/403) or the credential source is
    /// unusable. Recoverable by re-authentication, a bounded number of times.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP 429: remote asked us to slow down.
    #[error("rate limited by remote (HTTP 429)")]
    RateLimit,

    /// HTTP 5xx: remote-side transient failure.
    #[error("transient server error (HTTP {status})")]
    TransientServer { status: u16 },

    /// Connection or timeout failure before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// Remote response did not match the expected schema.
    #[error("malformed remote response: {0}")]
    Data(String),

    /// Checkpoint or marker persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StateError),
}

/// Recovery policy selector, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Invalidate the credential, re-authenticate, retry (bounded).
    Reauth,
    /// Exponential backoff with jitter, retry same request (bounded).
    Backoff,
    /// Fixed cooldown, retry same request until cancelled.
    Cooldown,
    /// No retry; abort the cycle, checkpoint preserved.
    Fatal,
}

impl SyncError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Auth(_) => FailureClass::Reauth,
            Self::RateLimit | Self::TransientServer { .. } => FailureClass::Backoff,
            Self::Network(_) => FailureClass::Cooldown,
            Self::Data(_) | Self::Storage(_) => FailureClass::Fatal,
        }
    }

    /// Map an HTTP status from the listing API to the taxonomy. Statuses that
    /// fit no recovery class (e.g. 404) are schema-level surprises.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}")),
            429 => Self::RateLimit,
            500..=599 => Self::TransientServer { status },
            _ => Self::Data(format!("unexpected HTTP status {status}")),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Network(err.to_string())
        } else if err.is_decode() {
            Self::Data(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_reauth() {
        assert_eq!(SyncError::from_status(401).class(), FailureClass::Reauth);
        assert_eq!(SyncError::from_status(403).class(), FailureClass::Reauth);
    }

    #[test]
    fn throttle_and_5xx_map_to_backoff() {
        assert_eq!(SyncError::from_status(429).class(), FailureClass::Backoff);
        for status in [500, 502, 503, 504] {
            assert_eq!(
                SyncError::from_status(status).class(),
                FailureClass::Backoff,
                "status {status}"
            );
        }
    }

    #[test]
    fn network_maps_to_cooldown() {
        let e = SyncError::Network("connection reset".into());
        assert_eq!(e.class(), FailureClass::Cooldown);
    }

    #[test]
    fn data_and_storage_are_fatal() {
        assert_eq!(
            SyncError::Data("bad json".into()).class(),
            FailureClass::Fatal
        );
        let storage: SyncError = StateError::Encode(
            serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        )
        .into();
        assert_eq!(storage.class(), FailureClass::Fatal);
    }

    #[test]
    fn unexpected_status_is_fatal() {
        assert_eq!(SyncError::from_status(404).class(), FailureClass::Fatal);
        assert_eq!(SyncError::from_status(418).class(), FailureClass::Fatal);
    }
}
