use thiserror::Error;

/// Per-item download failures.
///
/// These never abort a cycle on their own: the orchestrator logs them, leaves
/// the id out of the processed set, and the next cycle retries the item. The
/// one exception is local disk failure, which [`is_storage`](Self::is_storage)
/// flags so the orchestrator can abort before wasting the rest of the cycle.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("size mismatch for {path}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("disk error at {path}: {source}")]
    Disk {
        path: String,
        source: std::io::Error,
    },

    #[error("transfer error for {url}: {source}")]
    Transfer { url: String, source: reqwest::Error },
}

impl DownloadError {
    /// Whether this failure is transient and worth retrying within the cycle.
    ///
    /// Size mismatches are retryable: they usually mean a truncated transfer
    /// or an expired CDN URL, not durable corruption.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::SizeMismatch { .. } => true,
            Self::Transfer { .. } => true,
            Self::Disk { .. } => false,
        }
    }

    /// Local storage failure, the only per-item error that escalates to a
    /// cycle abort (a full disk will fail every subsequent item too).
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Disk { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_4xx_not_retryable() {
        for status in [401, 403, 404] {
            let e = DownloadError::HttpStatus {
                status,
                url: "u".into(),
            };
            assert!(!e.is_retryable(), "status {status}");
        }
    }

    #[test]
    fn http_429_and_5xx_retryable() {
        for status in [429, 500, 502, 503, 504] {
            let e = DownloadError::HttpStatus {
                status,
                url: "u".into(),
            };
            assert!(e.is_retryable(), "status {status}");
        }
    }

    #[test]
    fn size_mismatch_retryable() {
        let e = DownloadError::SizeMismatch {
            path: "p".into(),
            expected: 10,
            actual: 3,
        };
        assert!(e.is_retryable());
        assert!(!e.is_storage());
    }

    #[test]
    fn disk_error_is_storage_and_not_retryable() {
        let e = DownloadError::Disk {
            path: "p".into(),
            source: std::io::Error::other("no space left on device"),
        };
        assert!(!e.is_retryable());
        assert!(e.is_storage());
    }
}
