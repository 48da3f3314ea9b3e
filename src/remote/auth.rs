//! File-backed credential source.
//!
//! The OAuth dance itself is owned by an external helper that keeps a fresh
//! bearer token in a file; this provider just reads it. `refresh` re-reads
//! the file, picking up whatever the helper has rotated in since.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;

use super::{AuthProvider, Credential};
use crate::error::SyncError;

pub struct FileTokenProvider {
    path: PathBuf,
}

impl FileTokenProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_token(&self) -> Result<Credential, SyncError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SyncError::Auth(format!(
                "cannot read credential file {}: {e}",
                self.path.display()
            ))
        })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(SyncError::Auth(format!(
                "credential file {} is empty",
                self.path.display()
            )));
        }
        Ok(Credential {
            token: token.to_string(),
            obtained_at: Utc::now(),
        })
    }
}

#[async_trait]
impl AuthProvider for FileTokenProvider {
    async fn get_credential(&self) -> Result<Credential, SyncError> {
        self.read_token().await
    }

    async fn refresh(&self, stale: &Credential) -> Result<Credential, SyncError> {
        let fresh = self.read_token().await?;
        if fresh.token == stale.token {
            tracing::debug!(
                "Credential file unchanged on refresh; retrying with the same token"
            );
        }
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_and_trims_token() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  tok-123\n").unwrap();

        let provider = FileTokenProvider::new(path);
        let cred = provider.get_credential().await.unwrap();
        assert_eq!(cred.token, "tok-123");
    }

    #[tokio::test]
    async fn missing_file_is_an_auth_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = FileTokenProvider::new(dir.path().join("absent"));
        let err = provider.get_credential().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[tokio::test]
    async fn empty_file_is_an_auth_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "\n").unwrap();
        let provider = FileTokenProvider::new(path);
        assert!(matches!(
            provider.get_credential().await,
            Err(SyncError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn refresh_picks_up_rotated_token() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "old").unwrap();

        let provider = FileTokenProvider::new(path.clone());
        let stale = provider.get_credential().await.unwrap();

        std::fs::write(&path, "new").unwrap();
        let fresh = provider.refresh(&stale).await.unwrap();
        assert_eq!(fresh.token, "new");
    }
}
