//! Remote collaborators, behind traits so the sync engine never sees HTTP.
//!
//! The listing API, the credential source, and the byte fetcher are external
//! services; the engine holds them as trait objects and the concrete
//! reqwest-backed implementations live in [`api`], [`auth`] and
//! [`transport`].

pub mod api;
pub mod auth;
pub mod transport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::download::DownloadError;
use crate::error::SyncError;
use crate::types::{ItemPage, RemoteItem};

/// A bearer credential for the listing API.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub obtained_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Per-cycle session value carrying the active credential.
///
/// Passed explicitly to every remote call; a refresh produces a NEW session
/// value instead of mutating shared state, so a retried page can never
/// observe a half-updated credential.
#[derive(Debug, Clone)]
pub struct SyncSession {
    credential: Credential,
}

impl SyncSession {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Session with the credential replaced; the old value is dropped.
    pub fn with_credential(self, credential: Credential) -> Self {
        Self { credential }
    }
}

/// Paginated, ordered item listing. Order is API-defined and must not be
/// assumed chronological.
#[async_trait]
pub trait ListingApi: Send + Sync {
    async fn list_items(
        &self,
        session: &SyncSession,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<ItemPage, SyncError>;
}

/// Credential acquisition and refresh. Both raise typed auth errors on
/// irrecoverable failure.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_credential(&self) -> Result<Credential, SyncError>;
    async fn refresh(&self, stale: &Credential) -> Result<Credential, SyncError>;
}

/// Streamed item bytes plus the declared length used for verification.
pub struct FetchResponse {
    pub declared_len: Option<u64>,
    pub stream: ByteStream,
}

pub type ByteStream =
    futures_util::stream::BoxStream<'static, Result<bytes::Bytes, DownloadError>>;

/// Byte access for individual items.
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Remote size probe (HEAD); `Ok(None)` when the remote does not declare
    /// a length.
    async fn content_length(&self, item: &RemoteItem) -> Result<Option<u64>, DownloadError>;

    /// Open a streamed transfer of the item bytes.
    async fn fetch(&self, item: &RemoteItem) -> Result<FetchResponse, DownloadError>;
}
