//! reqwest-backed implementations of the remote collaborator traits,
//! speaking the media library's JSON listing format.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt as _;
use serde::Deserialize;

use super::{ByteStream, FetchClient, FetchResponse, ListingApi, SyncSession};
use crate::download::DownloadError;
use crate::error::SyncError;
use crate::types::{Dimensions, ItemPage, MediaKind, RemoteItem};

/// Fallback render dimension when the metadata omits width/height.
const DEFAULT_RENDER_DIM: u32 = 4096;

/// Listing client for the remote library REST API.
pub struct LibraryClient {
    http: reqwest::Client,
    base_url: String,
}

impl LibraryClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http, base_url }
    }
}

#[async_trait]
impl ListingApi for LibraryClient {
    async fn list_items(
        &self,
        session: &SyncSession,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<ItemPage, SyncError> {
        let url = format!("{}/v1/mediaItems", self.base_url);
        let mut request = self
            .http
            .get(&url)
            .bearer_auth(&session.credential().token)
            .query(&[("pageSize", page_size.to_string())]);
        if let Some(token) = cursor {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.map_err(SyncError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::from_status(status.as_u16()));
        }

        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Data(format!("listing decode failed: {e}")))?;

        let mut items = Vec::with_capacity(body.media_items.len());
        for wire in body.media_items {
            items.push(wire.into_item()?);
        }
        Ok(ItemPage {
            items,
            next_cursor: body.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default, rename = "mediaItems")]
    media_items: Vec<WireItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    id: String,
    filename: String,
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(rename = "mediaMetadata")]
    media_metadata: WireMetadata,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(rename = "creationTime")]
    creation_time: String,
    width: Option<String>,
    height: Option<String>,
    /// Present (any value) iff the item is a video.
    video: Option<serde_json::Value>,
}

impl WireItem {
    fn into_item(self) -> Result<RemoteItem, SyncError> {
        let created_at = parse_creation_time(&self.media_metadata.creation_time)
            .map_err(|e| SyncError::Data(format!("item {}: {e}", self.id)))?;

        let kind = if self.media_metadata.video.is_some() {
            MediaKind::Video
        } else {
            MediaKind::Photo
        };

        let dimensions = match (&self.media_metadata.width, &self.media_metadata.height) {
            (Some(w), Some(h)) => match (w.parse::<u32>(), h.parse::<u32>()) {
                (Ok(width), Ok(height)) => Some(Dimensions { width, height }),
                _ => None,
            },
            _ => None,
        };

        let download_url = shape_download_url(&self.base_url, kind, dimensions);

        Ok(RemoteItem {
            id: self.id,
            filename: self.filename,
            created_at,
            kind,
            dimensions,
            download_url,
        })
    }
}

/// The base URL serves renders by default; suffix parameters select the full
/// bytes: `=dv` for video, `=w{width}-h{height}-d` for photos.
fn shape_download_url(base_url: &str, kind: MediaKind, dimensions: Option<Dimensions>) -> String {
    match kind {
        MediaKind::Video => format!("{base_url}=dv"),
        MediaKind::Photo => {
            let (width, height) = dimensions
                .map(|d| (d.width, d.height))
                .unwrap_or((DEFAULT_RENDER_DIM, DEFAULT_RENDER_DIM));
            format!("{base_url}=w{width}-h{height}-d")
        }
    }
}

/// Creation times arrive as RFC3339, with or without fractional seconds.
fn parse_creation_time(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad creation time '{raw}': {e}"))
}

/// Plain HTTP byte fetcher for shaped download URLs.
///
/// Download URLs are pre-authorized capabilities; no bearer token is sent.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FetchClient for HttpFetcher {
    async fn content_length(&self, item: &RemoteItem) -> Result<Option<u64>, DownloadError> {
        let response = self
            .http
            .head(&item.download_url)
            .send()
            .await
            .map_err(|e| DownloadError::Transfer {
                url: item.download_url.clone(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                url: item.download_url.clone(),
            });
        }
        Ok(response.content_length())
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<FetchResponse, DownloadError> {
        let url = item.download_url.clone();
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DownloadError::Transfer {
                url: url.clone(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let declared_len = response.content_length();
        let stream: ByteStream = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| DownloadError::Transfer {
                    url: url.clone(),
                    source: e,
                })
            })
            .boxed();

        Ok(FetchResponse {
            declared_len,
            stream,
        })
    }
}
