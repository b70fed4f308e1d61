//! Content collaborators and pagination
//!
//! The core never talks HTTP directly. It consumes two collaborator traits:
//!
//! - [`ContentClient`] - lists one page of a group's entries
//! - [`ItemDownloader`] - transfers one track to a destination path
//!
//! Both classify their failures into [`FetcherError`] so callers can branch on
//! authorization expiry and cancellation without looking at transport details.
//! [`http::ApiHttpClient`] implements both against the remote API and
//! [`retry::Retrying`] layers a retry policy over any implementation.

use crate::identifier::GroupRef;
use crate::Item;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub mod http;
pub mod pagination;
pub mod retry;

pub use pagination::{PaginatedGroup, Paginator};

/// Type tag of playable entries; everything else is skipped during pagination
pub const TRACK_TYPE_TAG: &str = "track";

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Token rejected by the remote API; refreshing it is the caller's job
    #[error("authorization expired")]
    AuthorizationExpired,

    /// Operation cancelled or deadline exceeded
    #[error("operation cancelled")]
    Cancelled,

    /// HTTP 429 rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// HTTP 5xx server error
    #[error("server error: HTTP {0}")]
    ServerError(u16),

    /// HTTP 4xx client error other than 401 and 429
    #[error("client error: HTTP {0}: {1}")]
    ClientError(u16, String),

    /// Network error (timeout, connection refused, reset)
    #[error("network error: {0}")]
    NetworkError(String),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Response decoded but is structurally unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// API reported an error or misbehaved
    #[error("API error: {0}")]
    ApiError(String),

    /// Local filesystem error while writing a download
    #[error("IO error: {0}")]
    Io(String),
}

impl FetcherError {
    /// Whether this is a cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetcherError::Cancelled)
    }

    /// Whether the remote API rejected the token
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, FetcherError::AuthorizationExpired)
    }

    /// Whether repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetcherError::RateLimitExceeded
                | FetcherError::ServerError(_)
                | FetcherError::NetworkError(_)
        )
    }
}

impl From<std::io::Error> for FetcherError {
    fn from(e: std::io::Error) -> Self {
        FetcherError::Io(e.to_string())
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One entry of a collection page, before type filtering
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    /// Server type tag ("track", "video", ...)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Entry payload; only decoded for tracks
    #[serde(default)]
    pub item: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackPayload {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    title: String,
    #[serde(default)]
    duration: u32,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    artist: Option<ArtistPayload>,
    #[serde(default)]
    artists: Vec<ArtistPayload>,
    #[serde(default)]
    album: Option<AlbumPayload>,
}

#[derive(Debug, Deserialize)]
struct ArtistPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumPayload {
    #[serde(default)]
    cover: Option<String>,
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

impl RawItem {
    /// Build a raw track entry (mostly useful for tests and fakes)
    pub fn track(payload: serde_json::Value) -> Self {
        Self {
            item_type: TRACK_TYPE_TAG.to_string(),
            item: payload,
        }
    }

    /// Whether the entry carries the playable track tag
    pub fn is_track(&self) -> bool {
        self.item_type == TRACK_TYPE_TAG
    }

    /// Convert a track entry into an [`Item`]
    ///
    /// Returns `Ok(None)` for non-track entries and an error when a track entry
    /// cannot be decoded.
    pub fn into_item(self, group_id: &str, position: usize) -> FetcherResult<Option<Item>> {
        if !self.is_track() {
            return Ok(None);
        }

        let payload: TrackPayload = serde_json::from_value(self.item)
            .map_err(|e| FetcherError::ParseError(format!("Failed to decode track entry: {e}")))?;

        let artist = payload
            .artist
            .or_else(|| payload.artists.into_iter().next())
            .map(|a| a.name)
            .unwrap_or_default();

        Ok(Some(Item {
            id: payload.id,
            position,
            title: payload.title,
            artist,
            duration: payload.duration,
            version: payload.version.filter(|v| !v.is_empty()),
            cover: payload.album.and_then(|a| a.cover),
            group_id: group_id.to_string(),
        }))
    }
}

/// One server response to a pagination request
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Entries on this page, in server order
    pub items: Vec<RawItem>,
    /// Total entry count announced by the server for the whole collection
    pub declared_total: usize,
}

/// Lists the entries of a remote collection one page at a time
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Fetch page `page_index` (zero-based) of `group`
    ///
    /// Implementations must report token rejection as
    /// [`FetcherError::AuthorizationExpired`] and cancellation as
    /// [`FetcherError::Cancelled`].
    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
        page_index: usize,
    ) -> FetcherResult<Page>;
}

/// Transfers the content of one track to disk
#[async_trait]
pub trait ItemDownloader: Send + Sync {
    /// Download `item` to `destination`
    ///
    /// Implementations must observe `cancel` between writes and must not leave a
    /// partially written file at `destination`.
    async fn download_item(
        &self,
        cancel: &CancellationToken,
        item: &Item,
        destination: &Path,
    ) -> FetcherResult<()>;
}
