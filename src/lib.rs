//! # Mix Downloader Library
//!
//! Downloads every track of a mix, album or playlist from a paginated media API,
//! under strict per-account rate limits, and optionally re-uploads the files to a
//! second service.
//!
//! ## Features
//!
//! - **Complete Listings**: Pages through a collection until the server has nothing
//!   left to give, filtering out non-track entries
//! - **Bounded Concurrency**: Downloads a group's tracks in parallel under a fixed
//!   ceiling, with randomized per-track pacing
//! - **First Error Wins**: One fatal track failure cancels the rest of the group
//! - **Interval Budgets**: Caps the number of operations per fixed interval
//! - **Crash-Safe Manifests**: The track listing is fsynced before downloads start
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mix_downloader::downloader::{DownloadConfig, DownloadExecutor};
//! use mix_downloader::fetcher::http::{ApiHttpClient, StaticToken};
//! use mix_downloader::identifier::GroupRef;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(ApiHttpClient::new(
//!     reqwest::Client::new(),
//!     "https://api.example.com/v1",
//!     Arc::new(StaticToken::new("token")),
//!     "US",
//! ));
//! let executor = DownloadExecutor::new(DownloadConfig::default(), client.clone(), client, "./data")?;
//!
//! let group = GroupRef::parse("mix:0123456789abcdef")?;
//! let progress = executor.download_group(&CancellationToken::new(), &group).await?;
//! println!("downloaded {} tracks", progress.items_downloaded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`identifier`] - `KIND:ID` group references
//! - [`fetcher`] - Collaborator traits, the paginator and the reference HTTP client
//! - [`downloader`] - Budget limiter, fan-out engine and the group orchestrator
//! - [`output`] - Deterministic output paths and the manifest file
//! - [`upload`] - Budgeted re-upload to a second service
//! - [`shutdown`] - Ctrl+C driven cancellation for the binary
//! - [`metrics`] - Prometheus metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Rate limiting, fan-out and group orchestration
pub mod downloader;

/// Content collaborators and pagination
pub mod fetcher;

/// Group reference parsing and validation
pub mod identifier;

/// Observability metrics
pub mod metrics;

/// Output paths and manifest persistence
pub mod output;

/// Graceful shutdown coordination
pub mod shutdown;

/// Re-upload of downloaded groups
pub mod upload;

pub use identifier::GroupRef;

/// Kind of collection a group refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Editorial or personalized mix
    Mix,
    /// Album release
    Album,
    /// User or editorial playlist
    Playlist,
}

impl GroupKind {
    /// Path segment of the collection endpoint ("mixes", "albums", "playlists")
    pub fn endpoint_segment(&self) -> &'static str {
        match self {
            GroupKind::Mix => "mixes",
            GroupKind::Album => "albums",
            GroupKind::Playlist => "playlists",
        }
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupKind::Mix => "mix",
            GroupKind::Album => "album",
            GroupKind::Playlist => "playlist",
        };
        write!(f, "{s}")
    }
}

impl FromStr for GroupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mix" => Ok(GroupKind::Mix),
            "album" => Ok(GroupKind::Album),
            "playlist" => Ok(GroupKind::Playlist),
            _ => Err(format!("Invalid group kind: {s}")),
        }
    }
}

/// One downloadable track within a group
///
/// Built once from a page entry and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    /// Opaque track identifier
    pub id: String,
    /// Zero-based position within the group, in discovery order
    pub position: usize,
    /// Track title
    pub title: String,
    /// Main artist name
    pub artist: String,
    /// Duration in seconds
    pub duration: u32,
    /// Optional version suffix (e.g. "Remastered 2011")
    pub version: Option<String>,
    /// Cover art reference
    pub cover: Option<String>,
    /// Identifier of the parent group
    pub group_id: String,
}

impl Item {
    /// Title with the version suffix appended, when there is one
    pub fn display_title(&self) -> String {
        match self.version.as_deref() {
            Some(version) if !version.is_empty() => format!("{} ({})", self.title, version),
            _ => self.title.clone(),
        }
    }

    /// Validate item data integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Item id cannot be empty".to_string());
        }

        if self.group_id.is_empty() {
            return Err(format!("Item {} has no group id", self.id));
        }

        Ok(())
    }
}

/// A materialized download request: every track of one mix, album or playlist
#[derive(Debug, Clone)]
pub struct Group {
    /// Reference the group was requested by
    pub reference: GroupRef,
    /// Directory owned by this group for the duration of the run
    pub output_dir: PathBuf,
    /// Tracks in page order
    pub items: Vec<Item>,
    /// Entry count announced by the server (may exceed `items.len()`)
    pub declared_total: usize,
}

impl Group {
    /// Group identifier
    pub fn id(&self) -> &str {
        self.reference.id()
    }

    /// Kind of the group
    pub fn kind(&self) -> GroupKind {
        self.reference.kind()
    }

    /// Number of tracks discovered
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no tracks were discovered
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
