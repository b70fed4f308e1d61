//! Group manifest persistence
//!
//! The manifest is a JSON array with one object per track, in discovery order.
//! It is written create-truncate, flushed and fsynced before the handle is
//! closed. A file cut short by a crash is not a valid JSON array and fails to
//! decode, so a partial listing can never be mistaken for a complete one.

use super::{OutputError, OutputResult};
use crate::Item;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Maximum accepted manifest size (16 MB) to prevent memory exhaustion
pub const MAX_MANIFEST_SIZE: u64 = 16 * 1024 * 1024;

/// One track as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Track identifier
    pub id: String,
    /// Parent group identifier
    pub group_id: String,
    /// Duration in seconds
    pub duration: u32,
    /// Track title
    pub title: String,
    /// Main artist name
    pub artist: String,
    /// Cover art reference
    pub cover: Option<String>,
    /// Version suffix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl From<&Item> for ManifestEntry {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            group_id: item.group_id.clone(),
            duration: item.duration,
            title: item.title.clone(),
            artist: item.artist.clone(),
            cover: item.cover.clone(),
            version: item.version.clone(),
        }
    }
}

/// Write the manifest for `items` to `path`
///
/// Blocking; run it on a blocking thread from async code.
pub fn write_manifest(path: &Path, items: &[Item]) -> OutputResult<()> {
    debug!(path = %path.display(), items = items.len(), "Writing manifest");

    let entries: Vec<ManifestEntry> = items.iter().map(ManifestEntry::from).collect();
    let json = serde_json::to_vec_pretty(&entries)
        .map_err(|e| OutputError::SerializationError(e.to_string()))?;

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| {
            OutputError::IoError(format!("Failed to create {}: {}", path.display(), e))
        })?;

    let mut writer = BufWriter::new(file);
    writer
        .write_all(&json)
        .map_err(|e| OutputError::IoError(format!("Failed to write manifest: {e}")))?;
    writer
        .flush()
        .map_err(|e| OutputError::IoError(format!("Failed to flush manifest: {e}")))?;

    let file = writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to flush manifest: {e}")))?;
    file.sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync manifest: {e}")))?;
    drop(file);

    info!(path = %path.display(), items = entries.len(), "Manifest written");
    Ok(())
}

/// Read and decode a manifest
///
/// # Errors
/// [`OutputError::InvalidManifest`] if the file is not a complete manifest.
pub fn read_manifest(path: &Path) -> OutputResult<Vec<ManifestEntry>> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        OutputError::IoError(format!("Failed to stat {}: {}", path.display(), e))
    })?;
    if metadata.len() > MAX_MANIFEST_SIZE {
        return Err(OutputError::InvalidManifest {
            path: path.display().to_string(),
            reason: format!(
                "manifest is {} bytes, larger than {MAX_MANIFEST_SIZE}",
                metadata.len()
            ),
        });
    }

    let contents = std::fs::read(path).map_err(|e| {
        OutputError::IoError(format!("Failed to read {}: {}", path.display(), e))
    })?;

    serde_json::from_slice(&contents).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to decode manifest");
        OutputError::InvalidManifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    })
}
