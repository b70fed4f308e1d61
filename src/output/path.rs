//! Deterministic path generation for group output
//!
//! Every group owns one directory: `{root}/{kind}/{id}/`. Inside it:
//!
//! - `manifest.json` - the ordered track listing
//! - `{position:03}-{track id}.{extension}` - one file per downloaded track
//!
//! Paths depend only on group and item identity, so a rerun overwrites the
//! previous run's files instead of adding to them.
//!
//! # Usage Example
//!
//! ```rust
//! use mix_downloader::identifier::GroupRef;
//! use mix_downloader::output::OutputPathBuilder;
//! use std::path::PathBuf;
//!
//! let group = GroupRef::parse("album:77646168").unwrap();
//! let builder = OutputPathBuilder::new(PathBuf::from("data"), &group);
//!
//! assert_eq!(builder.group_dir(), PathBuf::from("data/album/77646168"));
//! ```

use super::{OutputError, OutputResult, MANIFEST_FILE_NAME};
use crate::identifier::GroupRef;
use crate::Item;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path builder for one group's output directory
#[derive(Debug, Clone)]
pub struct OutputPathBuilder {
    root_dir: PathBuf,
    kind: String,
    group_id: String,
    extension: String,
}

impl OutputPathBuilder {
    /// Create a new path builder
    ///
    /// # Arguments
    ///
    /// * `root_dir` - Root data directory (e.g., "data" or "/var/data")
    /// * `group` - Group whose files are laid out
    pub fn new(root_dir: PathBuf, group: &GroupRef) -> Self {
        Self {
            root_dir,
            kind: group.kind().to_string(),
            group_id: sanitize_component(group.id()),
            extension: "flac".to_string(),
        }
    }

    /// Set the extension of track files
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Directory exclusively owned by the group
    pub fn group_dir(&self) -> PathBuf {
        self.root_dir.join(&self.kind).join(&self.group_id)
    }

    /// Manifest location
    pub fn manifest_path(&self) -> PathBuf {
        self.group_dir().join(MANIFEST_FILE_NAME)
    }

    /// Destination of one track
    pub fn item_path(&self, item: &Item) -> PathBuf {
        self.group_dir().join(format!(
            "{:03}-{}.{}",
            item.position,
            sanitize_component(&item.id),
            self.extension
        ))
    }

    /// Remove whatever is at the group directory, then create it empty
    pub fn reset_group_dir(&self) -> OutputResult<PathBuf> {
        let dir = self.group_dir();
        remove_existing(&dir)?;

        std::fs::create_dir_all(&dir).map_err(|e| {
            OutputError::IoError(format!(
                "Failed to create directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(dir)
    }
}

fn remove_existing(path: &Path) -> OutputResult<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(OutputError::IoError(e.to_string())),
    };

    debug!(path = %path.display(), "Removing previous group output");

    let removed = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    removed.map_err(|e| {
        OutputError::IoError(format!("Failed to remove {}: {}", path.display(), e))
    })
}

/// Sanitize an identifier for use as a single path component
///
/// Prevents path traversal by replacing:
/// - `/`, `\`, `:` → `_` (directory separators)
/// - `..` → `__` (parent directory reference)
///
/// Preserves case (remote ids are case-sensitive).
fn sanitize_component(name: &str) -> String {
    name.replace("..", "__").replace(['/', '\\', ':'], "_")
}
