//! Output layout and manifest persistence

pub mod manifest;
pub mod path;

pub use manifest::{read_manifest, write_manifest, ManifestEntry};
pub use path::OutputPathBuilder;

/// Fixed name of the manifest file inside every group directory
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Manifest could not be decoded
    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest {
        /// Manifest path
        path: String,
        /// Decoder message
        reason: String,
    },
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
