//! CLI error types and conversions

use crate::downloader::DownloadError;
use crate::identifier::IdentifierError;
use crate::output::OutputError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Identifier error
    #[error("identifier error: {0}")]
    IdentifierError(#[from] IdentifierError),

    /// Download error
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Some groups failed without stopping the run
    #[error("{failed} of {total} group(s) failed")]
    GroupsFailed {
        /// Groups that failed
        failed: usize,
        /// Groups requested
        total: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
