//! Rate limiting, fan-out and group orchestration
//!
//! # Overview
//!
//! The downloader turns one group reference into a directory of tracks:
//!
//! 1. **Listing**: Page through the group with [`crate::fetcher::Paginator`]
//! 2. **Manifest**: Persist the listing with [`crate::output::manifest`]
//! 3. **Fan-Out**: Download every track under a concurrency ceiling with [`fanout::FanOut`]
//! 4. **Upload**: Optionally hand the files to a [`crate::upload::UploadSink`]
//!
//! [`executor::DownloadExecutor`] drives the steps; [`rate_limit::BudgetLimiter`]
//! caps operations per interval wherever it is wired in.
//!
//! # Error Handling
//!
//! All operations return `Result<T, DownloadError>`. Errors are categorized by type:
//! - Cancellation (a deadline or Ctrl+C, never retried)
//! - Authorization expiry (surfaced unchanged so the caller can refresh)
//! - Collaborator failures (transient ones are retried below this layer)
//! - Output and validation errors (not retried)

pub mod config;
pub mod executor;
pub mod fanout;
pub mod job;
pub mod rate_limit;

pub use config::{BudgetConfig, DownloadConfig, JitterRange};
pub use executor::DownloadExecutor;
pub use fanout::FanOut;
pub use job::{GroupJob, JobProgress, JobStatus};
pub use rate_limit::{BudgetLimiter, RateLimitError};

use crate::fetcher::FetcherError;
use crate::output::OutputError;

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Group was cancelled before completion
    #[error("download cancelled")]
    Cancelled,

    /// Remote API rejected the token
    #[error("authorization expired")]
    AuthorizationExpired,

    /// Collaborator failure
    #[error("fetcher error: {0}")]
    Fetch(FetcherError),

    /// Output error
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Rate limit error
    #[error("rate limit error: {0}")]
    RateLimit(RateLimitError),

    /// A download worker panicked or was aborted
    #[error("worker error: {0}")]
    Worker(String),
}

impl DownloadError {
    /// Whether this is a cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    /// Whether the remote API rejected the token
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, DownloadError::AuthorizationExpired)
    }
}

impl From<FetcherError> for DownloadError {
    fn from(e: FetcherError) -> Self {
        match e {
            FetcherError::Cancelled => DownloadError::Cancelled,
            FetcherError::AuthorizationExpired => DownloadError::AuthorizationExpired,
            other => DownloadError::Fetch(other),
        }
    }
}

impl From<RateLimitError> for DownloadError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Cancelled => DownloadError::Cancelled,
            other => DownloadError::RateLimit(other),
        }
    }
}
