//! Download configuration
//!
//! Runtime knobs for one orchestrator instance, plus the retry backoff schedule
//! shared by the HTTP retry layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of retries for transient collaborator failures.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Maximum number of concurrent track downloads per group
pub const MAX_CONCURRENCY: usize = 32;

/// Default number of concurrent track downloads per group
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default lower bound of the per-track pacing delay
pub const DEFAULT_JITTER_MIN_MS: u64 = 500;

/// Default upper bound of the per-track pacing delay
pub const DEFAULT_JITTER_MAX_MS: u64 = 2000;

/// Default number of entries requested per page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default downloads admitted per budget interval
pub const DEFAULT_BUDGET_CAP: u32 = 20;

/// Default budget interval
pub const DEFAULT_BUDGET_INTERVAL: Duration = Duration::from_secs(66);

/// Default minimum gap between two budgeted sends
pub const DEFAULT_BUDGET_SPACING: Duration = Duration::from_millis(250);

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}

/// Inclusive range of the random delay each fan-out task sleeps before starting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterRange {
    /// Lower bound
    pub min: Duration,
    /// Upper bound (inclusive)
    pub max: Duration,
}

impl JitterRange {
    /// Build a range, swapping the bounds if given in the wrong order
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay at all
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Pick a delay uniformly from the range
    pub fn sample(&self) -> Duration {
        use rand::Rng;

        if self.min == self.max {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for JitterRange {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_JITTER_MIN_MS),
            Duration::from_millis(DEFAULT_JITTER_MAX_MS),
        )
    }
}

/// Interval budget settings for a [`crate::downloader::BudgetLimiter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Units admitted per interval
    pub cap: u32,
    /// Interval length
    pub interval: Duration,
    /// Minimum gap between two admitted sends
    pub spacing: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cap: DEFAULT_BUDGET_CAP,
            interval: DEFAULT_BUDGET_INTERVAL,
            spacing: DEFAULT_BUDGET_SPACING,
        }
    }
}

/// Per-run configuration of the group orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Concurrent track downloads per group
    pub concurrency: usize,
    /// Per-track pacing delay
    pub jitter: JitterRange,
    /// Entries requested per page
    pub page_size: usize,
    /// Extension given to downloaded track files
    pub file_extension: String,
    /// Optional budget for track downloads (one unit per track)
    pub download_budget: Option<BudgetConfig>,
    /// Retries for transient collaborator failures
    pub max_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            jitter: JitterRange::default(),
            page_size: DEFAULT_PAGE_SIZE,
            file_extension: "flac".to_string(),
            download_budget: Some(BudgetConfig::default()),
            max_retries: MAX_RETRIES,
        }
    }
}

impl DownloadConfig {
    /// Set the fan-out concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-track pacing delay
    pub fn with_jitter(mut self, jitter: JitterRange) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set or clear the download budget
    pub fn with_download_budget(mut self, budget: Option<BudgetConfig>) -> Self {
        self.download_budget = budget;
        self
    }

    /// Set the track file extension
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Check every field is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            ));
        }

        if self.page_size == 0 {
            return Err("page size must be at least 1".to_string());
        }

        let extension = self.file_extension.as_str();
        if extension.is_empty()
            || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(format!("invalid file extension {extension:?}"));
        }

        if let Some(budget) = &self.download_budget {
            if budget.cap == 0 {
                return Err("budget cap must be at least 1".to_string());
            }
            if budget.interval.is_zero() {
                return Err("budget interval must be non-zero".to_string());
            }
        }

        Ok(())
    }
}
