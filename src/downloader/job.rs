//! Group job structures and status tracking

use crate::identifier::GroupRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One group download request and its live state
#[derive(Debug, Clone)]
pub struct GroupJob {
    /// Group being downloaded
    pub group: GroupRef,
    /// Directory the group's files are written to
    pub output_dir: PathBuf,
    /// Current job status
    pub status: JobStatus,
    /// Job progress tracking
    pub progress: JobProgress,
}

impl GroupJob {
    /// Create a pending job
    pub fn new(group: GroupRef, output_dir: PathBuf) -> Self {
        Self {
            group,
            output_dir,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
        }
    }

    /// Move to the next stage, stamping the start time on first transition
    pub fn advance(&mut self, status: JobStatus) {
        if self.progress.started_at.is_none() {
            self.progress.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            self.progress.finished_at = Some(Utc::now());
        }
        self.status = status;
    }

    /// Mark the job failed with `error`
    pub fn fail(&mut self, error: impl ToString) {
        self.progress.error = Some(error.to_string());
        self.advance(JobStatus::Failed);
    }
}

/// Group job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job has not started yet
    #[default]
    Pending,
    /// Paginating the group listing
    Listing,
    /// Tracks are being downloaded
    Downloading,
    /// Tracks are being re-uploaded
    Uploading,
    /// Job completed successfully
    Completed,
    /// Job failed with error
    Failed,
    /// Job was cancelled
    Cancelled,
}

impl JobStatus {
    /// Whether no further transitions happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Group progress tracking
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobProgress {
    /// Entry total announced by the server
    pub declared_total: usize,
    /// Tracks discovered by pagination
    pub items_total: usize,
    /// Tracks downloaded
    pub items_downloaded: usize,
    /// Tracks re-uploaded
    pub items_uploaded: usize,
    /// Pages requested
    pub pages_fetched: usize,
    /// Non-track entries skipped
    pub skipped: usize,
    /// Path of the manifest written for this group
    pub manifest_path: Option<PathBuf>,
    /// When the job left `Pending`
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message if job failed
    pub error: Option<String>,
}

impl JobProgress {
    /// Download percentage (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        if self.items_total == 0 {
            100.0
        } else {
            (self.items_downloaded as f64 / self.items_total as f64) * 100.0
        }
    }

    /// Check if every discovered track was downloaded
    pub fn is_complete(&self) -> bool {
        self.items_downloaded >= self.items_total
    }

    /// Wall-clock duration between start and finish, if both are known
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}
