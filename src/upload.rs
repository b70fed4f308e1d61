//! Re-upload of downloaded groups
//!
//! The second service is an external collaborator behind [`UploadSink`].
//! [`BudgetedUploader`] charges every send against a [`BudgetLimiter`]:
//!
//! - albums go out as batches, each batch costing one unit per track
//! - mixes and playlists go out one track per send, one unit each
//!
//! Album batches never exceed the limiter's cap, so every send is admittable.

use crate::downloader::{BudgetLimiter, DownloadError};
use crate::fetcher::FetcherResult;
use crate::identifier::GroupRef;
use crate::{GroupKind, Item};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One downloaded track ready to be sent
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Track metadata
    pub item: Item,
    /// Downloaded file
    pub path: PathBuf,
}

/// Destination service for downloaded tracks
///
/// Failures follow the same classification as the content collaborators.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Send `files` belonging to `group` as one operation
    async fn upload(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
        files: &[UploadFile],
    ) -> FetcherResult<()>;
}

/// Upload driver that respects an interval budget
pub struct BudgetedUploader {
    sink: Arc<dyn UploadSink>,
    limiter: Arc<BudgetLimiter>,
}

impl BudgetedUploader {
    /// Create an uploader sending to `sink` under `limiter`
    pub fn new(sink: Arc<dyn UploadSink>, limiter: Arc<BudgetLimiter>) -> Self {
        Self { sink, limiter }
    }

    /// Shared limiter
    pub fn limiter(&self) -> &Arc<BudgetLimiter> {
        &self.limiter
    }

    /// Send every file of `group` and return how many were sent
    pub async fn upload_group(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
        files: Vec<UploadFile>,
    ) -> Result<usize, DownloadError> {
        let batch_size = match group.kind() {
            GroupKind::Album => self.limiter.cap().max(1) as usize,
            GroupKind::Mix | GroupKind::Playlist => 1,
        };

        let mut sent = 0;
        for batch in files.chunks(batch_size) {
            let units = batch.len() as u32;
            debug!(group = %group, units, "Submitting upload");

            self.limiter
                .submit(cancel, units, || self.sink.upload(cancel, group, batch))
                .await??;

            sent += batch.len();
        }

        info!(group = %group, files = sent, "Group uploaded");
        Ok(sent)
    }
}
