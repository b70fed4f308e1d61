//! Group download executor
//!
//! Drives one group from reference to files on disk:
//!
//! 1. Reset the group directory (anything already there is removed)
//! 2. Paginate the full track listing
//! 3. Write the manifest
//! 4. Fan out the track downloads
//! 5. Optionally re-upload the downloaded files
//!
//! Failures in steps 1-3 return before any download starts. A fan-out failure is
//! returned as reported by the failing track. Nothing is retried at this level.

use crate::downloader::fanout::FanOut;
use crate::downloader::{DownloadConfig, DownloadError, GroupJob, JobProgress, JobStatus};
use crate::fetcher::{ContentClient, ItemDownloader, Paginator};
use crate::identifier::GroupRef;
use crate::metrics::{self, GroupMetrics};
use crate::output::{write_manifest, OutputPathBuilder};
use crate::upload::{BudgetedUploader, UploadFile};
use crate::{Group, Item};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

/// Download executor orchestrates the complete group workflow
pub struct DownloadExecutor {
    config: DownloadConfig,
    content: Arc<dyn ContentClient>,
    downloader: Arc<dyn ItemDownloader>,
    root_dir: PathBuf,
    uploader: Option<Arc<BudgetedUploader>>,
}

impl DownloadExecutor {
    /// Create a new executor writing groups below `root_dir`
    ///
    /// # Errors
    /// [`DownloadError::Validation`] if `config` is unusable.
    pub fn new(
        config: DownloadConfig,
        content: Arc<dyn ContentClient>,
        downloader: Arc<dyn ItemDownloader>,
        root_dir: impl Into<PathBuf>,
    ) -> Result<Self, DownloadError> {
        config.validate().map_err(DownloadError::Validation)?;

        Ok(Self {
            config,
            content,
            downloader,
            root_dir: root_dir.into(),
            uploader: None,
        })
    }

    /// Re-upload every fully downloaded group through `uploader`
    pub fn with_uploader(mut self, uploader: BudgetedUploader) -> Self {
        self.uploader = Some(Arc::new(uploader));
        self
    }

    /// Active configuration
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Output layout of `group`
    pub fn paths(&self, group: &GroupRef) -> OutputPathBuilder {
        OutputPathBuilder::new(self.root_dir.clone(), group)
            .with_extension(self.config.file_extension.clone())
    }

    /// Download every track of `group`
    ///
    /// # Errors
    /// - [`DownloadError::Cancelled`] when `cancel` fires
    /// - [`DownloadError::AuthorizationExpired`] when the API rejects the token
    /// - the first track or listing error otherwise
    pub async fn download_group(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
    ) -> Result<JobProgress, DownloadError> {
        let span = tracing::info_span!(
            "download_group",
            group = %group,
            concurrency = self.config.concurrency
        );

        async {
            let group_metrics = GroupMetrics::start(group.kind(), group.id());
            let paths = self.paths(group);
            let mut job = GroupJob::new(group.clone(), paths.group_dir());

            let result = self.run_job(cancel, &mut job, &paths).await;

            match &result {
                Ok(()) => {
                    job.advance(JobStatus::Completed);
                    group_metrics.record_success(job.progress.items_downloaded);
                }
                Err(e) if e.is_cancellation() => {
                    job.progress.error = Some(e.to_string());
                    job.advance(JobStatus::Cancelled);
                    group_metrics.record_failure(&e.to_string());
                }
                Err(e) => {
                    job.fail(e);
                    group_metrics.record_failure(&e.to_string());
                }
            }

            info!(
                status = ?job.status,
                items = job.progress.items_downloaded,
                "Group job finished"
            );

            result.map(|()| job.progress)
        }
        .instrument(span)
        .await
    }

    async fn run_job(
        &self,
        cancel: &CancellationToken,
        job: &mut GroupJob,
        paths: &OutputPathBuilder,
    ) -> Result<(), DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let reset = paths.clone();
        let output_dir = tokio::task::spawn_blocking(move || reset.reset_group_dir())
            .await
            .map_err(|e| DownloadError::Worker(e.to_string()))??;
        debug!(path = %output_dir.display(), "Group directory ready");

        job.advance(JobStatus::Listing);
        let listing = Paginator::new(self.content.as_ref())
            .collect(cancel, &job.group)
            .await?;

        for item in &listing.items {
            item.validate().map_err(DownloadError::Validation)?;
        }

        job.progress.pages_fetched = listing.pages_fetched;
        job.progress.declared_total = listing.declared_total;
        job.progress.skipped = listing.skipped;
        job.progress.items_total = listing.items.len();

        let group = Group {
            reference: job.group.clone(),
            output_dir,
            items: listing.items,
            declared_total: listing.declared_total,
        };

        info!(
            items = group.len(),
            declared_total = group.declared_total,
            skipped = listing.skipped,
            "Listing complete"
        );

        let manifest_path = paths.manifest_path();
        let manifest_items = group.items.clone();
        let target = manifest_path.clone();
        tokio::task::spawn_blocking(move || write_manifest(&target, &manifest_items))
            .await
            .map_err(|e| DownloadError::Worker(e.to_string()))??;
        job.progress.manifest_path = Some(manifest_path);

        job.advance(JobStatus::Downloading);
        job.progress.items_downloaded = self.fan_out(cancel, &group, paths).await?;

        if let Some(uploader) = &self.uploader {
            job.advance(JobStatus::Uploading);
            let files = group
                .items
                .iter()
                .map(|item| UploadFile {
                    item: item.clone(),
                    path: paths.item_path(item),
                })
                .collect();
            job.progress.items_uploaded =
                uploader.upload_group(cancel, &group.reference, files).await?;
        }

        Ok(())
    }

    async fn fan_out(
        &self,
        cancel: &CancellationToken,
        group: &Group,
        paths: &OutputPathBuilder,
    ) -> Result<usize, DownloadError> {
        let downloader = self.downloader.clone();
        let paths = paths.clone();
        let kind = group.kind();

        FanOut::from_config(&self.config)
            .run(cancel, group.items.clone(), move |token: CancellationToken, item: Item| {
                let downloader = downloader.clone();
                let destination = paths.item_path(&item);

                async move {
                    debug!(item_id = %item.id, position = item.position, "Downloading track");
                    match downloader.download_item(&token, &item, &destination).await {
                        Ok(()) => {
                            metrics::record_item_downloaded(kind);
                            Ok(())
                        }
                        Err(e) => {
                            if !e.is_cancellation() {
                                metrics::record_item_failed(kind);
                            }
                            Err(DownloadError::from(e))
                        }
                    }
                }
            })
            .await
    }
}
