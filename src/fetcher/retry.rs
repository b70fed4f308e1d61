//! Client-level retry policy
//!
//! [`Retrying`] wraps any collaborator and repeats calls that failed with a
//! transient error (HTTP 429, 5xx, transport failures), sleeping with
//! exponential backoff in between. Authorization expiry, cancellation and
//! every other error are returned on first sight.
//!
//! Backoff sleeps observe the cancellation token.

use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::downloader::config::{calculate_backoff, MAX_RETRIES};
use crate::fetcher::{ContentClient, FetcherError, FetcherResult, ItemDownloader, Page};
use crate::identifier::GroupRef;
use crate::Item;

/// Retry decorator for [`ContentClient`] and [`ItemDownloader`]
#[derive(Debug, Clone)]
pub struct Retrying<C> {
    inner: C,
    max_retries: u32,
}

impl<C> Retrying<C> {
    /// Wrap `inner` with the default retry budget
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_retries: MAX_RETRIES,
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Maximum number of retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wrapped collaborator
    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, cancel: &CancellationToken, what: &str, mut call: F) -> FetcherResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetcherResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(what, attempt = attempt + 1, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = calculate_backoff(attempt);
                    warn!(
                        what,
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        backoff_ms = backoff.as_millis(),
                        "Transient failure, retrying after backoff"
                    );
                    crate::metrics::record_retry_backoff(backoff, attempt + 1);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FetcherError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<C: ContentClient> ContentClient for Retrying<C> {
    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
        page_index: usize,
    ) -> FetcherResult<Page> {
        self.run(cancel, "page", || self.inner.fetch_page(cancel, group, page_index))
            .await
    }
}

#[async_trait]
impl<C: ItemDownloader> ItemDownloader for Retrying<C> {
    async fn download_item(
        &self,
        cancel: &CancellationToken,
        item: &Item,
        destination: &Path,
    ) -> FetcherResult<()> {
        self.run(cancel, "item", || self.inner.download_item(cancel, item, destination))
            .await
    }
}
