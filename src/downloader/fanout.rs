//! Bounded fan-out over a group's tracks
//!
//! Runs one task per item with at most `concurrency` in flight. Every task sleeps
//! a freshly sampled jitter delay before starting its work. The first failure
//! cancels the group: items not yet dispatched are never started and in-flight
//! tasks see their token fire. All spawned tasks are joined before returning.
//!
//! When several items fail at nearly the same time, which error is reported
//! depends on completion order and is not deterministic.

use crate::downloader::config::{DownloadConfig, JitterRange};
use crate::downloader::DownloadError;
use crate::Item;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded-concurrency executor with first-error-cancels-siblings semantics
#[derive(Debug, Clone)]
pub struct FanOut {
    concurrency: usize,
    jitter: JitterRange,
}

impl FanOut {
    /// Create a fan-out running at most `concurrency` tasks at once
    ///
    /// A concurrency of zero is treated as one.
    pub fn new(concurrency: usize, jitter: JitterRange) -> Self {
        Self {
            concurrency: concurrency.max(1),
            jitter,
        }
    }

    /// Create a fan-out from the orchestrator configuration
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(config.concurrency, config.jitter)
    }

    /// Concurrency ceiling
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` for every item and return how many succeeded
    ///
    /// `task` receives a token derived from `cancel` that fires when the
    /// caller cancels or when a sibling fails. A task that is already past the
    /// point of no return may finish its current write before observing it.
    ///
    /// A panicking task counts as a failure: it cancels its siblings and is
    /// reported as [`DownloadError::Worker`].
    ///
    /// # Errors
    /// The first non-cancellation error reported by any task, otherwise
    /// [`DownloadError::Cancelled`] if `cancel` fired before every item ran.
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        items: Vec<Item>,
        task: F,
    ) -> Result<usize, DownloadError>
    where
        F: Fn(CancellationToken, Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DownloadError>> + Send + 'static,
    {
        let total = items.len();
        let group_cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let task = Arc::new(task);
        let mut workers = JoinSet::new();
        let mut dispatched = 0usize;

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = group_cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // A sibling may have failed while we waited for its permit.
            if group_cancel.is_cancelled() {
                break;
            }

            dispatched += 1;
            let delay = self.jitter.sample();
            let token = group_cancel.clone();
            let task = task.clone();

            workers.spawn(async move {
                let _permit = permit;

                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(DownloadError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }

                let item_id = item.id.clone();
                let work = AssertUnwindSafe(async { task(token.clone(), item).await });
                let result = match work.catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(DownloadError::Worker(format!(
                        "task for item {item_id} panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                };
                if let Err(e) = &result {
                    if !e.is_cancellation() {
                        warn!(item_id = %item_id, error = %e, "Item failed, cancelling group");
                    }
                    token.cancel();
                }
                result
            });
        }

        if dispatched < total {
            debug!(
                dispatched,
                skipped = total - dispatched,
                "Dispatch stopped early"
            );
        }

        let mut completed = 0usize;
        let mut first_error: Option<DownloadError> = None;
        let mut cancelled = false;

        while let Some(joined) = workers.join_next().await {
            let outcome = joined.unwrap_or_else(|join_error| {
                group_cancel.cancel();
                Err(DownloadError::Worker(join_error.to_string()))
            });

            match outcome {
                Ok(()) => completed += 1,
                Err(DownloadError::Cancelled) => cancelled = true,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        debug!(error = %e, "Discarding error reported after the first");
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        // A cancel landing after the last item finished changes nothing.
        if completed == total {
            return Ok(completed);
        }

        debug!(completed, total, cancelled, "Group cancelled before every item ran");
        Err(DownloadError::Cancelled)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
