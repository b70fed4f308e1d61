//! Pagination over remote collections
//!
//! Turns the server's page stream into one ordered, fully materialized list of
//! tracks. Pages are requested by zero-based index until either:
//! - a page comes back with no entries at all, or
//! - the remaining count (`declared_total - entries seen so far`) drops to zero
//!   or below.
//!
//! The empty-page rule wins over any remaining count, so a server whose totals
//! disagree with what it actually returns cannot keep us looping. A hard
//! iteration ceiling backs this up.
//!
//! Entries whose type tag is not `"track"` count towards the remaining
//! arithmetic but are dropped from the output. Page failures abort immediately;
//! retrying a page is the collaborator's business.

use crate::fetcher::{ContentClient, FetcherError, FetcherResult};
use crate::identifier::GroupRef;
use crate::Item;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum number of pages requested for one group
const MAX_ITERATIONS: usize = 10_000;

/// Remaining entry count after `seen` entries of a collection announced as `declared_total`
///
/// Negative when the server returned more than it announced.
pub fn remaining(declared_total: usize, seen: usize) -> i64 {
    declared_total as i64 - seen as i64
}

/// Result of exhausting a group's pages
#[derive(Debug, Clone, Default)]
pub struct PaginatedGroup {
    /// Tracks in page order, then within-page order
    pub items: Vec<Item>,
    /// Total announced by the last page received
    pub declared_total: usize,
    /// Number of page requests that succeeded
    pub pages_fetched: usize,
    /// Entries returned across all pages, tracks or not
    pub entries_seen: usize,
    /// Entries dropped because their type tag was not a track
    pub skipped: usize,
}

/// Pages through one group using a [`ContentClient`]
pub struct Paginator<'a, C: ContentClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: ContentClient + ?Sized> Paginator<'a, C> {
    /// Create a paginator over `client`
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Request pages of `group` until the collection is exhausted
    ///
    /// # Errors
    /// Returns the first page error unchanged, [`FetcherError::Cancelled`] when
    /// `cancel` fires, or an API error if the iteration ceiling is hit.
    pub async fn collect(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
    ) -> FetcherResult<PaginatedGroup> {
        let mut result = PaginatedGroup::default();
        let mut page_index = 0;

        loop {
            if page_index >= MAX_ITERATIONS {
                return Err(FetcherError::ApiError(format!(
                    "Max iterations ({MAX_ITERATIONS}) exceeded for group {group} - possible infinite loop. Entries seen: {}",
                    result.entries_seen
                )));
            }

            if cancel.is_cancelled() {
                return Err(FetcherError::Cancelled);
            }

            debug!(group = %group, page = page_index, "Fetching page");

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetcherError::Cancelled),
                page = self.client.fetch_page(cancel, group, page_index) => page?,
            };

            result.pages_fetched += 1;
            result.declared_total = page.declared_total;
            crate::metrics::record_page_fetched(group.kind());

            if page.items.is_empty() {
                debug!(
                    group = %group,
                    page = page_index,
                    collected = result.items.len(),
                    "Empty page received"
                );
                break;
            }

            result.entries_seen += page.items.len();
            let remaining = remaining(page.declared_total, result.entries_seen);

            for raw in page.items {
                let position = result.items.len();
                match raw.into_item(group.id(), position)? {
                    Some(item) => result.items.push(item),
                    None => result.skipped += 1,
                }
            }

            debug!(
                group = %group,
                page = page_index,
                collected = result.items.len(),
                remaining,
                "Page processed"
            );

            if remaining <= 0 {
                break;
            }

            page_index += 1;
        }

        debug!(
            group = %group,
            pages = result.pages_fetched,
            items = result.items.len(),
            skipped = result.skipped,
            "Pagination completed"
        );

        Ok(result)
    }
}
