//! Paginated history and its merge with in-flight local jobs.
//!
//! The backend is the source of truth for everything it has persisted, but
//! jobs that are still Pending, Queued or Processing locally may not be in
//! the first page yet (or at all, if the creation request has not settled).
//! Merging keeps those in front of the page and folds every page record into
//! the local copy of the same job so that status never moves backward.

use std::collections::HashSet;

use genqueue_client::api::GenerationPage;
use genqueue_core::job::GenerationJob;
use genqueue_core::output::AssetUrls;

use crate::store::JobStore;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// One decoded page of history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub offset: usize,
    /// Number of records the backend returned, including any that failed to
    /// decode.
    pub returned: usize,
    pub items: Vec<GenerationJob>,
    pub has_more: bool,
}

impl HistoryPage {
    /// Decode a page of records. `has_more` is true when the backend
    /// returned a full page, counting rows that failed to decode.
    pub fn from_listing(
        listing: GenerationPage,
        offset: usize,
        page_size: usize,
        urls: &AssetUrls,
    ) -> Self {
        let returned = listing.returned.max(listing.records.len());
        let items = listing
            .records
            .into_iter()
            .filter_map(|record| {
                let id = record.id.clone();
                match record.into_job(urls) {
                    Ok(job) => Some(job),
                    Err(e) => {
                        tracing::warn!(job_id = %id, error = %e, "Skipping undecodable history record");
                        None
                    }
                }
            })
            .collect();

        Self {
            offset,
            returned,
            items,
            has_more: returned == page_size,
        }
    }
}

/// Paging position across `load_more` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    page_size: usize,
    next_offset: usize,
    has_more: bool,
}

impl HistoryCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            next_offset: 0,
            has_more: true,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Advance past a merged page. A first page resets the position.
    pub fn advance(&mut self, page: &HistoryPage) {
        self.next_offset = page.offset + page.returned;
        self.has_more = page.has_more;
    }
}

/// Merge the first page of history into the store.
///
/// - Non-empty page: in-flight local jobs missing from the page, in their
///   current order, followed by the page.
/// - Empty page: only the in-flight local jobs remain (none at all if there
///   are none).
///
/// Page records whose id is already known are folded into the local copy,
/// so a record that lags behind applied events does not regress it.
pub fn merge_first_page(store: &mut JobStore, page: HistoryPage) {
    let in_flight: Vec<GenerationJob> = store
        .iter()
        .filter(|job| job.status().is_in_flight())
        .cloned()
        .collect();

    if page.items.is_empty() {
        tracing::debug!(kept = in_flight.len(), "Empty history page, keeping in-flight jobs");
        store.replace_all(in_flight);
        return;
    }

    let page_ids: HashSet<&str> = page.items.iter().map(|job| job.id()).collect();
    let mut merged: Vec<GenerationJob> = in_flight
        .into_iter()
        .filter(|job| !page_ids.contains(job.id()))
        .collect();
    let local_only = merged.len();

    merged.extend(page.items.iter().map(|record| fold(store, record)));

    tracing::debug!(
        local_only,
        fetched = page.items.len(),
        has_more = page.has_more,
        "Merged first history page",
    );
    store.replace_all(merged);
}

/// Append a later page, dropping ids already present. Returns how many jobs
/// were added.
pub fn append_page(store: &mut JobStore, page: HistoryPage) -> usize {
    let fetched = page.items.len();
    let added = page.items.into_iter().filter(|job| store.append(job.clone())).count();
    tracing::debug!(offset = page.offset, fetched, added, "Appended history page");
    added
}

fn fold(store: &JobStore, record: &GenerationJob) -> GenerationJob {
    match store.get(record.id()) {
        Some(local) => {
            let mut folded = local.clone();
            folded.absorb(record.clone());
            folded
        }
        None => record.clone(),
    }
}
