//! Which job the user is looking at.
//!
//! A selection is either manual (the user picked a job, or stepped with
//! next/previous) or follows the latest completed job. Any manual action
//! turns following off; it only comes back through
//! [`Selection::set_follow_latest`].

use genqueue_core::status::JobStatus;
use genqueue_core::types::JobId;

use crate::store::JobStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    selected: Option<JobId>,
    follow_latest: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            selected: None,
            follow_latest: true,
        }
    }
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(selected: Option<JobId>, follow_latest: bool) -> Self {
        Self {
            selected,
            follow_latest,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn follow_latest(&self) -> bool {
        self.follow_latest
    }

    /// Manually select a job. Disables follow-latest.
    pub fn select(&mut self, id: impl Into<JobId>) {
        self.selected = Some(id.into());
        self.follow_latest = false;
    }

    /// Step one job older. Returns the new selection, or `None` when there
    /// is nothing selected or the selection is already the oldest job.
    pub fn next(&mut self, store: &JobStore) -> Option<JobId> {
        let index = self.current_index(store)?;
        self.step_to(store, index.checked_add(1)?)
    }

    /// Step one job newer. Same boundary rules as [`next`](Self::next).
    pub fn previous(&mut self, store: &JobStore) -> Option<JobId> {
        let index = self.current_index(store)?;
        self.step_to(store, index.checked_sub(1)?)
    }

    /// Turn follow-latest on or off. Turning it on re-evaluates immediately.
    pub fn set_follow_latest(&mut self, enabled: bool, store: &JobStore) -> bool {
        self.follow_latest = enabled;
        enabled && self.follow(store)
    }

    /// If following, select the most recent Completed job. Returns whether
    /// the selection changed.
    pub fn follow(&mut self, store: &JobStore) -> bool {
        if !self.follow_latest {
            return false;
        }
        let Some(latest) = store.iter().find(|job| job.status() == JobStatus::Completed) else {
            return false;
        };
        if self.selected.as_deref() == Some(latest.id()) {
            return false;
        }
        tracing::debug!(job_id = %latest.id(), "Following latest completed job");
        self.selected = Some(latest.id().to_string());
        true
    }

    /// Rewrite a provisional selection to its canonical id. A selection of
    /// a job that has left the list is kept; navigation from it is a no-op.
    pub fn reconcile(&mut self, store: &JobStore) {
        let canonical = self
            .selected
            .as_deref()
            .and_then(|selected| store.resolve_id(selected))
            .cloned();
        if canonical.is_some() {
            self.selected = canonical;
        }
    }

    fn current_index(&self, store: &JobStore) -> Option<usize> {
        store.position(self.selected.as_deref()?)
    }

    fn step_to(&mut self, store: &JobStore, index: usize) -> Option<JobId> {
        let id = store.job_at(index)?.id().to_string();
        self.select(id.clone());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{job, urls};

    /// Most recent first: c (completed), b (processing), a (completed).
    fn store() -> JobStore {
        let mut store = JobStore::new(urls());
        store.append(job("c", "completed", None));
        store.append(job("b", "processing", Some("pb")));
        store.append(job("a", "completed", None));
        store
    }

    #[test]
    fn select_disables_follow_latest() {
        let mut sel = Selection::new();
        assert!(sel.follow_latest());
        sel.select("b");
        assert_eq!(sel.selected(), Some("b"));
        assert!(!sel.follow_latest());
    }

    #[test]
    fn next_moves_older_and_previous_moves_newer() {
        let store = store();
        let mut sel = Selection::new();
        sel.select("c");

        assert_eq!(sel.next(&store).as_deref(), Some("b"));
        assert_eq!(sel.next(&store).as_deref(), Some("a"));
        assert_eq!(sel.previous(&store).as_deref(), Some("b"));
    }

    #[test]
    fn navigation_is_a_noop_at_boundaries() {
        let store = store();
        let mut sel = Selection::new();

        assert!(sel.next(&store).is_none());
        assert!(sel.previous(&store).is_none());
        assert!(sel.follow_latest());

        sel.select("a");
        assert!(sel.next(&store).is_none());
        assert_eq!(sel.selected(), Some("a"));

        sel.select("c");
        assert!(sel.previous(&store).is_none());
        assert_eq!(sel.selected(), Some("c"));
    }

    #[test]
    fn follow_picks_most_recent_completed() {
        let store = store();
        let mut sel = Selection::new();
        assert!(sel.follow(&store));
        assert_eq!(sel.selected(), Some("c"));
        assert!(!sel.follow(&store));
    }

    #[test]
    fn follow_is_inert_when_disabled() {
        let store = store();
        let mut sel = Selection::new();
        sel.select("a");
        assert!(!sel.follow(&store));
        assert_eq!(sel.selected(), Some("a"));

        assert!(sel.set_follow_latest(true, &store));
        assert_eq!(sel.selected(), Some("c"));
    }

    #[test]
    fn reconcile_rewrites_provisional_selection() {
        let mut store = JobStore::new(urls());
        let local = store.create_optimistic(5, Default::default());
        let mut sel = Selection::new();
        sel.select(local.clone());

        store
            .apply_server_record(&local, crate::store::tests::record("g1", "queued", None))
            .unwrap();
        sel.reconcile(&store);

        assert_eq!(sel.selected(), Some("g1"));
    }
}
