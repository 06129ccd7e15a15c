//! All engine state behind a single owner.
//!
//! [`EngineState`] is synchronous and owns no I/O: each method applies one
//! mutation to completion and returns what the caller must do next (a
//! request to send, bus events to publish). The service actor is the only
//! caller in production; tests drive it directly.

use std::collections::HashSet;

use genqueue_client::api::GenerationPage;
use genqueue_client::messages::StreamMessage;
use genqueue_core::error::CoreError;
use genqueue_core::inputs::InputPatch;
use genqueue_core::job::GenerationJob;
use genqueue_core::output::AssetUrls;
use genqueue_core::record::GenerationRecord;
use genqueue_core::snapshot::PersistedState;
use genqueue_core::types::{JobId, NodeId, WorkflowId};
use genqueue_core::workflow::WorkflowSelection;
use genqueue_events::PlatformEvent;

use crate::dispatch::{self, Dispatch};
use crate::error::{EngineError, EngineResult};
use crate::history::{self, HistoryCursor, HistoryPage};
use crate::selection::Selection;
use crate::store::{JobStore, Transition, TransitionKind};
use crate::submission::{self, Submission};

pub struct EngineState {
    store: JobStore,
    workflows: WorkflowSelection,
    selection: Selection,
    cursor: HistoryCursor,
    queue_remaining: u32,
    /// Workflow that was active when the state was saved; the editor
    /// re-activates it with the current node-id set.
    restored_workflow: Option<WorkflowId>,
}

impl EngineState {
    pub fn new(urls: AssetUrls, page_size: usize) -> Self {
        Self {
            store: JobStore::new(urls),
            workflows: WorkflowSelection::new(),
            selection: Selection::new(),
            cursor: HistoryCursor::new(page_size),
            queue_remaining: 0,
            restored_workflow: None,
        }
    }

    /// Rebuild from a saved snapshot. The job list starts empty and is
    /// filled from history.
    pub fn from_persisted(urls: AssetUrls, page_size: usize, saved: PersistedState) -> Self {
        Self {
            store: JobStore::new(urls),
            workflows: WorkflowSelection::from_cache(saved.workflow_inputs),
            selection: Selection::restore(saved.selected_job_id, saved.follow_latest),
            cursor: HistoryCursor::new(page_size),
            queue_remaining: 0,
            restored_workflow: saved.active_workflow_id,
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            active_workflow_id: self.workflows.active_id().or(self.restored_workflow),
            workflow_inputs: self.workflows.all_inputs(),
            selected_job_id: self.selection.selected().map(str::to_string),
            follow_latest: self.selection.follow_latest(),
        }
    }

    // ---- accessors ----

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn workflows(&self) -> &WorkflowSelection {
        &self.workflows
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn cursor(&self) -> &HistoryCursor {
        &self.cursor
    }

    pub fn queue_remaining(&self) -> u32 {
        self.queue_remaining
    }

    pub fn restored_workflow(&self) -> Option<WorkflowId> {
        self.restored_workflow
    }

    pub fn get(&self, id: &str) -> Option<&GenerationJob> {
        self.store.get(id)
    }

    pub fn list(&self) -> Vec<GenerationJob> {
        self.store.list()
    }

    // ---- workflow and inputs ----

    pub fn activate_workflow(&mut self, id: WorkflowId, node_ids: HashSet<NodeId>) {
        tracing::debug!(workflow_id = id, nodes = node_ids.len(), "Activating workflow");
        self.workflows.activate(id, node_ids);
        self.restored_workflow = None;
    }

    pub fn set_input(&mut self, patch: InputPatch) -> EngineResult<()> {
        self.workflows
            .set_input(patch.node_id, patch.field, patch.value)?;
        Ok(())
    }

    // ---- submission ----

    /// Insert an optimistic job; the returned request must be sent and its
    /// outcome passed to [`confirm_submission`](Self::confirm_submission) or
    /// [`fail_submission`](Self::fail_submission).
    pub fn begin_submission(&mut self, patch: Option<&InputPatch>) -> EngineResult<Submission> {
        Ok(submission::begin(&mut self.workflows, &mut self.store, patch)?)
    }

    pub fn confirm_submission(&mut self, job_id: &str, record: GenerationRecord) -> EngineResult<JobId> {
        let canonical = submission::confirm(&mut self.store, job_id, record)?;
        self.selection.reconcile(&self.store);
        Ok(canonical)
    }

    /// Mark the job Failed; returns the `job:error` notification.
    pub fn fail_submission(&mut self, job_id: &str, error: &EngineError) -> Vec<PlatformEvent> {
        submission::fail(&mut self.store, job_id, error)
            .and_then(|transition| dispatch::notification(&transition))
            .into_iter()
            .collect()
    }

    /// Replay a job's inputs into the editor and submit a fresh job.
    ///
    /// The job must come from the active workflow; otherwise nothing is
    /// created and the current inputs are left alone. The original job is
    /// never modified.
    pub fn retry(&mut self, job_id: &str) -> EngineResult<Submission> {
        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        let active = self.workflows.active_id().ok_or(CoreError::NoActiveWorkflow)?;

        if job.workflow_id() != active {
            return Err(CoreError::StaleWorkflowReference {
                job_id: job.id().to_string(),
                job_workflow: job.workflow_id(),
                active_workflow: active,
            }
            .into());
        }

        let replay: Vec<InputPatch> = job
            .inputs()
            .fields()
            .map(|(node_id, field, value)| InputPatch::new(node_id.clone(), field.clone(), value.clone()))
            .collect();
        tracing::info!(job_id, fields = replay.len(), "Retrying generation");
        for patch in replay {
            self.set_input(patch)?;
        }

        self.begin_submission(None)
    }

    // ---- push channel ----

    /// Apply one push message. Returns the notifications to publish.
    pub fn apply_stream_message(&mut self, message: StreamMessage) -> Vec<PlatformEvent> {
        match dispatch::route(message) {
            Dispatch::QueueDepth(remaining) => {
                self.queue_remaining = remaining;
                Vec::new()
            }
            Dispatch::Job(event) => match self.store.apply_event(event) {
                Some(transition) => self.after_transition(transition),
                None => Vec::new(),
            },
        }
    }

    // ---- history ----

    pub fn merge_first_page(&mut self, page: HistoryPage) {
        self.cursor.advance(&page);
        history::merge_first_page(&mut self.store, page);
        self.selection.reconcile(&self.store);
        self.selection.follow(&self.store);
    }

    /// Append a later page. Pages for an offset other than the cursor's
    /// (a refresh happened meanwhile) are dropped.
    pub fn append_page(&mut self, page: HistoryPage) -> usize {
        if page.offset != self.cursor.next_offset() {
            tracing::debug!(
                offset = page.offset,
                expected = self.cursor.next_offset(),
                "Dropping stale history page",
            );
            return 0;
        }
        self.cursor.advance(&page);
        let added = history::append_page(&mut self.store, page);
        self.selection.follow(&self.store);
        added
    }

    pub fn decode_page(&self, listing: GenerationPage, offset: usize) -> HistoryPage {
        HistoryPage::from_listing(listing, offset, self.cursor.page_size(), self.store.urls())
    }

    // ---- selection ----

    pub fn select(&mut self, job_id: &str) -> EngineResult<()> {
        let id = self
            .store
            .resolve_id(job_id)
            .cloned()
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        self.selection.select(id);
        Ok(())
    }

    pub fn select_next(&mut self) -> Option<JobId> {
        self.selection.next(&self.store)
    }

    pub fn select_previous(&mut self) -> Option<JobId> {
        self.selection.previous(&self.store)
    }

    pub fn set_follow_latest(&mut self, enabled: bool) {
        self.selection.set_follow_latest(enabled, &self.store);
    }

    fn after_transition(&mut self, transition: Transition) -> Vec<PlatformEvent> {
        match &transition.kind {
            TransitionKind::Completed => {
                tracing::info!(job_id = %transition.job_id, "Generation completed");
                self.selection.follow(&self.store);
            }
            TransitionKind::Failed(message) => {
                let error = EngineError::Execution(message.clone());
                tracing::warn!(job_id = %transition.job_id, error = %error, "Generation failed");
            }
            TransitionKind::Started => {
                tracing::info!(job_id = %transition.job_id, "Generation started");
            }
            TransitionKind::Updated => {}
        }
        dispatch::notification(&transition).into_iter().collect()
    }
}
