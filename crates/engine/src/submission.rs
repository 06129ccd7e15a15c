//! Submission pipeline: snapshot, optimistic insert, confirm or fail.
//!
//! The network step sits between [`begin`] and [`confirm`]/[`fail`] and is
//! driven by the service; everything here is synchronous.

use genqueue_client::api::CreateGenerationRequest;
use genqueue_core::error::CoreError;
use genqueue_core::inputs::InputPatch;
use genqueue_core::record::GenerationRecord;
use genqueue_core::types::{JobId, NodeId};
use genqueue_core::workflow::WorkflowSelection;

use crate::error::EngineError;
use crate::store::{JobStore, Transition};

/// A job inserted locally and the request that will confirm it.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: JobId,
    pub request: CreateGenerationRequest,
    pub dropped_nodes: Vec<NodeId>,
}

/// Snapshot the active workflow's inputs and insert a Pending record at the
/// head of the store.
///
/// Fails without touching the store when no workflow is active.
pub fn begin(
    workflows: &mut WorkflowSelection,
    store: &mut JobStore,
    patch: Option<&InputPatch>,
) -> Result<Submission, CoreError> {
    let prepared = workflows.prepare(patch)?;

    if !prepared.dropped_nodes.is_empty() {
        tracing::debug!(
            workflow_id = prepared.workflow_id,
            dropped = ?prepared.dropped_nodes,
            "Dropped inputs for nodes missing from the workflow",
        );
    }

    let job_id = store.create_optimistic(prepared.workflow_id, prepared.inputs.clone());
    tracing::info!(job_id = %job_id, workflow_id = prepared.workflow_id, "Submitting generation");

    Ok(Submission {
        job_id,
        request: CreateGenerationRequest {
            workflow_id: prepared.workflow_id,
            inputs: prepared.inputs,
        },
        dropped_nodes: prepared.dropped_nodes,
    })
}

/// Swap the optimistic record for the backend's canonical one, in place.
pub fn confirm(store: &mut JobStore, job_id: &str, record: GenerationRecord) -> Result<JobId, CoreError> {
    let canonical = store.apply_server_record(job_id, record)?;
    tracing::info!(job_id = %job_id, canonical_id = %canonical, "Generation confirmed");
    Ok(canonical)
}

/// Mark the optimistic record Failed with the error detail. Never retried.
pub fn fail(store: &mut JobStore, job_id: &str, error: &EngineError) -> Option<Transition> {
    tracing::error!(job_id = %job_id, error = %error, "Generation submission failed");
    store.fail_job(job_id, &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{record, urls};
    use crate::store::TransitionKind;
    use assert_matches::assert_matches;
    use genqueue_core::status::JobStatus;
    use serde_json::json;
    use std::collections::HashSet;

    fn workflows() -> WorkflowSelection {
        let mut workflows = WorkflowSelection::new();
        workflows.activate(5, HashSet::from(["3".to_string()]));
        workflows.set_input("3", "seed", json!(42)).unwrap();
        workflows
    }

    #[test]
    fn begin_inserts_pending_head_and_builds_request() {
        let mut workflows = workflows();
        workflows.set_input("99", "text", json!("gone")).unwrap();
        let mut store = JobStore::new(urls());

        let submission = begin(&mut workflows, &mut store, None).unwrap();

        assert_eq!(submission.request.workflow_id, 5);
        assert_eq!(
            serde_json::to_value(&submission.request.inputs).unwrap(),
            json!({"3": {"seed": 42}})
        );
        assert_eq!(submission.dropped_nodes, vec!["99".to_string()]);
        let head = store.job_at(0).unwrap();
        assert_eq!(head.id(), submission.job_id);
        assert_eq!(head.status(), JobStatus::Pending);
    }

    #[test]
    fn begin_without_active_workflow_creates_nothing() {
        let mut workflows = WorkflowSelection::new();
        let mut store = JobStore::new(urls());

        assert_matches!(
            begin(&mut workflows, &mut store, None),
            Err(CoreError::NoActiveWorkflow)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn patch_overrides_and_is_kept_as_edit() {
        let mut workflows = workflows();
        let mut store = JobStore::new(urls());
        let patch = InputPatch::new("3", "seed", json!(7));

        let submission = begin(&mut workflows, &mut store, Some(&patch)).unwrap();

        assert_eq!(submission.request.inputs.get("3", "seed"), Some(&json!(7)));
        assert_eq!(workflows.inputs().get("3", "seed"), Some(&json!(7)));
    }

    #[test]
    fn confirm_keeps_position_and_resolves_provisional_id() {
        let mut workflows = workflows();
        let mut store = JobStore::new(urls());
        let submission = begin(&mut workflows, &mut store, None).unwrap();

        let canonical = confirm(&mut store, &submission.job_id, record("g1", "queued", None)).unwrap();

        assert_eq!(canonical, "g1");
        assert_eq!(store.position("g1"), Some(0));
        assert_eq!(store.position(&submission.job_id), Some(0));
        assert_eq!(store.get("g1").unwrap().status(), JobStatus::Queued);
    }

    #[test]
    fn fail_reports_transition() {
        let mut workflows = workflows();
        let mut store = JobStore::new(urls());
        let submission = begin(&mut workflows, &mut store, None).unwrap();

        let transition = fail(&mut store, &submission.job_id, &EngineError::Network("reset".into())).unwrap();
        assert_matches!(transition.kind, TransitionKind::Failed(_));
        assert!(fail(&mut store, &submission.job_id, &EngineError::Network("again".into())).is_none());
    }

    #[test]
    fn fail_marks_job_with_error_detail() {
        let mut workflows = workflows();
        let mut store = JobStore::new(urls());
        let submission = begin(&mut workflows, &mut store, None).unwrap();

        fail(
            &mut store,
            &submission.job_id,
            &EngineError::BackendRejection {
                status: 422,
                message: "unknown node".into(),
            },
        );

        let job = store.get(&submission.job_id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error_message().unwrap().contains("unknown node"));
    }
}
