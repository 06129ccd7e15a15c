use crate::types::{JobId, WorkflowId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("No active workflow selected")]
    NoActiveWorkflow,

    #[error("Job {job_id} was created from workflow {job_workflow} but workflow {active_workflow} is active; the workflow may have changed")]
    StaleWorkflowReference {
        job_id: JobId,
        job_workflow: WorkflowId,
        active_workflow: WorkflowId,
    },

    #[error("Decode error: {0}")]
    Decode(String),
}
