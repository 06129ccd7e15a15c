//! The generation job record.
//!
//! All mutation goes through methods that enforce the lifecycle rules:
//! status only moves forward, the execution id is assigned once, outputs are
//! append-only and `images` is always derived from `outputs`.

use serde::Serialize;

use crate::inputs::InputSnapshot;
use crate::output::{AssetUrls, OutputReference};
use crate::status::JobStatus;
use crate::types::{ExecutionId, JobId, Timestamp, WorkflowId};

/// One request to execute a workflow with a parameter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    id: JobId,
    execution_id: Option<ExecutionId>,
    workflow_id: WorkflowId,
    status: JobStatus,
    inputs: InputSnapshot,
    outputs: Vec<OutputReference>,
    images: Vec<String>,
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview_url: Option<String>,
    created_at: Timestamp,
    /// Set while the creation request is outstanding.
    optimistic: bool,
}

impl GenerationJob {
    /// Create a local, unconfirmed record with a provisional UUID id.
    pub fn optimistic(workflow_id: WorkflowId, inputs: InputSnapshot) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id: None,
            workflow_id,
            status: JobStatus::Pending,
            inputs,
            outputs: Vec::new(),
            images: Vec::new(),
            error_message: None,
            preview_url: None,
            created_at: chrono::Utc::now(),
            optimistic: true,
        }
    }

    /// Assemble a confirmed record received from the backend.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn confirmed(
        id: JobId,
        execution_id: Option<ExecutionId>,
        workflow_id: WorkflowId,
        status: JobStatus,
        inputs: InputSnapshot,
        outputs: Vec<OutputReference>,
        images: Vec<String>,
        error_message: Option<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            execution_id,
            workflow_id,
            status,
            inputs,
            outputs,
            images,
            error_message,
            preview_url: None,
            created_at,
            optimistic: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn inputs(&self) -> &InputSnapshot {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputReference] {
        &self.outputs
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn preview_url(&self) -> Option<&str> {
        self.preview_url.as_deref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    /// Move to `next` if it is a forward transition. Returns whether the
    /// status changed.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Assign the execution id. Only the first assignment sticks; a later
    /// conflicting id is rejected.
    pub fn assign_execution_id(&mut self, execution_id: &str) -> bool {
        match &self.execution_id {
            None => {
                self.execution_id = Some(execution_id.to_string());
                true
            }
            Some(existing) if existing == execution_id => false,
            Some(existing) => {
                tracing::warn!(
                    job_id = %self.id,
                    existing = %existing,
                    incoming = %execution_id,
                    "Ignoring conflicting execution id",
                );
                false
            }
        }
    }

    /// Execution began: move to Processing and drop any stale preview.
    pub fn start(&mut self) -> bool {
        if !self.advance(JobStatus::Processing) {
            return false;
        }
        self.preview_url = None;
        true
    }

    /// Append outputs and re-derive `images`. Terminal jobs are left untouched.
    pub fn append_outputs(&mut self, outputs: Vec<OutputReference>, urls: &AssetUrls) -> bool {
        if self.status.is_terminal() || outputs.is_empty() {
            return false;
        }
        self.outputs.extend(outputs);
        self.images = urls.resolve(&self.outputs);
        true
    }

    pub fn complete(&mut self) -> bool {
        if !self.advance(JobStatus::Completed) {
            return false;
        }
        self.preview_url = None;
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.advance(JobStatus::Failed) {
            return false;
        }
        self.error_message = Some(message.into());
        self.preview_url = None;
        true
    }

    /// Attach a preview frame. Ignored once the job is terminal.
    pub fn set_preview(&mut self, url: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.preview_url = Some(url.into());
        true
    }

    /// Fold a canonical backend record for the same job into this one.
    ///
    /// The canonical id, workflow and timestamps win. Status only moves
    /// forward, so a server record that lags behind events already applied
    /// locally does not regress the job. Locally appended outputs survive
    /// when the canonical record carries fewer.
    pub fn absorb(&mut self, canonical: GenerationJob) {
        self.id = canonical.id;
        self.workflow_id = canonical.workflow_id;
        self.created_at = canonical.created_at;
        self.optimistic = false;

        if !canonical.inputs.is_empty() {
            self.inputs = canonical.inputs;
        }
        if let Some(execution_id) = canonical.execution_id {
            self.assign_execution_id(&execution_id);
        }
        if canonical.outputs.len() >= self.outputs.len() && !canonical.outputs.is_empty() {
            self.outputs = canonical.outputs;
            self.images = canonical.images;
        }
        if self.advance(canonical.status) && canonical.status == JobStatus::Failed {
            self.error_message = canonical.error_message;
        }
        if self.status != JobStatus::Processing {
            self.preview_url = None;
        }
    }
}
