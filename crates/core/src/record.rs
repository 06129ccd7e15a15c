//! Canonical generation records as returned by the REST API.
//!
//! This is the ingestion boundary: records are parsed exactly once into a
//! [`GenerationJob`], including the defensive decoding of `outputs`, which
//! older rows store as a JSON-encoded string.

use serde::Deserialize;

use crate::error::CoreError;
use crate::inputs::InputSnapshot;
use crate::job::GenerationJob;
use crate::output::{normalize_output, AssetUrls, OutputReference};
use crate::status::JobStatus;
use crate::types::{ExecutionId, JobId, Timestamp, WorkflowId};

/// A generation record on the wire (`POST /generations` response and
/// `GET /generations` items).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: JobId,
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
    pub status: JobStatus,
    #[serde(default)]
    pub inputs: InputSnapshot,
    /// Either a list of output references or a string encoding one.
    #[serde(default)]
    pub outputs: Option<serde_json::Value>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl GenerationRecord {
    /// Fill in the workflow id when the backend response omits it.
    pub fn with_default_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id.get_or_insert(workflow_id);
        self
    }

    /// Convert into a runtime job, decoding outputs and deriving images.
    ///
    /// Fails only when the record does not name its workflow.
    pub fn into_job(self, urls: &AssetUrls) -> Result<GenerationJob, CoreError> {
        let workflow_id = self.workflow_id.ok_or_else(|| {
            CoreError::Decode(format!("generation {} has no workflowId", self.id))
        })?;

        let outputs = decode_outputs(&self.id, self.outputs);
        let images = match self.images {
            Some(images) if !images.is_empty() => images,
            _ => urls.resolve(&outputs),
        };

        Ok(GenerationJob::confirmed(
            self.id,
            self.execution_id,
            workflow_id,
            self.status,
            self.inputs,
            outputs,
            images,
            self.error_message,
            self.created_at.unwrap_or_else(chrono::Utc::now),
        ))
    }
}

/// Decode a raw `outputs` value. Malformed encodings yield no outputs.
fn decode_outputs(job_id: &str, raw: Option<serde_json::Value>) -> Vec<OutputReference> {
    match raw {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::String(encoded)) => {
            match serde_json::from_str::<serde_json::Value>(&encoded) {
                Ok(value) => normalize_output(&value),
                Err(e) => {
                    let err = CoreError::Decode(e.to_string());
                    tracing::warn!(job_id, error = %err, "Discarding undecodable outputs");
                    Vec::new()
                }
            }
        }
        Some(value) => normalize_output(&value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn urls() -> AssetUrls {
        AssetUrls::new("http://h")
    }

    fn parse(value: serde_json::Value) -> GenerationRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn minimal_creation_response() {
        let record = parse(json!({"id": "g1", "status": "queued"}));
        let job = record.with_default_workflow(5).into_job(&urls()).unwrap();
        assert_eq!(job.id(), "g1");
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.workflow_id(), 5);
        assert!(!job.is_optimistic());
    }

    #[test]
    fn missing_workflow_is_a_decode_error() {
        let record = parse(json!({"id": "g1", "status": "queued"}));
        assert_matches!(record.into_job(&urls()), Err(CoreError::Decode(_)));
    }

    #[test]
    fn encoded_string_outputs_are_decoded() {
        let record = parse(json!({
            "id": "g2",
            "workflowId": 1,
            "status": "completed",
            "outputs": "[{\"kind\":\"asset\",\"id\":7}]"
        }));
        let job = record.into_job(&urls()).unwrap();
        assert_eq!(job.outputs(), [OutputReference::InternalAsset { id: 7 }]);
        assert_eq!(job.images(), ["http://h/assets/7/file".to_string()]);
    }

    #[test]
    fn malformed_encoded_outputs_default_to_empty() {
        let record = parse(json!({
            "id": "g3",
            "workflowId": 1,
            "status": "completed",
            "outputs": "{not json"
        }));
        let job = record.into_job(&urls()).unwrap();
        assert!(job.outputs().is_empty());
        assert!(job.images().is_empty());
    }

    #[test]
    fn server_images_are_kept_when_present() {
        let record = parse(json!({
            "id": "g4",
            "workflowId": 1,
            "status": "completed",
            "outputs": [{"kind": "image", "filename": "a.png"}],
            "images": ["http://cdn/a.png"]
        }));
        let job = record.into_job(&urls()).unwrap();
        assert_eq!(job.images(), ["http://cdn/a.png".to_string()]);
    }
}
