//! Persisted engine state.
//!
//! Only a narrow slice of runtime state survives a restart: which workflow
//! was active, the per-workflow parameter edits and the selection policy.
//! Jobs themselves are never persisted locally; they are reloaded from the
//! backend's history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::inputs::InputSnapshot;
use crate::types::{JobId, WorkflowId};

fn default_follow_latest() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub active_workflow_id: Option<WorkflowId>,
    #[serde(default)]
    pub workflow_inputs: BTreeMap<WorkflowId, InputSnapshot>,
    #[serde(default)]
    pub selected_job_id: Option<JobId>,
    #[serde(default = "default_follow_latest")]
    pub follow_latest: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            active_workflow_id: None,
            workflow_inputs: BTreeMap::new(),
            selected_job_id: None,
            follow_latest: default_follow_latest(),
        }
    }
}

impl PersistedState {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_uses_defaults() {
        let state = PersistedState::from_json("{}").unwrap();
        assert_eq!(state, PersistedState::default());
        assert!(state.follow_latest);
    }

    #[test]
    fn workflow_keys_survive_serialization() {
        let mut inputs = InputSnapshot::new();
        inputs.set("3", "seed", json!(42));
        let state = PersistedState {
            active_workflow_id: Some(5),
            workflow_inputs: [(5, inputs)].into_iter().collect(),
            selected_job_id: Some("g1".into()),
            follow_latest: false,
        };

        let text = state.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["workflowInputs"]["5"]["3"]["seed"], 42);
        assert_eq!(PersistedState::from_json(&text).unwrap(), state);
    }
}
