//! Active workflow and per-workflow parameter cache.
//!
//! The workflow graph itself belongs to a collaborator; this module only
//! needs the id and the set of node ids that currently exist in it. Edits
//! are cached per workflow id so that switching away and back restores them.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::CoreError;
use crate::inputs::{InputPatch, InputSnapshot};
use crate::types::{NodeId, WorkflowId};

/// The workflow currently loaded in the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWorkflow {
    pub id: WorkflowId,
    pub node_ids: HashSet<NodeId>,
}

/// Input snapshot prepared for a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInputs {
    pub workflow_id: WorkflowId,
    pub inputs: InputSnapshot,
    /// Node ids dropped because they no longer exist in the workflow graph.
    pub dropped_nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowSelection {
    active: Option<ActiveWorkflow>,
    current: InputSnapshot,
    cache: HashMap<WorkflowId, InputSnapshot>,
}

impl WorkflowSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted per-workflow inputs. No workflow is active
    /// until the editor calls [`activate`](Self::activate).
    pub fn from_cache(cache: BTreeMap<WorkflowId, InputSnapshot>) -> Self {
        Self {
            active: None,
            current: InputSnapshot::new(),
            cache: cache.into_iter().collect(),
        }
    }

    /// Make `id` the active workflow with the given node-id set.
    ///
    /// Switching to a different workflow stashes the current edits under the
    /// old id and restores any cached edits for the new one. Re-activating
    /// the same id only refreshes the node-id set.
    pub fn activate(&mut self, id: WorkflowId, node_ids: HashSet<NodeId>) {
        if let Some(active) = self.active.as_mut() {
            if active.id == id {
                active.node_ids = node_ids;
                return;
            }
        }

        if let Some(previous) = self.active.take() {
            let edits = std::mem::take(&mut self.current);
            self.cache.insert(previous.id, edits);
        }
        self.current = self.cache.remove(&id).unwrap_or_default();
        self.active = Some(ActiveWorkflow { id, node_ids });
    }

    pub fn active(&self) -> Option<&ActiveWorkflow> {
        self.active.as_ref()
    }

    pub fn active_id(&self) -> Option<WorkflowId> {
        self.active.as_ref().map(|w| w.id)
    }

    /// Current edits for the active workflow.
    pub fn inputs(&self) -> &InputSnapshot {
        &self.current
    }

    /// Record a single field edit. Edits need an active workflow to belong to.
    pub fn set_input(
        &mut self,
        node_id: impl Into<NodeId>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), CoreError> {
        if self.active.is_none() {
            return Err(CoreError::NoActiveWorkflow);
        }
        self.current.set(node_id, field, value);
        Ok(())
    }

    /// Cached edits of an inactive workflow.
    pub fn cached(&self, id: WorkflowId) -> Option<&InputSnapshot> {
        self.cache.get(&id)
    }

    /// Snapshot the current edits for submission.
    ///
    /// The optional patch is applied as an ordinary edit first. Nodes that
    /// are not part of the active graph are dropped from the snapshot (the
    /// edits themselves are kept).
    pub fn prepare(&mut self, patch: Option<&InputPatch>) -> Result<PreparedInputs, CoreError> {
        let active = self.active.as_ref().ok_or(CoreError::NoActiveWorkflow)?;
        let workflow_id = active.id;

        if let Some(patch) = patch {
            self.current.apply(patch);
        }

        let mut inputs = self.current.clone();
        let dropped_nodes = inputs.retain_nodes(&active.node_ids);

        Ok(PreparedInputs {
            workflow_id,
            inputs,
            dropped_nodes,
        })
    }

    /// Every workflow's edits, including the active one.
    pub fn all_inputs(&self) -> BTreeMap<WorkflowId, InputSnapshot> {
        let mut all: BTreeMap<WorkflowId, InputSnapshot> =
            self.cache.iter().map(|(id, inputs)| (*id, inputs.clone())).collect();
        if let Some(active) = &self.active {
            all.insert(active.id, self.current.clone());
        }
        all
    }
}
