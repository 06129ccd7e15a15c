//! Parameter snapshots: `node id -> field name -> value`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Field values of a single workflow node.
pub type NodeFields = BTreeMap<String, serde_json::Value>;

/// Snapshot of every edited field, grouped by node id.
///
/// Serializes as a plain JSON object, e.g. `{"3": {"seed": 42}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSnapshot(BTreeMap<NodeId, NodeFields>);

/// A single field override applied atomically with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPatch {
    pub node_id: NodeId,
    pub field: String,
    pub value: serde_json::Value,
}

impl InputPatch {
    pub fn new(
        node_id: impl Into<NodeId>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            field: field.into(),
            value,
        }
    }
}

impl InputSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, node_id: impl Into<NodeId>, field: impl Into<String>, value: serde_json::Value) {
        self.0
            .entry(node_id.into())
            .or_default()
            .insert(field.into(), value);
    }

    pub fn apply(&mut self, patch: &InputPatch) {
        self.set(patch.node_id.clone(), patch.field.clone(), patch.value.clone());
    }

    pub fn get(&self, node_id: &str, field: &str) -> Option<&serde_json::Value> {
        self.0.get(node_id).and_then(|fields| fields.get(field))
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeFields> {
        self.0.get(node_id)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.0.contains_key(node_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of nodes with at least one field.
    pub fn node_count(&self) -> usize {
        self.0.len()
    }

    /// Drop every node not present in `node_ids`, returning the dropped ids.
    pub fn retain_nodes(&mut self, node_ids: &HashSet<NodeId>) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .0
            .keys()
            .filter(|id| !node_ids.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            self.0.remove(id);
        }
        stale
    }

    /// Every `(node id, field, value)` triple, in node then field order.
    pub fn fields(&self) -> impl Iterator<Item = (&NodeId, &String, &serde_json::Value)> {
        self.0
            .iter()
            .flat_map(|(node, fields)| fields.iter().map(move |(field, value)| (node, field, value)))
    }
}

impl FromIterator<(NodeId, NodeFields)> for InputSnapshot {
    fn from_iter<I: IntoIterator<Item = (NodeId, NodeFields)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
