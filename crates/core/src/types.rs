/// Job identifiers are opaque strings: provisional UUIDs issued locally,
/// canonical ids issued by the backend.
pub type JobId = String;

/// Backend-assigned correlation id used on the push channel.
pub type ExecutionId = String;

/// Workflow definitions are integer-keyed on the backend.
pub type WorkflowId = i64;

/// Id of an asset in the application's own storage.
pub type AssetId = i64;

/// Node identifier inside a workflow graph.
pub type NodeId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
