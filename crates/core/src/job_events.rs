//! Event type names published on the process-wide bus.
//!
//! Consumed by subsystems outside the engine (asset-cache invalidation,
//! notifications), so the strings are part of the external contract.

/// A job started executing on the backend.
pub const JOB_START: &str = "job:start";

/// A job completed successfully. Payload: `{id, executionId}`.
pub const JOB_COMPLETE: &str = "job:complete";

/// A job failed, either at submission or during execution.
/// Payload: `{id, executionId, error}`.
pub const JOB_ERROR: &str = "job:error";
