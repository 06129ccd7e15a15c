//! Generation job status and the forward-only transition law.
//!
//! `Pending -> Queued -> Processing -> {Completed | Failed}`. Forward skips
//! are allowed (a lost `execution_start` must not block completion), moves
//! backward are not, and terminal states absorb everything.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the lifecycle. Both terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Queued => 1,
            JobStatus::Processing => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Pending, Queued or Processing: the job is still in flight.
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Re-applying the current status is not a transition and returns `false`.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Lowercase wire name, e.g. `"queued"`.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
