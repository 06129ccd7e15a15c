//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans job lifecycle notifications out to unrelated
//! subsystems (asset-cache invalidation, desktop notifications). It is
//! designed to be shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use genqueue_core::job_events::{JOB_COMPLETE, JOB_ERROR, JOB_START};
use genqueue_core::types::{ExecutionId, JobId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PlatformEvent
// ---------------------------------------------------------------------------

/// A job lifecycle notification.
///
/// Constructed via [`PlatformEvent::new`] or one of the `job_*` helpers and
/// enriched with [`with_job`](PlatformEvent::with_job),
/// [`with_execution`](PlatformEvent::with_execution) and
/// [`with_payload`](PlatformEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// Colon-separated event name, e.g. `"job:complete"`.
    pub event_type: String,

    /// Job the event refers to, when known.
    pub job_id: Option<JobId>,

    /// Backend execution id, when known.
    pub execution_id: Option<ExecutionId>,

    /// Event-specific JSON payload.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl PlatformEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: None,
            execution_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_execution(mut self, execution_id: Option<&str>) -> Self {
        self.execution_id = execution_id.map(str::to_string);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// `job:start`: the backend began executing the job.
    pub fn job_start(job_id: &str, execution_id: Option<&str>) -> Self {
        Self::new(JOB_START)
            .with_job(job_id)
            .with_execution(execution_id)
            .with_payload(serde_json::json!({
                "id": job_id,
                "executionId": execution_id,
            }))
    }

    /// `job:complete{id, executionId}`.
    pub fn job_complete(job_id: &str, execution_id: Option<&str>) -> Self {
        Self::new(JOB_COMPLETE)
            .with_job(job_id)
            .with_execution(execution_id)
            .with_payload(serde_json::json!({
                "id": job_id,
                "executionId": execution_id,
            }))
    }

    /// `job:error{executionId, error}`. Submission failures carry no
    /// execution id.
    pub fn job_error(job_id: &str, execution_id: Option<&str>, error: &str) -> Self {
        Self::new(JOB_ERROR)
            .with_job(job_id)
            .with_execution(execution_id)
            .with_payload(serde_json::json!({
                "id": job_id,
                "executionId": execution_id,
                "error": error,
            }))
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use genqueue_events::bus::{EventBus, PlatformEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(PlatformEvent::job_start("g1", Some("p1")));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers the event is dropped.
    pub fn publish(&self, event: PlatformEvent) {
        tracing::debug!(
            event_type = %event.event_type,
            job_id = ?event.job_id,
            "Publishing platform event",
        );
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(PlatformEvent::job_complete("g1", Some("p1")));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "job:complete");
        assert_eq!(received.job_id.as_deref(), Some("g1"));
        assert_eq!(received.execution_id.as_deref(), Some("p1"));
        assert_eq!(received.payload["id"], "g1");
        assert_eq!(received.payload["executionId"], "p1");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(PlatformEvent::job_start("g1", None));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");

        assert_eq!(e1.event_type, "job:start");
        assert_eq!(e2.event_type, "job:start");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(PlatformEvent::new("orphan"));
    }

    #[test]
    fn error_event_without_execution_id() {
        let event = PlatformEvent::job_error("tmp-1", None, "connection refused");
        assert_eq!(event.event_type, "job:error");
        assert!(event.execution_id.is_none());
        assert!(event.payload["executionId"].is_null());
        assert_eq!(event.payload["error"], "connection refused");
    }
}
