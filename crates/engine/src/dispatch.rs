//! Push-channel messages to store events, and store transitions to bus
//! notifications.

use genqueue_client::messages::StreamMessage;
use genqueue_events::PlatformEvent;

use crate::store::{ExecutionEvent, Transition, TransitionKind};

/// What a push-channel message asks the engine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Global queue depth; no job changes.
    QueueDepth(u32),
    Job(ExecutionEvent),
}

pub fn route(message: StreamMessage) -> Dispatch {
    match message {
        StreamMessage::Status(data) => Dispatch::QueueDepth(data.queue_remaining),
        StreamMessage::JobSubmitted(data) => Dispatch::Job(ExecutionEvent::Submitted {
            id: data.id,
            execution_id: data.execution_id,
            status: data.status,
        }),
        StreamMessage::ExecutionStart(data) => Dispatch::Job(ExecutionEvent::Started {
            execution_id: data.execution_id,
        }),
        StreamMessage::Preview(data) => Dispatch::Job(ExecutionEvent::Preview {
            execution_id: data.execution_id,
            url: data.url,
        }),
        StreamMessage::Executed(data) => Dispatch::Job(ExecutionEvent::Executed {
            execution_id: data.execution_id,
            outputs: data.outputs,
        }),
        StreamMessage::ExecutionError(data) => Dispatch::Job(ExecutionEvent::Failed {
            execution_id: data.execution_id,
            message: data.message,
        }),
    }
}

/// The bus notification for a transition, if it is a lifecycle milestone.
pub fn notification(transition: &Transition) -> Option<PlatformEvent> {
    let execution_id = transition.execution_id.as_deref();
    match &transition.kind {
        TransitionKind::Started => Some(PlatformEvent::job_start(&transition.job_id, execution_id)),
        TransitionKind::Completed => {
            Some(PlatformEvent::job_complete(&transition.job_id, execution_id))
        }
        TransitionKind::Failed(error) => Some(PlatformEvent::job_error(
            &transition.job_id,
            execution_id,
            error,
        )),
        TransitionKind::Updated => None,
    }
}
