//! Push-channel message types and parser.
//!
//! Every frame is a JSON envelope `{"origin": .., "type": .., "data": {...}}`.
//! `origin = "internal"` messages come from the application backend and
//! bootstrap correlation; `origin = "engine"` messages are relayed from the
//! execution engine and are keyed by execution id. The envelope is parsed
//! once here into a [`StreamMessage`]; unknown origins and types are not
//! errors, they parse to `None`.

use genqueue_core::output::{normalize_output, OutputReference};
use genqueue_core::status::JobStatus;
use genqueue_core::types::{ExecutionId, JobId};
use serde::Deserialize;

/// Envelope `type` values understood by the engine.
pub const MSG_JOB_SUBMITTED: &str = "job_submitted";
pub const MSG_STATUS: &str = "status";
pub const MSG_EXECUTION_START: &str = "execution_start";
pub const MSG_PREVIEW: &str = "preview";
pub const MSG_EXECUTED: &str = "executed";
pub const MSG_EXECUTION_ERROR: &str = "execution_error";

/// Raw envelope, before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct Envelope {
    origin: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// All known push-channel messages.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Internal: the backend accepted a job and (maybe) assigned an execution id.
    JobSubmitted(JobSubmittedData),

    /// Engine: queue depth broadcast.
    Status(StatusData),

    /// Engine: a job started executing.
    ExecutionStart(ExecutionStartData),

    /// Engine: an intermediate preview frame.
    Preview(PreviewData),

    /// Engine: execution finished with outputs.
    Executed(ExecutedData),

    /// Engine: execution failed.
    ExecutionError(ExecutionErrorData),
}

impl StreamMessage {
    /// Envelope `type` this message was parsed from.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::JobSubmitted(_) => MSG_JOB_SUBMITTED,
            StreamMessage::Status(_) => MSG_STATUS,
            StreamMessage::ExecutionStart(_) => MSG_EXECUTION_START,
            StreamMessage::Preview(_) => MSG_PREVIEW,
            StreamMessage::Executed(_) => MSG_EXECUTED,
            StreamMessage::ExecutionError(_) => MSG_EXECUTION_ERROR,
        }
    }
}

/// Payload for internal `job_submitted` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmittedData {
    pub id: JobId,
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

/// Payload for `status` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    #[serde(default)]
    pub queue_remaining: u32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStartData {
    pub execution_id: ExecutionId,
}

/// A preview frame.
///
/// The payload is either a bare string (data URL or URL) or an object with
/// `url`/`image` and an optional `executionId`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewData {
    pub execution_id: Option<ExecutionId>,
    pub url: String,
}

/// Payload for `executed` messages, with outputs already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedData {
    pub execution_id: ExecutionId,
    pub outputs: Vec<OutputReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExecutedData {
    execution_id: ExecutionId,
    #[serde(default)]
    output: serde_json::Value,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionErrorData {
    pub execution_id: ExecutionId,
    #[serde(alias = "exceptionMessage")]
    pub message: String,
}

/// Parse a push-channel text frame.
///
/// Returns `Ok(None)` for unknown origins or types, `Err` for malformed
/// JSON or a known type whose payload does not match. Callers log errors
/// and continue.
pub fn parse_message(text: &str) -> Result<Option<StreamMessage>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let message = match (envelope.origin.as_str(), envelope.kind.as_str()) {
        ("internal", MSG_JOB_SUBMITTED) => {
            StreamMessage::JobSubmitted(serde_json::from_value(envelope.data)?)
        }
        ("engine", MSG_STATUS) => StreamMessage::Status(serde_json::from_value(envelope.data)?),
        ("engine", MSG_EXECUTION_START) => {
            StreamMessage::ExecutionStart(serde_json::from_value(envelope.data)?)
        }
        ("engine", MSG_PREVIEW) => match parse_preview(envelope.data) {
            Some(preview) => StreamMessage::Preview(preview),
            None => {
                tracing::debug!("Ignoring preview without image payload");
                return Ok(None);
            }
        },
        ("engine", MSG_EXECUTED) => {
            let raw: RawExecutedData = serde_json::from_value(envelope.data)?;
            StreamMessage::Executed(ExecutedData {
                execution_id: raw.execution_id,
                outputs: normalize_output(&raw.output),
            })
        }
        ("engine", MSG_EXECUTION_ERROR) => {
            StreamMessage::ExecutionError(serde_json::from_value(envelope.data)?)
        }
        (origin, kind) => {
            tracing::trace!(origin, kind, "Ignoring unknown push message");
            return Ok(None);
        }
    };

    Ok(Some(message))
}

fn parse_preview(data: serde_json::Value) -> Option<PreviewData> {
    match data {
        serde_json::Value::String(url) => Some(PreviewData {
            execution_id: None,
            url,
        }),
        serde_json::Value::Object(map) => {
            let url = ["url", "image"]
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_str()))?
                .to_string();
            let execution_id = map
                .get("executionId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Some(PreviewData { execution_id, url })
        }
        _ => None,
    }
}
