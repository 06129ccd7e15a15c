use genqueue_client::api::ApiError;
use genqueue_core::error::CoreError;

/// Errors surfaced by the engine.
///
/// Domain errors (stale workflow on retry, missing job, no active workflow,
/// undecodable records) come from [`CoreError`]; the remaining variants
/// describe the network and the execution backend.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The request never got a response (connect, DNS, TLS, body decoding).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("Backend rejected request ({status}): {message}")]
    BackendRejection { status: u16, message: String },

    /// The execution engine reported a failure over the push channel.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The engine actor is no longer running.
    #[error("Engine stopped")]
    EngineStopped,
}

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Request(e) => EngineError::Network(e.to_string()),
            ApiError::Rejected { status, message } => {
                EngineError::BackendRejection { status, message }
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
