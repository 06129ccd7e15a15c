//! REST API client for the generation endpoints.
//!
//! [`GenerationsApi`] is the seam the engine depends on;
//! [`HttpGenerationsApi`] implements it over HTTP with [`reqwest`].

use async_trait::async_trait;
use genqueue_core::inputs::InputSnapshot;
use genqueue_core::record::GenerationRecord;
use genqueue_core::types::WorkflowId;
use serde::Serialize;

/// Body of `POST /generations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGenerationRequest {
    pub workflow_id: WorkflowId,
    pub inputs: InputSnapshot,
}

/// One page of `GET /generations`.
#[derive(Debug, Clone, Default)]
pub struct GenerationPage {
    /// Rows that decoded into records.
    pub records: Vec<GenerationRecord>,
    /// Rows the backend returned, including malformed ones. Paging offsets
    /// and the "more pages" check count these.
    pub returned: usize,
}

impl GenerationPage {
    pub fn new(records: Vec<GenerationRecord>) -> Self {
        Self {
            returned: records.len(),
            records,
        }
    }
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, body decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status.
    #[error("Backend rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        /// Server-supplied message, or the raw body when none could be extracted.
        message: String,
    },
}

/// The backend operations the engine needs.
#[async_trait]
pub trait GenerationsApi: Send + Sync {
    /// `POST /generations`: create a job and return its canonical record.
    async fn create_generation(
        &self,
        request: &CreateGenerationRequest,
    ) -> Result<GenerationRecord, ApiError>;

    /// `GET /generations?limit=N&skip=M`: most-recent-first records.
    async fn list_generations(
        &self,
        limit: usize,
        skip: usize,
    ) -> Result<GenerationPage, ApiError>;
}

/// HTTP implementation of [`GenerationsApi`].
pub struct HttpGenerationsApi {
    client: reqwest::Client,
    api_url: String,
}

impl HttpGenerationsApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an
    /// [`ApiError::Rejected`] carrying the server's message.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationsApi for HttpGenerationsApi {
    async fn create_generation(
        &self,
        request: &CreateGenerationRequest,
    ) -> Result<GenerationRecord, ApiError> {
        let response = self
            .client
            .post(format!("{}/generations", self.api_url))
            .json(request)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<GenerationRecord>().await?)
    }

    async fn list_generations(
        &self,
        limit: usize,
        skip: usize,
    ) -> Result<GenerationPage, ApiError> {
        let response = self
            .client
            .get(format!("{}/generations", self.api_url))
            .query(&[("limit", limit), ("skip", skip)])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let items = response.json::<Vec<serde_json::Value>>().await?;
        let returned = items.len();

        // Records are parsed one by one so a single bad row does not lose
        // the whole page.
        let records = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<GenerationRecord>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed generation record");
                    None
                }
            })
            .collect();

        Ok(GenerationPage { records, returned })
    }
}

/// Extract a human-readable message from an error body.
///
/// Understands `{"error": ..}`, `{"detail": ..}` and `{"message": ..}`;
/// falls back to the raw body.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_request_is_camel_case() {
        let mut inputs = InputSnapshot::new();
        inputs.set("3", "seed", json!(42));
        let body = serde_json::to_value(CreateGenerationRequest {
            workflow_id: 5,
            inputs,
        })
        .unwrap();
        assert_eq!(body, json!({"workflowId": 5, "inputs": {"3": {"seed": 42}}}));
    }

    #[test]
    fn rejection_message_prefers_structured_fields() {
        assert_eq!(rejection_message(r#"{"error":"bad workflow"}"#), "bad workflow");
        assert_eq!(rejection_message(r#"{"detail":"missing node"}"#), "missing node");
        assert_eq!(rejection_message("plain text"), "plain text");
        assert_eq!(rejection_message(r#"{"code":1}"#), r#"{"code":1}"#);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = HttpGenerationsApi::new("http://localhost:8000/");
        assert_eq!(api.api_url(), "http://localhost:8000");
    }
}
