//! Integration tests for [`HttpGenerationsApi`] against a local axum server.

use std::collections::HashMap;

use assert_matches::assert_matches;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use genqueue_client::api::{ApiError, CreateGenerationRequest, GenerationsApi, HttpGenerationsApi};
use genqueue_core::inputs::InputSnapshot;
use genqueue_core::status::JobStatus;
use serde_json::{json, Value};

/// Serve `app` on an ephemeral port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    format!("http://{addr}")
}

fn request() -> CreateGenerationRequest {
    let mut inputs = InputSnapshot::new();
    inputs.set("3", "seed", json!(42));
    CreateGenerationRequest {
        workflow_id: 5,
        inputs,
    }
}

// ---------------------------------------------------------------------------
// Test: POST /generations returns the canonical record
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_generation_posts_camel_case_body() {
    async fn create(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body, json!({"workflowId": 5, "inputs": {"3": {"seed": 42}}}));
        Json(json!({"id": "g1", "status": "queued", "workflowId": 5}))
    }

    let base = serve(Router::new().route("/generations", post(create))).await;
    let api = HttpGenerationsApi::new(base);

    let record = api.create_generation(&request()).await.expect("create succeeds");

    assert_eq!(record.id, "g1");
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.workflow_id, Some(5));
}

// ---------------------------------------------------------------------------
// Test: non-2xx responses become BackendRejection with the server message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejection_carries_server_message() {
    async fn create() -> (StatusCode, Json<Value>) {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "unknown workflow"})),
        )
    }

    let base = serve(Router::new().route("/generations", post(create))).await;
    let api = HttpGenerationsApi::new(base);

    let err = api.create_generation(&request()).await.unwrap_err();

    assert_matches!(err, ApiError::Rejected { status: 422, message } => {
        assert_eq!(message, "unknown workflow");
    });
}

// ---------------------------------------------------------------------------
// Test: GET /generations sends limit/skip and skips malformed rows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_generations_paginates_and_skips_bad_rows() {
    async fn list(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        assert_eq!(params.get("limit").map(String::as_str), Some("20"));
        assert_eq!(params.get("skip").map(String::as_str), Some("40"));
        Json(json!([
            {"id": "g3", "status": "completed", "workflowId": 1, "outputs": "[{\"kind\":\"asset\",\"id\":7}]"},
            {"status": "completed"},
            {"id": "g2", "status": "failed", "workflowId": 1, "errorMessage": "oom"}
        ]))
    }

    let base = serve(Router::new().route("/generations", axum::routing::get(list))).await;
    let api = HttpGenerationsApi::new(base);

    let page = api.list_generations(20, 40).await.expect("list succeeds");

    let ids: Vec<&str> = page.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["g3", "g2"]);
    assert_eq!(page.records[1].error_message.as_deref(), Some("oom"));
    assert_eq!(page.returned, 3);
}

// ---------------------------------------------------------------------------
// Test: a full page with an unknown status still counts every row
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_generations_counts_undecodable_rows() {
    async fn list() -> Json<Value> {
        let mut rows: Vec<Value> = (0..19)
            .map(|i| json!({"id": format!("g{i}"), "status": "completed", "workflowId": 1}))
            .collect();
        rows.push(json!({"id": "g19", "status": "cancelled", "workflowId": 1}));
        Json(Value::Array(rows))
    }

    let base = serve(Router::new().route("/generations", axum::routing::get(list))).await;
    let api = HttpGenerationsApi::new(base);

    let page = api.list_generations(20, 0).await.expect("list succeeds");

    assert_eq!(page.records.len(), 19);
    assert_eq!(page.returned, 20);
}

// ---------------------------------------------------------------------------
// Test: unreachable backend is a request (network) error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_backend_is_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = HttpGenerationsApi::new(format!("http://{addr}"));
    let err = api.list_generations(20, 0).await.unwrap_err();

    assert_matches!(err, ApiError::Request(_));
}
