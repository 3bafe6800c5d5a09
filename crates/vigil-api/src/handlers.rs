//! State API handlers.
//!
//! Each handler reads via `StateStore` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn store_error(e: vigil_state::StateError) -> Response {
    error!(error = %e, "state store read failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

/// GET /state
pub async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.snapshot() {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /tasks
pub async fn list_tasks(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_tasks() {
        Ok(tasks) => ApiResponse::ok(tasks).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /tasks/{id}
pub async fn get_task(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_task(&id) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("task not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// GET /tasks/{id}/status
pub async fn latest_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_task(&id) {
        Ok(Some(record)) => match record.latest_status() {
            Some(status) => ApiResponse::ok(status.clone()).into_response(),
            None => error_response("task has no status yet", StatusCode::NOT_FOUND),
        },
        Ok(None) => error_response("task not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}
