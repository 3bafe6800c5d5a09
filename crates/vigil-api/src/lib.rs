//! vigil-api — read-only HTTP view of the task status store.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/state` | Snapshot of every task and its status history |
//! | GET | `/tasks` | List task records |
//! | GET | `/tasks/{id}` | One task record |
//! | GET | `/tasks/{id}/status` | Latest status of a task (reconciliation) |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use vigil_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
}

pub fn build_router(store: StateStore) -> Router {
    let state = ApiState { store };

    Router::new()
        .route("/state", get(handlers::get_state))
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/{id}", get(handlers::get_task))
        .route("/tasks/{id}/status", get(handlers::latest_status))
        .with_state(state)
}
