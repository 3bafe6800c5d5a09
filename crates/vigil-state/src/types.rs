//! Domain types for the Vigil state store.

use serde::{Deserialize, Serialize};
use vigil_core::{HealthCheckSpec, TaskId};

/// Lifecycle state carried by a task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Staging,
    Running,
    Finished,
    Failed,
    Killed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed
        )
    }
}

/// One status update emitted for a task.
///
/// `healthy` is absent until the health checker has reported at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            healthy: None,
            message: None,
            timestamp: epoch_secs(),
        }
    }

    pub fn with_healthy(mut self, healthy: Option<bool>) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn has_healthy(&self) -> bool {
        self.healthy.is_some()
    }
}

/// A task and every status it has emitted, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    /// State of the most recent status.
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
    pub statuses: Vec<TaskStatus>,
    /// Unix timestamp when the task was launched.
    pub started_at: u64,
    /// Unix timestamp of the last status.
    pub updated_at: u64,
}

impl TaskRecord {
    /// A freshly staged task with no statuses yet.
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>) -> Self {
        let now = epoch_secs();
        Self {
            id: id.into(),
            name: name.into(),
            state: TaskState::Staging,
            health_check: None,
            statuses: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn with_health_check(mut self, spec: Option<HealthCheckSpec>) -> Self {
        self.health_check = spec;
        self
    }

    pub fn latest_status(&self) -> Option<&TaskStatus> {
        self.statuses.last()
    }

    /// The health flag of the latest status, if one was ever attached.
    pub fn healthy(&self) -> Option<bool> {
        self.latest_status().and_then(|status| status.healthy)
    }
}

/// Introspection view of every task, rendered by the state endpoint.
///
/// The current health of task `i` lives at `tasks[i].statuses[last].healthy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tasks: Vec<TaskRecord>,
}

pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
