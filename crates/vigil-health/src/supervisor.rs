//! The host-side interface a health checker reports to.

use tokio::sync::mpsc;
use tracing::warn;

use vigil_core::TaskId;

/// Receives the effects of health checking.
///
/// Both calls are fire-and-forget: the checker does not wait for the host
/// to act on them.
pub trait Supervisor: Send + Sync {
    /// Attach a health flag to the task's next status update.
    fn report_health(&self, task_id: &str, healthy: bool);

    /// Ask the host to kill the task.
    fn request_kill(&self, task_id: &str, reason: &str);
}

/// An effect emitted by a checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Health { task_id: TaskId, healthy: bool },
    Kill { task_id: TaskId, reason: String },
}

/// Forwards every call as a [`SupervisorEvent`] over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSupervisor {
    tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ChannelSupervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SupervisorEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(event = ?e.0, "supervisor channel closed, dropping event");
        }
    }
}

impl Supervisor for ChannelSupervisor {
    fn report_health(&self, task_id: &str, healthy: bool) {
        self.send(SupervisorEvent::Health {
            task_id: task_id.to_string(),
            healthy,
        });
    }

    fn request_kill(&self, task_id: &str, reason: &str) {
        self.send(SupervisorEvent::Kill {
            task_id: task_id.to_string(),
            reason: reason.to_string(),
        });
    }
}
