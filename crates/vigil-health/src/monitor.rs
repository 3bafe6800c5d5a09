//! Health monitor — one background checker per running task.
//!
//! `HealthMonitor::start` validates a task's health check, picks the probe
//! strategy and spawns the checker loop. Every effect is delivered to the
//! shared [`Supervisor`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use vigil_core::HealthCheckSpec;

use crate::checker::{CheckerExit, CheckerPhase, HealthChecker};
use crate::error::HealthResult;
use crate::probe::Prober;
use crate::supervisor::Supervisor;

/// Per-task checker state.
struct MonitorSlot {
    /// Handle to the background checker.
    handle: JoinHandle<CheckerExit>,
    /// Shutdown signal for this checker.
    shutdown_tx: watch::Sender<bool>,
    phase: watch::Receiver<CheckerPhase>,
}

impl MonitorSlot {
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

/// Manages the health checkers of all running tasks.
pub struct HealthMonitor {
    supervisor: Arc<dyn Supervisor>,
    /// Active checkers: task_id → slot.
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl HealthMonitor {
    pub fn new(supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            supervisor,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start checking a task that started at `started_at`.
    ///
    /// Fails without spawning anything when `spec` is invalid. Starting a
    /// task that is already monitored replaces its checker.
    pub async fn start(
        &self,
        task_id: &str,
        spec: &HealthCheckSpec,
        task_env: &HashMap<String, String>,
        started_at: Instant,
    ) -> HealthResult<()> {
        let prober = Prober::from_spec(spec, task_env)?;
        let kind = prober.kind();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let checker = HealthChecker::new(
            task_id,
            spec,
            prober,
            self.supervisor.clone(),
            started_at,
            shutdown_rx,
        );
        let phase = checker.phase();
        let handle = tokio::spawn(checker.run());

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            task_id.to_string(),
            MonitorSlot {
                handle,
                shutdown_tx,
                phase,
            },
        ) {
            old.stop();
            debug!(%task_id, "replaced existing health checker");
        }

        info!(%task_id, %kind, "health monitor started");
        Ok(())
    }

    /// Stop checking a task. Returns true if a checker was registered.
    pub async fn stop(&self, task_id: &str) -> bool {
        let mut monitors = self.monitors.write().await;
        match monitors.remove(task_id) {
            Some(slot) => {
                slot.stop();
                info!(%task_id, "health monitor stopped");
                true
            }
            None => false,
        }
    }

    /// Stop all checkers (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (id, slot) in monitors.drain() {
            slot.stop();
            debug!(task_id = %id, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    /// Task ids whose checker is still running.
    pub async fn active(&self) -> Vec<String> {
        let monitors = self.monitors.read().await;
        let mut ids: Vec<_> = monitors
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn is_monitoring(&self, task_id: &str) -> bool {
        let monitors = self.monitors.read().await;
        monitors
            .get(task_id)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    /// Current phase of a task's checker, if one is registered.
    pub async fn phase(&self, task_id: &str) -> Option<CheckerPhase> {
        let monitors = self.monitors.read().await;
        monitors.get(task_id).map(|slot| *slot.phase.borrow())
    }
}
