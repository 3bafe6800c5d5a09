//! Task host — launches one task process and applies health effects to it.
//!
//! Health reports become `running` statuses carrying the flag; a kill
//! request terminates the process and records `killed` with
//! `healthy = false`. Once a flag has been reported it is carried on every
//! later status so reconciliation always sees the last known health.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use vigil_core::config::TaskSection;
use vigil_core::{TaskConfig, TaskId};
use vigil_health::{ChannelSupervisor, HealthMonitor, SupervisorEvent};
use vigil_state::{StateStore, TaskRecord, TaskState, TaskStatus};

/// Runs a task to completion against a status store.
#[derive(Clone)]
pub struct TaskHost {
    store: StateStore,
}

/// How the host loop left the running state.
enum Exit {
    Exited(std::io::Result<ExitStatus>),
    KillRequested(String),
    Shutdown,
}

impl TaskHost {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Launch the task described by `config` and drive it until it reaches
    /// a terminal state. Returns the final record.
    ///
    /// An invalid task file is rejected before anything is spawned or
    /// stored.
    pub async fn run(
        &self,
        config: &TaskConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<TaskRecord> {
        config.validate()?;

        let task_id = config.task_id();
        let record = TaskRecord::new(task_id.clone(), config.task.name.clone())
            .with_health_check(config.health_check.clone());
        self.store.put_task(&record)?;

        let mut child = match spawn_task(&config.task) {
            Ok(child) => child,
            Err(e) => {
                error!(%task_id, error = %e, "failed to launch task");
                self.record(
                    &task_id,
                    TaskStatus::new(TaskState::Failed).with_message(format!("{e:#}")),
                );
                return self.final_record(&task_id);
            }
        };
        let started_at = Instant::now();
        info!(%task_id, pid = ?child.id(), "task running");
        self.record(&task_id, TaskStatus::new(TaskState::Running));

        let (supervisor, mut events) = ChannelSupervisor::new();
        let monitor = HealthMonitor::new(Arc::new(supervisor));
        if let Some(spec) = &config.health_check
            && let Err(e) = monitor
                .start(&task_id, spec, &config.task.env, started_at)
                .await
        {
            kill_task(&task_id, &mut child).await;
            self.record(
                &task_id,
                TaskStatus::new(TaskState::Failed).with_message(e.to_string()),
            );
            return Err(e).context("failed to start health checking");
        }

        let mut healthy: Option<bool> = None;
        let exit = loop {
            tokio::select! {
                status = child.wait() => break Exit::Exited(status),
                Some(event) = events.recv() => match event {
                    SupervisorEvent::Health { task_id: id, healthy: flag } => {
                        debug!(task_id = %id, healthy = flag, "health report");
                        healthy = Some(flag);
                        self.record(
                            &task_id,
                            TaskStatus::new(TaskState::Running).with_healthy(healthy),
                        );
                    }
                    SupervisorEvent::Kill { reason, .. } => break Exit::KillRequested(reason),
                },
                _ = shutdown_requested(&mut shutdown) => break Exit::Shutdown,
            }
        };

        monitor.stop(&task_id).await;

        let status = match exit {
            Exit::Exited(Ok(status)) => {
                info!(%task_id, %status, "task exited");
                let state = if status.success() {
                    TaskState::Finished
                } else {
                    TaskState::Failed
                };
                TaskStatus::new(state)
                    .with_healthy(healthy)
                    .with_message(format!("task exited with {status}"))
            }
            Exit::Exited(Err(e)) => {
                error!(%task_id, error = %e, "failed to wait for task");
                TaskStatus::new(TaskState::Failed)
                    .with_healthy(healthy)
                    .with_message(format!("failed to wait for task: {e}"))
            }
            Exit::KillRequested(reason) => {
                warn!(%task_id, %reason, "killing unhealthy task");
                kill_task(&task_id, &mut child).await;
                TaskStatus::new(TaskState::Killed)
                    .with_healthy(Some(false))
                    .with_message(reason)
            }
            Exit::Shutdown => {
                info!(%task_id, "shutdown requested, killing task");
                kill_task(&task_id, &mut child).await;
                TaskStatus::new(TaskState::Killed)
                    .with_healthy(healthy)
                    .with_message("host shutting down")
            }
        };
        self.record(&task_id, status);

        self.final_record(&task_id)
    }

    /// Append a status; store failures are logged, not fatal.
    fn record(&self, task_id: &str, status: TaskStatus) {
        if let Err(e) = self.store.append_status(task_id, status) {
            error!(%task_id, error = %e, "failed to record task status");
        }
    }

    fn final_record(&self, task_id: &TaskId) -> anyhow::Result<TaskRecord> {
        self.store
            .get_task(task_id)?
            .ok_or_else(|| anyhow!("task '{task_id}' vanished from the state store"))
    }
}

fn spawn_task(task: &TaskSection) -> anyhow::Result<Child> {
    let mut command = if task.shell {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&task.command);
        command
    } else {
        let mut command = Command::new(&task.command);
        command.args(task.arguments.iter().skip(1));
        command
    };
    command
        .envs(&task.env)
        .stdin(Stdio::null())
        .process_group(0)
        .kill_on_drop(true);

    command
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", task.command))
}

/// Resolves once shutdown is signalled. A dropped sender never signals.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Kill the task and everything it started in its process group.
async fn kill_task(task_id: &str, child: &mut Child) {
    if let Some(pgid) = child.id() {
        // SAFETY: killpg takes plain integers and touches no memory.
        if unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) } != 0 {
            let e = std::io::Error::last_os_error();
            debug!(%task_id, error = %e, "failed to kill task process group");
        }
    }
    if let Err(e) = child.kill().await {
        error!(%task_id, error = %e, "failed to kill task");
    }
}
