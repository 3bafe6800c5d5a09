//! vigil-health — health checking and kill decisions for running tasks.
//!
//! Once a task is running, a `HealthChecker` probes it on a timer and turns
//! the stream of outcomes into two effects delivered through a
//! [`Supervisor`]: health reports (only on transitions) and, once the task
//! has failed too many times in a row outside its grace period, a kill
//! request.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   └── Per-task background task
//!       ├── Prober (command | http | tcp), chosen once from the HealthCheckSpec
//!       ├── CheckerState (failure count, last report)
//!       └── Supervisor (report_health, request_kill)
//! ```
//!
//! # Grace period
//!
//! A task that has never been healthy may fail freely inside its grace
//! window: nothing is reported and nothing is killed. A task that was
//! healthy and regresses inside the window is reported unhealthy, but the
//! kill still waits until the window has elapsed.

pub mod checker;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod supervisor;
mod tls;

pub use checker::{CheckerExit, CheckerPhase, CheckerState, HealthChecker, LastReport, Verdict};
pub use error::{HealthError, HealthResult};
pub use monitor::HealthMonitor;
pub use probe::{Probe, ProbeOutcome, Prober};
pub use supervisor::{ChannelSupervisor, Supervisor, SupervisorEvent};
