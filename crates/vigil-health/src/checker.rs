//! The per-task health check state machine.
//!
//! [`CheckerState`] is the pure part: it turns probe outcomes into
//! [`Verdict`]s. [`HealthChecker`] owns the timers, the probe and the
//! cancellation signal, and delivers verdicts to the [`Supervisor`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vigil_core::{HealthCheckSpec, TaskId};

use crate::probe::{self, Probe, ProbeOutcome};
use crate::supervisor::Supervisor;

/// The last health value delivered to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastReport {
    /// Nothing reported yet.
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Where a checker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerPhase {
    /// Waiting out the initial delay.
    Pending,
    /// A probe attempt is in flight.
    Probing,
    /// Waiting out the interval before the next attempt.
    Idle,
    /// Stopped; no further probes or reports.
    Cancelled,
}

/// How a checker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerExit {
    /// The checker requested a kill and stopped itself.
    Killed,
    /// The checker was stopped from outside.
    Cancelled,
}

/// Effects produced by recording one probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    /// Health value to report, if the interpreted state changed.
    pub report: Option<bool>,
    /// Whether the task should be killed.
    pub kill: bool,
}

/// Failure counting and transition detection for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerState {
    pub consecutive_failures: u32,
    pub last_reported: LastReport,
    threshold: u32,
}

impl CheckerState {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            last_reported: LastReport::Unknown,
            threshold,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Fold one outcome into the state.
    ///
    /// `within_grace` is whether the task is still inside its grace period.
    /// A task that has never reported may fail silently inside the window;
    /// once anything was reported, failures are reported even there, but
    /// the kill always waits for the window to close.
    pub fn record(&mut self, outcome: &ProbeOutcome, within_grace: bool) -> Verdict {
        if outcome.is_success() {
            self.consecutive_failures = 0;
            let report = (self.last_reported != LastReport::Healthy).then_some(true);
            self.last_reported = LastReport::Healthy;
            return Verdict {
                report,
                kill: false,
            };
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.last_reported == LastReport::Unknown && within_grace {
            return Verdict::default();
        }

        let report = (self.last_reported != LastReport::Unhealthy).then_some(false);
        self.last_reported = LastReport::Unhealthy;

        Verdict {
            report,
            kill: !within_grace && self.consecutive_failures >= self.threshold,
        }
    }
}

/// Drives one task's probes until it is killed or cancelled.
pub struct HealthChecker<P: Probe> {
    task_id: TaskId,
    probe: P,
    delay: Duration,
    interval: Duration,
    timeout: Option<Duration>,
    grace_period: Duration,
    started_at: Instant,
    state: CheckerState,
    supervisor: Arc<dyn Supervisor>,
    shutdown: watch::Receiver<bool>,
    phase: watch::Sender<CheckerPhase>,
}

impl<P: Probe> HealthChecker<P> {
    /// Build a checker for a task that started at `started_at`.
    ///
    /// `spec` is assumed valid; only its timings and threshold are read.
    pub fn new(
        task_id: impl Into<TaskId>,
        spec: &HealthCheckSpec,
        probe: P,
        supervisor: Arc<dyn Supervisor>,
        started_at: Instant,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (phase, _) = watch::channel(CheckerPhase::Pending);
        Self {
            task_id: task_id.into(),
            probe,
            delay: spec.delay(),
            interval: spec.interval(),
            timeout: spec.timeout(),
            grace_period: spec.grace_period(),
            started_at,
            state: CheckerState::new(spec.consecutive_failures),
            supervisor,
            shutdown,
            phase,
        }
    }

    /// Subscribe to phase changes.
    pub fn phase(&self) -> watch::Receiver<CheckerPhase> {
        self.phase.subscribe()
    }

    pub async fn run(mut self) -> CheckerExit {
        info!(
            task_id = %self.task_id,
            delay = ?self.delay,
            interval = ?self.interval,
            timeout = ?self.timeout,
            grace_period = ?self.grace_period,
            threshold = self.state.threshold(),
            "health checker started"
        );

        let first_probe = deadline(self.started_at, self.delay);
        if !self.sleep_until(first_probe).await {
            return self.cancel();
        }

        loop {
            if self.is_cancelled() {
                return self.cancel();
            }

            self.phase.send_replace(CheckerPhase::Probing);
            let outcome = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => None,
                outcome = probe::execute(&self.probe, self.timeout) => Some(outcome),
            };
            // A stop that raced the attempt wins; the outcome is dropped.
            let Some(outcome) = outcome.filter(|_| !self.is_cancelled()) else {
                return self.cancel();
            };

            let within_grace = self.started_at.elapsed() < self.grace_period;
            let verdict = self.state.record(&outcome, within_grace);
            self.log_outcome(&outcome, within_grace);

            if let Some(healthy) = verdict.report {
                if healthy {
                    info!(task_id = %self.task_id, "task is healthy");
                } else {
                    warn!(
                        task_id = %self.task_id,
                        failures = self.state.consecutive_failures,
                        "task is unhealthy"
                    );
                }
                self.supervisor.report_health(&self.task_id, healthy);
            }

            if verdict.kill {
                let reason = format!(
                    "task failed {} consecutive health checks",
                    self.state.consecutive_failures
                );
                warn!(task_id = %self.task_id, %reason, "requesting task kill");
                self.supervisor.request_kill(&self.task_id, &reason);
                self.phase.send_replace(CheckerPhase::Cancelled);
                return CheckerExit::Killed;
            }

            self.phase.send_replace(CheckerPhase::Idle);
            if self.interval.is_zero() {
                tokio::task::yield_now().await;
            } else if !self.sleep_until(deadline(Instant::now(), self.interval)).await {
                return self.cancel();
            }
        }
    }

    /// Sleep until `deadline`; false if cancelled first.
    async fn sleep_until(&mut self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut self.shutdown) => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn cancel(&self) -> CheckerExit {
        debug!(task_id = %self.task_id, "health checker cancelled");
        self.phase.send_replace(CheckerPhase::Cancelled);
        CheckerExit::Cancelled
    }

    fn log_outcome(&self, outcome: &ProbeOutcome, within_grace: bool) {
        let failures = self.state.consecutive_failures;
        match outcome {
            ProbeOutcome::Success => debug!(task_id = %self.task_id, "health probe succeeded"),
            ProbeOutcome::Failure(detail) => debug!(
                task_id = %self.task_id,
                %detail,
                failures,
                within_grace,
                "health probe failed"
            ),
            ProbeOutcome::TimedOut => debug!(
                task_id = %self.task_id,
                failures,
                within_grace,
                "health probe timed out"
            ),
        }
    }
}

/// Stand-in deadline for waits that would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after).unwrap_or_else(|| from + FAR_FUTURE)
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use crate::supervisor::{ChannelSupervisor, SupervisorEvent};

    fn failure() -> ProbeOutcome {
        ProbeOutcome::Failure("exit status 1".into())
    }

    // ── CheckerState ───────────────────────────────────────────────

    #[test]
    fn success_reports_only_on_transition() {
        let mut state = CheckerState::new(3);
        assert_eq!(
            state.record(&ProbeOutcome::Success, false),
            Verdict {
                report: Some(true),
                kill: false
            }
        );
        assert_eq!(state.record(&ProbeOutcome::Success, false), Verdict::default());
        assert_eq!(state.last_reported, LastReport::Healthy);
    }

    #[test]
    fn failures_before_first_report_are_silent_in_grace() {
        let mut state = CheckerState::new(1);
        for _ in 0..5 {
            assert_eq!(state.record(&failure(), true), Verdict::default());
        }
        assert_eq!(state.consecutive_failures, 5);
        assert_eq!(state.last_reported, LastReport::Unknown);
    }

    #[test]
    fn regression_in_grace_reports_without_kill() {
        let mut state = CheckerState::new(1);
        state.record(&ProbeOutcome::Success, true);
        assert_eq!(
            state.record(&failure(), true),
            Verdict {
                report: Some(false),
                kill: false
            }
        );
        assert_eq!(state.record(&failure(), true), Verdict::default());
    }

    #[test]
    fn kill_at_threshold_outside_grace() {
        let mut state = CheckerState::new(3);
        assert_eq!(
            state.record(&failure(), false),
            Verdict {
                report: Some(false),
                kill: false
            }
        );
        assert_eq!(state.record(&ProbeOutcome::TimedOut, false), Verdict::default());
        assert_eq!(
            state.record(&failure(), false),
            Verdict {
                report: None,
                kill: true
            }
        );
    }

    #[test]
    fn success_resets_failure_count() {
        let mut state = CheckerState::new(2);
        state.record(&failure(), false);
        state.record(&ProbeOutcome::Success, false);
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.record(&failure(), false).kill);
        assert!(state.record(&failure(), false).kill);
    }

    #[test]
    fn zero_threshold_kills_on_first_failure() {
        let mut state = CheckerState::new(0);
        state.record(&ProbeOutcome::Success, false);
        assert_eq!(
            state.record(&failure(), false),
            Verdict {
                report: Some(false),
                kill: true
            }
        );
    }

    #[test]
    fn failures_in_grace_count_toward_kill_after_grace() {
        let mut state = CheckerState::new(3);
        state.record(&failure(), true);
        state.record(&failure(), true);
        let verdict = state.record(&failure(), false);
        assert_eq!(
            verdict,
            Verdict {
                report: Some(false),
                kill: true
            }
        );
    }

    // ── HealthChecker ──────────────────────────────────────────────

    struct ScriptedProbe {
        script: Mutex<VecDeque<ProbeOutcome>>,
        fallback: ProbeOutcome,
        latency: Duration,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<ProbeOutcome>, fallback: ProbeOutcome) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                latency: Duration::ZERO,
                attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn always(outcome: ProbeOutcome) -> Self {
            Self::new(Vec::new(), outcome)
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }
    }

    impl Probe for ScriptedProbe {
        async fn attempt(&self) -> ProbeOutcome {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front();
            let outcome = next.unwrap_or_else(|| self.fallback.clone());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            outcome
        }
    }

    struct Harness {
        checker: HealthChecker<ScriptedProbe>,
        events: mpsc::UnboundedReceiver<SupervisorEvent>,
        shutdown: watch::Sender<bool>,
        attempts: Arc<Mutex<Vec<Instant>>>,
        started_at: Instant,
    }

    fn harness(spec: HealthCheckSpec, probe: ScriptedProbe) -> Harness {
        let (supervisor, events) = ChannelSupervisor::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let attempts = probe.attempts.clone();
        let started_at = Instant::now();
        let checker = HealthChecker::new(
            "t1",
            &spec,
            probe,
            Arc::new(supervisor),
            started_at,
            shutdown_rx,
        );
        Harness {
            checker,
            events,
            shutdown,
            attempts,
            started_at,
        }
    }

    fn spec(grace: f64, threshold: u32) -> HealthCheckSpec {
        HealthCheckSpec::tcp(1)
            .with_delay(0.0)
            .with_interval(10.0)
            .with_grace_period(grace)
            .with_consecutive_failures(threshold)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn health(healthy: bool) -> SupervisorEvent {
        SupervisorEvent::Health {
            task_id: "t1".into(),
            healthy,
        }
    }

    /// Timer deadlines round up to the next millisecond.
    fn assert_elapsed(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "elapsed {actual:?}, expected {expected:?}"
        );
    }

    fn is_kill(event: &SupervisorEvent) -> bool {
        matches!(event, SupervisorEvent::Kill { task_id, .. } if task_id == "t1")
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_reports_once_then_kills() {
        let mut h = harness(spec(0.0, 3), ScriptedProbe::always(failure()));

        assert_eq!(h.checker.run().await, CheckerExit::Killed);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], health(false));
        assert!(is_kill(&events[1]));
        assert_eq!(h.attempts.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn kill_reason_names_failure_count() {
        let mut h = harness(spec(0.0, 2), ScriptedProbe::always(failure()));
        h.checker.run().await;

        let events = drain(&mut h.events);
        match events.last() {
            Some(SupervisorEvent::Kill { reason, .. }) => {
                assert_eq!(reason, "task failed 2 consecutive health checks")
            }
            other => panic!("expected kill, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn alternating_inside_grace_reports_every_transition() {
        let probe = ScriptedProbe::new(
            vec![
                ProbeOutcome::Success,
                failure(),
                ProbeOutcome::Success,
                failure(),
            ],
            failure(),
        );
        let mut h = harness(spec(9999.0, 0), probe);
        let handle = tokio::spawn(h.checker.run());

        tokio::time::sleep(Duration::from_secs(35)).await;
        h.shutdown.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), CheckerExit::Cancelled);
        assert_eq!(
            drain(&mut h.events),
            vec![health(true), health(false), health(true), health(false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_healthy_inside_grace_stays_silent() {
        let mut h = harness(spec(9999.0, 1), ScriptedProbe::always(failure()));
        let handle = tokio::spawn(h.checker.run());

        tokio::time::sleep(Duration::from_secs(55)).await;
        h.shutdown.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), CheckerExit::Cancelled);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.attempts.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_counted_in_grace_kill_once_grace_ends() {
        let mut h = harness(spec(25.0, 3), ScriptedProbe::always(failure()));

        assert_eq!(h.checker.run().await, CheckerExit::Killed);

        // Probes at 0s, 10s and 20s are silent; the one at 30s reports and kills.
        assert_elapsed(h.started_at.elapsed(), Duration::from_secs(30));
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], health(false));
        assert!(is_kill(&events[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn regression_inside_grace_reports_but_defers_kill() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Success], failure());
        let mut h = harness(spec(25.0, 1), probe);

        assert_eq!(h.checker.run().await, CheckerExit::Killed);

        assert_elapsed(h.started_at.elapsed(), Duration::from_secs(30));
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], health(true));
        assert_eq!(events[1], health(false));
        assert!(is_kill(&events[2]));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_threshold_kills_after_healthy_on_first_failure() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Success], failure());
        let mut h = harness(spec(0.0, 0), probe);

        assert_eq!(h.checker.run().await, CheckerExit::Killed);

        let events = drain(&mut h.events);
        assert_eq!(events[..2], [health(true), health(false)]);
        assert!(is_kill(&events[2]));
        assert_eq!(h.attempts.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let probe =
            ScriptedProbe::always(ProbeOutcome::Success).with_latency(Duration::from_secs(120));
        let mut h = harness(spec(0.0, 1).with_timeout(1.0), probe);

        assert_eq!(h.checker.run().await, CheckerExit::Killed);

        assert_elapsed(h.started_at.elapsed(), Duration::from_secs(1));
        let events = drain(&mut h.events);
        assert_eq!(events[0], health(false));
        assert!(is_kill(&events[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_postpones_first_probe() {
        let h = harness(
            spec(0.0, 1).with_delay(15.0),
            ScriptedProbe::always(failure()),
        );

        h.checker.run().await;

        let attempts = h.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_elapsed(attempts[0] - h.started_at, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_probes_back_to_back() {
        let mut h = harness(
            spec(0.0, 3).with_interval(0.0),
            ScriptedProbe::always(failure()),
        );

        assert_eq!(h.checker.run().await, CheckerExit::Killed);

        assert_eq!(h.attempts.lock().unwrap().len(), 3);
        assert_elapsed(h.started_at.elapsed(), Duration::ZERO);
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], health(false));
        assert!(is_kill(&events[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_probe_discards_outcome() {
        let probe = ScriptedProbe::always(failure()).with_latency(Duration::from_secs(100));
        let mut h = harness(spec(0.0, 0), probe);
        let mut phase = h.checker.phase();
        let handle = tokio::spawn(h.checker.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*phase.borrow_and_update(), CheckerPhase::Probing);
        h.shutdown.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), CheckerExit::Cancelled);
        assert_eq!(*phase.borrow(), CheckerPhase::Cancelled);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_delay_never_probes() {
        let h = harness(
            spec(0.0, 0).with_delay(60.0),
            ScriptedProbe::always(failure()),
        );
        let phase = h.checker.phase();
        assert_eq!(*phase.borrow(), CheckerPhase::Pending);
        let handle = tokio::spawn(h.checker.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.shutdown.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), CheckerExit::Cancelled);
        assert!(h.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_delay_waits_until_shutdown() {
        let h = harness(
            spec(0.0, 0).with_delay(1.5e19),
            ScriptedProbe::always(failure()),
        );
        let handle = tokio::spawn(h.checker.run());

        tokio::time::sleep(Duration::from_secs(60)).await;
        h.shutdown.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), CheckerExit::Cancelled);
        assert!(h.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_interval_and_grace_stay_silent() {
        let mut h = harness(
            spec(1e20, 1).with_interval(1e20),
            ScriptedProbe::always(failure()),
        );
        let handle = tokio::spawn(h.checker.run());

        tokio::time::sleep(Duration::from_secs(60)).await;
        h.shutdown.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), CheckerExit::Cancelled);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.attempts.lock().unwrap().len(), 1);
    }

    #[test]
    fn deadline_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline(now, Duration::MAX), now + FAR_FUTURE);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_checker() {
        let h = harness(spec(9999.0, 1), ScriptedProbe::always(failure()));
        drop(h.shutdown);

        assert_eq!(h.checker.run().await, CheckerExit::Cancelled);
    }
}
