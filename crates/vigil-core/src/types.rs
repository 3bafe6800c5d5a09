//! Shared types used across Vigil crates.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
pub type TaskId = String;

/// Which kind of probe a health check runs.
///
/// Anything that is missing or not recognised deserializes to `Unknown`,
/// which validation rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Command,
    Http,
    Tcp,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Unknown => write!(f, "unknown"),
            CheckKind::Command => write!(f, "command"),
            CheckKind::Http => write!(f, "http"),
            CheckKind::Tcp => write!(f, "tcp"),
        }
    }
}

/// Declarative health check attached to a task at launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub kind: CheckKind,
    /// Wait after task start before the first probe.
    #[serde(default = "default_delay")]
    pub delay_seconds: f64,
    /// Pause between the end of one probe and the start of the next.
    #[serde(default = "default_interval")]
    pub interval_seconds: f64,
    /// Upper bound on a single probe attempt. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Window from task start in which failures never kill the task.
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: f64,
    /// Consecutive failed probes needed to kill the task.
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpCheck>,
}

fn default_delay() -> f64 {
    15.0
}

fn default_interval() -> f64 {
    10.0
}

fn default_grace_period() -> f64 {
    10.0
}

fn default_consecutive_failures() -> u32 {
    3
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            kind: CheckKind::Unknown,
            command: None,
            http: None,
            tcp: None,
            delay_seconds: default_delay(),
            interval_seconds: default_interval(),
            timeout_seconds: None,
            grace_period_seconds: default_grace_period(),
            consecutive_failures: default_consecutive_failures(),
        }
    }
}

impl HealthCheckSpec {
    /// A command health check with default timings.
    pub fn command(check: CommandCheck) -> Self {
        Self {
            kind: CheckKind::Command,
            command: Some(check),
            ..Self::default()
        }
    }

    /// An HTTP health check with default timings.
    pub fn http(check: HttpCheck) -> Self {
        Self {
            kind: CheckKind::Http,
            http: Some(check),
            ..Self::default()
        }
    }

    /// A TCP health check against `port` with default timings.
    pub fn tcp(port: u16) -> Self {
        Self {
            kind: CheckKind::Tcp,
            tcp: Some(TcpCheck { port }),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.delay_seconds = seconds;
        self
    }

    pub fn with_interval(mut self, seconds: f64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_grace_period(mut self, seconds: f64) -> Self {
        self.grace_period_seconds = seconds;
        self
    }

    pub fn with_consecutive_failures(mut self, failures: u32) -> Self {
        self.consecutive_failures = failures;
        self
    }

    pub fn delay(&self) -> Duration {
        seconds(self.delay_seconds)
    }

    pub fn interval(&self) -> Duration {
        seconds(self.interval_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(seconds)
    }

    pub fn grace_period(&self) -> Duration {
        seconds(self.grace_period_seconds)
    }
}

/// Convert seconds into a `Duration`. Negative or NaN values become zero,
/// values too large to represent saturate.
fn seconds(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

/// Command probe: a shell string or an executable with argv.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCheck {
    /// Shell command (shell mode) or executable path (exec mode).
    #[serde(default)]
    pub value: String,
    /// argv for exec mode, starting with argv[0]. Ignored in shell mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    /// Run `value` through `sh -c`.
    #[serde(default = "default_shell")]
    pub shell: bool,
    /// Overlay merged onto the task environment for the probe.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
}

fn default_shell() -> bool {
    true
}

impl Default for CommandCheck {
    fn default() -> Self {
        Self {
            value: String::new(),
            arguments: Vec::new(),
            environment: HashMap::new(),
            shell: true,
        }
    }
}

impl CommandCheck {
    /// A shell-mode command (`sh -c <value>`).
    pub fn shell(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// An exec-mode command. `arguments` starts with argv[0].
    pub fn exec(program: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            value: program.into(),
            arguments,
            shell: false,
            ..Self::default()
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }
}

/// HTTP probe against the task's loopback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

impl HttpCheck {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            path: None,
            scheme: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn path_or_default(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }

    pub fn scheme_or_default(&self) -> &str {
        self.scheme.as_deref().unwrap_or("http")
    }
}

/// TCP connect probe against the task's loopback port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpCheck {
    pub port: u16,
}
