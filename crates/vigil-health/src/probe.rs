//! Probe execution.
//!
//! A [`Prober`] performs one attempt against a running task and yields a
//! [`ProbeOutcome`]. The strategy (command, HTTP, TCP) is picked once from a
//! validated spec. Every error while probing is folded into
//! `ProbeOutcome::Failure`; nothing here propagates.

use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use vigil_core::{CheckKind, CommandCheck, HealthCheckSpec, HttpCheck, ValidationError, validate};

use crate::tls::loopback_connector;

/// Result of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The task answered the probe successfully.
    Success,
    /// The probe ran and failed, or could not be run at all.
    Failure(String),
    /// The attempt exceeded its timeout and was abandoned.
    TimedOut,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

/// One probe attempt against a task.
///
/// Dropping the returned future must abandon the attempt (kill the
/// process, close the connection).
pub trait Probe: Send + Sync + 'static {
    fn attempt(&self) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Run one attempt, bounded by `timeout` when given.
pub async fn execute<P: Probe>(probe: &P, timeout: Option<Duration>) -> ProbeOutcome {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, probe.attempt()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(?limit, "probe attempt timed out");
                ProbeOutcome::TimedOut
            }
        },
        None => probe.attempt().await,
    }
}

/// The probe strategies, one per check kind.
#[derive(Debug, Clone)]
pub enum Prober {
    Command(CommandProbe),
    Http(HttpProbe),
    Tcp(TcpProbe),
}

impl Prober {
    /// Validate `spec` and select its probe strategy.
    ///
    /// `task_env` is the task's own environment; a command check's overlay
    /// is applied on top of it.
    pub fn from_spec(
        spec: &HealthCheckSpec,
        task_env: &HashMap<String, String>,
    ) -> Result<Self, ValidationError> {
        validate(spec)?;

        let missing = || ValidationError::MissingSection(spec.kind);
        match spec.kind {
            CheckKind::Command => {
                let check = spec.command.as_ref().ok_or_else(missing)?;
                Ok(Prober::Command(CommandProbe::new(check, task_env)))
            }
            CheckKind::Http => {
                let check = spec.http.as_ref().ok_or_else(missing)?;
                Ok(Prober::Http(HttpProbe::new(check)))
            }
            CheckKind::Tcp => {
                let check = spec.tcp.as_ref().ok_or_else(missing)?;
                Ok(Prober::Tcp(TcpProbe::new(check.port)))
            }
            CheckKind::Unknown => Err(ValidationError::UnknownKind),
        }
    }

    pub fn kind(&self) -> CheckKind {
        match self {
            Prober::Command(_) => CheckKind::Command,
            Prober::Http(_) => CheckKind::Http,
            Prober::Tcp(_) => CheckKind::Tcp,
        }
    }
}

impl Probe for Prober {
    async fn attempt(&self) -> ProbeOutcome {
        match self {
            Prober::Command(probe) => probe.run().await,
            Prober::Http(probe) => probe.run().await,
            Prober::Tcp(probe) => probe.run().await,
        }
    }
}

// ── Command ─────────────────────────────────────────────────────

/// Runs a command; exit status 0 is healthy.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    display: String,
}

impl CommandProbe {
    pub fn new(check: &CommandCheck, task_env: &HashMap<String, String>) -> Self {
        let (program, args) = if check.shell {
            ("sh".to_string(), vec!["-c".to_string(), check.value.clone()])
        } else {
            // arguments[0] is argv[0]; the program itself is `value`.
            (
                check.value.clone(),
                check.arguments.iter().skip(1).cloned().collect(),
            )
        };

        let mut env = task_env.clone();
        env.extend(
            check
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Self {
            program,
            args,
            env,
            display: check.value.clone(),
        }
    }

    async fn run(&self) -> ProbeOutcome {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(command = %self.display, error = %e, "health command failed to launch");
                return ProbeOutcome::Failure(format!(
                    "failed to launch '{}': {e}",
                    self.display
                ));
            }
        };
        let group = GroupKill(child.id());

        let output = child.wait_with_output().await;
        group.disarm();

        match output {
            Ok(output) if output.status.success() => ProbeOutcome::Success,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(command = %self.display, status = %output.status, "health command failed");
                ProbeOutcome::Failure(format!(
                    "'{}' exited with {}; stderr: {}",
                    self.display,
                    output.status,
                    stderr.trim()
                ))
            }
            Err(e) => ProbeOutcome::Failure(format!(
                "failed to wait for '{}': {e}",
                self.display
            )),
        }
    }
}

/// SIGKILLs a health command's process group when an attempt is abandoned.
///
/// `kill_on_drop` only reaches the direct child; anything a shell command
/// started in the background lives on in the group.
struct GroupKill(Option<u32>);

impl GroupKill {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pgid) = self.0 {
            // SAFETY: killpg takes plain integers and touches no memory.
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}

// ── HTTP ────────────────────────────────────────────────────────

/// Issues `GET` against the task's loopback port; 2xx is healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    port: u16,
    path: String,
    tls: bool,
}

impl HttpProbe {
    pub fn new(check: &HttpCheck) -> Self {
        Self {
            port: check.port,
            path: check.path_or_default().to_string(),
            tls: check.scheme_or_default() == "https",
        }
    }

    fn uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", Ipv4Addr::LOCALHOST, self.port, self.path)
    }

    async fn run(&self) -> ProbeOutcome {
        let uri = self.uri();
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));

        let stream = match TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeOutcome::Failure(format!("connect to {address} failed: {e}"));
            }
        };

        if !self.tls {
            return self.request(stream, &uri).await;
        }

        let connector = match loopback_connector() {
            Ok(c) => c,
            Err(e) => return ProbeOutcome::Failure(format!("tls setup failed: {e}")),
        };
        let server_name = match ServerName::try_from("localhost") {
            Ok(name) => name,
            Err(e) => return ProbeOutcome::Failure(format!("invalid tls server name: {e}")),
        };
        match connector.connect(server_name, stream).await {
            Ok(tls) => self.request(tls, &uri).await,
            Err(e) => {
                debug!(error = %e, %uri, "health probe tls handshake failed");
                ProbeOutcome::Failure(format!("tls handshake failed: {e}"))
            }
        }
    }

    async fn request<S>(&self, stream: S, uri: &str) -> ProbeOutcome
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeOutcome::Failure(format!("http handshake failed: {e}"));
            }
        };

        let request = match http::Request::builder()
            .method("GET")
            .uri(self.path.as_str())
            .header("host", format!("{}:{}", Ipv4Addr::LOCALHOST, self.port))
            .header("user-agent", "vigil-health/0.1")
            .body(Empty::<Bytes>::new())
        {
            Ok(r) => r,
            Err(e) => return ProbeOutcome::Failure(format!("invalid request for {uri}: {e}")),
        };

        // The connection is driven inline so that abandoning the attempt
        // also tears the connection down.
        let response = sender.send_request(request);
        tokio::pin!(response);
        let response = tokio::select! {
            biased;
            response = &mut response => response,
            result = conn => {
                if let Err(e) = result {
                    debug!(error = %e, %uri, "health probe connection failed");
                }
                // A response read before the connection closed is still queued.
                response.await
            }
        };

        match response {
            Ok(resp) if resp.status().is_success() => ProbeOutcome::Success,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "health probe non-2xx");
                ProbeOutcome::Failure(format!("{uri} returned {}", resp.status()))
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeOutcome::Failure(format!("request to {uri} failed: {e}"))
            }
        }
    }
}

// ── TCP ─────────────────────────────────────────────────────────

/// Connects to the task's loopback port; an established connection is healthy.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    port: u16,
}

impl TcpProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    async fn run(&self) -> ProbeOutcome {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        match TcpStream::connect(address).await {
            Ok(_) => ProbeOutcome::Success,
            Err(e) => {
                debug!(error = %e, %address, "tcp health probe failed");
                ProbeOutcome::Failure(format!("connect to {address} failed: {e}"))
            }
        }
    }
}
