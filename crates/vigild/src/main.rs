//! vigild — the Vigil daemon.
//!
//! Launches one task from a task file, health-checks it, and serves the
//! task status store over HTTP.
//!
//! # Usage
//!
//! ```text
//! vigild run --config task.toml --port 5051 --data-dir /var/lib/vigil
//! vigild validate --config task.toml
//! vigild init --name web --command "python3 -m http.server 8080"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use vigil_core::TaskConfig;
use vigil_state::StateStore;
use vigild::TaskHost;

#[derive(Parser)]
#[command(name = "vigild", about = "Vigil task health-checking daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch a task and health-check it until it terminates.
    Run {
        /// Task file (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Port for the state API.
        #[arg(long, default_value = "5051")]
        port: u16,

        /// Data directory for the status store.
        #[arg(long, default_value = "/var/lib/vigil")]
        data_dir: PathBuf,

        /// Keep serving the state API after the task terminates, until Ctrl-C.
        #[arg(long)]
        linger: bool,
    },

    /// Validate a task file without launching it.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },

    /// Write a starter task file.
    Init {
        #[arg(long)]
        name: String,

        #[arg(long)]
        command: String,

        #[arg(long, default_value = "task.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,vigild=debug,vigil=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            linger,
        } => run(config, port, data_dir, linger).await,
        Command::Validate { config } => validate(config),
        Command::Init {
            name,
            command,
            output,
        } => init(&name, &command, output),
    }
}

async fn run(
    config_path: PathBuf,
    port: u16,
    data_dir: PathBuf,
    linger: bool,
) -> anyhow::Result<()> {
    let config = TaskConfig::from_file(&config_path)?;
    config.validate()?;
    info!(task_id = %config.task_id(), path = ?config_path, "task file loaded");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("vigil.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let ctrl_c = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => error!(error = %e, "failed to install Ctrl-C handler"),
            }
        })
    };

    // ── Start API server ───────────────────────────────────────

    let router = vigil_api::build_router(store.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "state API listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    // ── Run the task ───────────────────────────────────────────

    let host = TaskHost::new(store);
    let outcome = host.run(&config, shutdown_rx.clone()).await;

    match &outcome {
        Ok(record) => info!(
            task_id = %record.id,
            state = ?record.state,
            healthy = ?record.healthy(),
            "task terminated"
        ),
        Err(e) => error!(error = %e, "task host failed"),
    }

    if linger && outcome.is_ok() {
        info!("task done, serving state until Ctrl-C");
        let mut rx = shutdown_rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
    let _ = shutdown_tx.send(true);
    ctrl_c.abort();

    server.await??;
    outcome.map(|_| ())
}

fn validate(config_path: PathBuf) -> anyhow::Result<()> {
    let config = TaskConfig::from_file(&config_path)?;
    config.validate()?;

    println!("Task file OK: {}", config_path.display());
    println!("  task:    {}", config.task_id());
    println!("  command: {}", config.task.command);
    match &config.health_check {
        Some(check) => {
            println!("  health check: {}", check.kind);
            println!("{}", serde_json::to_string_pretty(check)?);
        }
        None => println!("  health check: none"),
    }
    Ok(())
}

fn init(name: &str, command: &str, output: PathBuf) -> anyhow::Result<()> {
    if output.exists() {
        bail!("{} already exists", output.display());
    }
    let config = TaskConfig::scaffold(name, command);
    std::fs::write(&output, config.to_toml_string()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Created {}", output.display());
    Ok(())
}
