use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use relayhub::config::{GatewayConfig, parse_platform_list};
use relayhub::logging::{LogFormat, init_logging};
use relayhub::supervisor::{ProcessSpawner, Supervisor, SupervisorConfig};
use relayhub::worker::run_worker;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the supervisor and its worker pool (default)
    Serve,
    /// Run a single worker (started by the supervisor)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        slot: usize,
    },
}

/// Command line overrides of the environment configuration.
#[derive(clap::Args, Debug, Clone, Default)]
struct Overrides {
    /// Number of worker processes
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Comma separated platforms each worker serves
    #[arg(long, global = true)]
    platforms: Option<String>,

    /// Address the WebSocket transport binds to
    #[arg(long, global = true)]
    bind_address: Option<String>,

    /// Port the WebSocket transport listens on
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Root directory of the shared store
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// JSON file with credentials to preload
    #[arg(long, global = true)]
    credentials_file: Option<PathBuf>,

    /// Upper bound on a worker's drain, in seconds
    #[arg(long, global = true)]
    drain_timeout: Option<u64>,

    /// Upper bound on each upstream fetch request, in seconds
    #[arg(long, global = true)]
    fetch_timeout: Option<u64>,
}

impl Overrides {
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(workers) = self.workers.filter(|w| *w > 0) {
            config.workers = workers;
        }
        if let Some(platforms) = &self.platforms {
            config.platforms = parse_platform_list(platforms);
        }
        if let Some(bind_address) = &self.bind_address {
            config.bind_address = bind_address.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(state_dir) = &self.state_dir {
            config.state_dir = state_dir.clone();
        }
        if let Some(file) = &self.credentials_file {
            config.credentials_file = Some(file.clone());
        }
        if let Some(secs) = self.drain_timeout {
            config.drain_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.fetch_timeout.filter(|s| *s > 0) {
            config.fetch_timeout = Duration::from_secs(secs);
        }
    }

    /// Flags to hand to worker processes so they see the same configuration.
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(format!("--{}", flag));
                args.push(value);
            }
        };
        push("platforms", self.platforms.clone());
        push("bind-address", self.bind_address.clone());
        push("port", self.port.map(|p| p.to_string()));
        push("state-dir", self.state_dir.as_ref().map(|p| p.display().to_string()));
        push(
            "credentials-file",
            self.credentials_file.as_ref().map(|p| p.display().to_string()),
        );
        push("drain-timeout", self.drain_timeout.map(|s| s.to_string()));
        push("fetch-timeout", self.fetch_timeout.map(|s| s.to_string()));
        args
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(LogFormat::from_env())?;

    let mut config = GatewayConfig::from_env_or_default();
    cli.overrides.apply(&mut config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Worker { slot } => {
            // One thread per worker: jobs interleave cooperatively, the
            // pool provides the parallelism.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build worker runtime")?;
            let code = runtime.block_on(run_worker(config, slot));
            runtime.shutdown_timeout(Duration::from_secs(1));
            std::process::exit(code);
        }
        Command::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build runtime")?;
            runtime.block_on(supervise(config, cli.overrides.to_args()))
        }
    }
}

async fn supervise(config: GatewayConfig, worker_args: Vec<String>) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .with_context(|| format!("Failed to create state dir {}", config.state_dir.display()))?;

    info!(
        "relayhub {} starting: {} worker(s) serving {:?} on ws://{}",
        env!("CARGO_PKG_VERSION"),
        config.workers,
        config.platforms,
        addr
    );

    let spawner = Arc::new(ProcessSpawner::new().with_args(worker_args));
    let mut supervisor = Supervisor::new(
        spawner,
        SupervisorConfig {
            workers: config.workers,
            ..Default::default()
        }
        .with_drain_timeout(config.drain_timeout),
    );
    supervisor.start().await.context("Failed to fork worker pool")?;

    let (signal_tx, signal_rx) = mpsc::channel(4);
    tokio::spawn(forward_signals(signal_tx));

    let report = supervisor.run(signal_rx).await;
    info!(
        "Shutdown complete: {} signalled, {} graceful, {} forced",
        report.workers_signalled, report.graceful_exits, report.forced_terminations
    );
    Ok(())
}

/// Forward every termination signal to the supervisor.
async fn forward_signals(tx: mpsc::Sender<()>) {
    loop {
        shutdown_signal().await;
        if tx.send(()).await.is_err() {
            break;
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_forwarded_to_workers() {
        let cli = Cli::parse_from([
            "relayhub",
            "--port",
            "9000",
            "--platforms",
            "twitter",
            "--workers",
            "4",
        ]);
        assert!(cli.command.is_none());

        let args = cli.overrides.to_args();
        assert_eq!(args, ["--platforms", "twitter", "--port", "9000"]);

        let mut worker_argv = vec!["relayhub".to_string(), "worker".into(), "--slot".into(), "1".into()];
        worker_argv.extend(args);
        let worker = Cli::parse_from(worker_argv);

        assert!(matches!(worker.command, Some(Command::Worker { slot: 1 })));
        let mut config = GatewayConfig::default();
        worker.overrides.apply(&mut config);
        assert_eq!(config.port, 9000);
        assert_eq!(config.platforms, ["twitter"]);
    }
}
