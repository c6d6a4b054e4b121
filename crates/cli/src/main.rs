//! CLI binary to bootstrap a local key-value cluster.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kvboot_admin::RedisCliAdmin;
use kvboot_cluster::{
    ClusterConfig, ClusterOrchestrator, ClusterOrchestratorOptions, JoinRetryConfig,
    OrchestrationSession, TeardownReport,
};
use kvboot_node::{NodeApplication, RedisServerApp, RedisServerOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Orchestration error
    #[error(transparent)]
    Cluster(#[from] kvboot_cluster::Error),

    /// Node crate error raised while setting up
    #[error(transparent)]
    Node(#[from] kvboot_node::Error),

    /// Some nodes or directories survived teardown
    #[error("teardown incomplete: {0}")]
    Teardown(TeardownReport),
}

impl Error {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Cluster(e) => e.kind(),
            Self::Node(_) => "LaunchError",
            Self::Teardown(_) => "ShutdownError",
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Session root holding one directory per node
    #[arg(long, default_value = "/tmp/kvboot", env = "KVBOOT_ROOT_DIR", global = true)]
    root_dir: PathBuf,

    /// Directory containing redis-server and redis-cli (PATH if unset)
    #[arg(long, env = "KVBOOT_BIN_DIR", global = true)]
    bin_dir: Option<PathBuf>,

    /// Timeout for a single admin command in milliseconds
    #[arg(long, default_value_t = 2000, env = "KVBOOT_ADMIN_TIMEOUT_MS", global = true)]
    admin_timeout_ms: u64,

    /// Time each stop step waits for a node to exit in milliseconds
    #[arg(long, default_value_t = 5000, env = "KVBOOT_SHUTDOWN_GRACE_MS", global = true)]
    shutdown_grace_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch, join and verify a new cluster
    Provision(ProvisionArgs),

    /// Show the status of the provisioned cluster
    Status,

    /// Stop every node and remove the node directories and manifest
    Teardown,
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    /// Number of nodes
    #[arg(long)]
    nodes: usize,

    /// Replicas per master
    #[arg(long)]
    replicas: usize,

    /// Address the nodes bind to
    #[arg(long, default_value = "127.0.0.1", env = "KVBOOT_HOST")]
    host: String,

    /// Client port of the first node
    #[arg(long, default_value_t = 7000, env = "KVBOOT_BASE_PORT")]
    base_port: u16,

    /// Offset from client port to cluster bus port
    #[arg(long, default_value_t = 10000, env = "KVBOOT_BUS_PORT_OFFSET")]
    bus_port_offset: u16,

    /// Per-node health timeout in milliseconds
    #[arg(long, default_value_t = 10_000, env = "KVBOOT_HEALTH_TIMEOUT_MS")]
    health_timeout_ms: u64,

    /// Convergence timeout in milliseconds
    #[arg(long, default_value_t = 30_000, env = "KVBOOT_CONVERGENCE_TIMEOUT_MS")]
    convergence_timeout_ms: u64,

    /// Pause between polls in milliseconds
    #[arg(long, default_value_t = 200, env = "KVBOOT_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Attempts per join command
    #[arg(long, default_value_t = 10, env = "KVBOOT_JOIN_ATTEMPTS")]
    join_attempts: u32,

    /// Pause between join attempts in milliseconds
    #[arg(long, default_value_t = 200, env = "KVBOOT_JOIN_BACKOFF_MS")]
    join_backoff_ms: u64,

    /// Time after which an unreachable peer is flagged as failed, in milliseconds
    #[arg(long, default_value_t = 5000, env = "KVBOOT_NODE_TIMEOUT_MS")]
    node_timeout_ms: u64,

    /// Disable append-only persistence on the nodes
    #[arg(long, env = "KVBOOT_NO_APPEND_ONLY")]
    no_append_only: bool,
}

impl Cli {
    fn config(&self, provision: Option<&ProvisionArgs>) -> ClusterConfig {
        let mut config = match provision {
            Some(args) => {
                let mut config = ClusterConfig::new(args.nodes, args.replicas, &self.root_dir);
                config.host.clone_from(&args.host);
                config.base_port = args.base_port;
                config.bus_port_offset = args.bus_port_offset;
                config.health_timeout = Duration::from_millis(args.health_timeout_ms);
                config.convergence_timeout = Duration::from_millis(args.convergence_timeout_ms);
                config.poll_interval = Duration::from_millis(args.poll_interval_ms);
                config.join_retry = JoinRetryConfig {
                    max_attempts: args.join_attempts,
                    backoff: Duration::from_millis(args.join_backoff_ms),
                };
                config
            }
            // Existing sessions take their shape from the manifest
            None => ClusterConfig::new(0, 0, &self.root_dir),
        };
        config.shutdown_grace = Duration::from_millis(self.shutdown_grace_ms);
        config
    }

    fn orchestrator(
        &self,
        provision: Option<&ProvisionArgs>,
        cancellation_token: CancellationToken,
    ) -> Result<ClusterOrchestrator<RedisCliAdmin>, Error> {
        let admin = RedisCliAdmin::new(
            self.bin_dir.clone(),
            Duration::from_millis(self.admin_timeout_ms),
        )
        .map_err(kvboot_cluster::Error::from)?;

        // Only provisioning launches servers
        let application: Option<Arc<dyn NodeApplication>> = match provision {
            Some(args) => Some(Arc::new(RedisServerApp::new(RedisServerOptions {
                bin_dir: self.bin_dir.clone(),
                append_only: !args.no_append_only,
                node_timeout: Duration::from_millis(args.node_timeout_ms),
            })?)),
            None => None,
        };

        Ok(ClusterOrchestrator::new(ClusterOrchestratorOptions {
            admin,
            application,
            cancellation_token,
            config: self.config(provision),
        }))
    }
}

fn print_nodes(session: &OrchestrationSession) {
    for handle in session.handles() {
        let spec = handle.spec();
        let pid = handle
            .pid()
            .map_or_else(|| "-".to_string(), |pid| pid.to_string());
        println!(
            "{}\t{}\t{}\tpid {}\t{}",
            spec.id(),
            spec.address(),
            spec.role_hint(),
            pid,
            if handle.is_running() { "running" } else { "down" }
        );
    }
}

async fn provision(cli: &Cli, args: &ProvisionArgs, token: CancellationToken) -> Result<(), Error> {
    let orchestrator = cli.orchestrator(Some(args), token)?;
    let mut session = orchestrator.session()?;

    match orchestrator.start(&mut session).await {
        Ok(status) => {
            print_nodes(&session);
            println!("{status}");
            Ok(())
        }
        Err(e) => {
            if let Some(bundle) = session.diagnostics() {
                eprintln!("{bundle}");
            }
            Err(e.into())
        }
    }
}

async fn status(cli: &Cli) -> Result<(), Error> {
    let orchestrator = cli.orchestrator(None, CancellationToken::new())?;
    let session = orchestrator.resume(&cli.root_dir).await?;

    print_nodes(&session);
    match orchestrator.status(&session).await {
        Ok(status) => println!("{status}"),
        Err(e) => println!("status unavailable: {e}"),
    }
    Ok(())
}

async fn teardown(cli: &Cli) -> Result<(), Error> {
    let orchestrator = cli.orchestrator(None, CancellationToken::new())?;
    let mut session = orchestrator.resume(&cli.root_dir).await?;

    let report = orchestrator.teardown(&mut session).await;
    if report.is_clean() {
        println!("{report}");
        Ok(())
    } else {
        Err(Error::Teardown(report))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let shutdown_token = CancellationToken::new();

    // Set up signal handlers
    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            error!("failed to install signal handlers");
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        info!("Cancelling");
        signal_shutdown_token.cancel();
    });

    let result = match &cli.command {
        Command::Provision(args) => provision(&cli, args, shutdown_token).await,
        Command::Status => status(&cli).await,
        Command::Teardown => teardown(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_provision_requires_shape() {
        assert!(Cli::try_parse_from(["kvboot", "provision", "--replicas", "1"]).is_err());
        assert!(Cli::try_parse_from(["kvboot", "provision", "--nodes", "6"]).is_err());
    }

    #[test]
    fn test_teardown_does_not_look_for_the_server() {
        // redis-cli is present, redis-server is not
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("redis-cli"), "").unwrap();
        let bin_dir = dir.path().to_str().unwrap();

        let teardown = Cli::try_parse_from(["kvboot", "--bin-dir", bin_dir, "teardown"]).unwrap();
        assert!(teardown.orchestrator(None, CancellationToken::new()).is_ok());

        let provision = Cli::try_parse_from([
            "kvboot",
            "--bin-dir",
            bin_dir,
            "provision",
            "--nodes",
            "3",
            "--replicas",
            "0",
        ])
        .unwrap();
        let Command::Provision(args) = &provision.command else {
            panic!("expected provision");
        };
        let err = provision
            .orchestrator(Some(args), CancellationToken::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Node(kvboot_node::Error::BinaryNotFound("redis-server"))
        ));
        assert_eq!(err.kind(), "LaunchError");
    }

    #[test]
    fn test_provision_config() {
        let cli = Cli::try_parse_from([
            "kvboot",
            "--root-dir",
            "/tmp/kvboot-cli-test",
            "provision",
            "--nodes",
            "6",
            "--replicas",
            "1",
            "--base-port",
            "8000",
            "--poll-interval-ms",
            "50",
        ])
        .unwrap();

        let Command::Provision(args) = &cli.command else {
            panic!("expected provision");
        };
        let config = cli.config(Some(args));

        assert_eq!(config.node_count, 6);
        assert_eq!(config.replica_factor, 1);
        assert_eq!(config.base_port, 8000);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.root_dir, PathBuf::from("/tmp/kvboot-cli-test"));
        config.validate().unwrap();
    }
}
