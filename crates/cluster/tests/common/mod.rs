//! Common test setup for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use kvboot_admin_mock::MockAdminClient;
use kvboot_cluster::{ClusterConfig, ClusterOrchestrator, ClusterOrchestratorOptions, JoinRetryConfig};
use kvboot_node::NodeApplication;
use kvboot_topology::NodeSpec;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber for all tests
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(Level::INFO.into())
                    .add_directive("kvboot_cluster=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Stands in for a server: runs a shell script per node.
pub struct ScriptApp {
    executable: PathBuf,
    script: &'static str,
}

impl ScriptApp {
    /// A node that prints a line and stays up.
    pub fn healthy() -> Self {
        Self::new("echo \"node $KVBOOT_TEST_PORT up\"; exec sleep 30")
    }

    /// A node that dies immediately.
    pub fn crashing() -> Self {
        Self::new("echo 'FATAL: bad config' >&2; exit 1")
    }

    /// A node whose binary does not exist.
    pub fn missing_binary() -> Self {
        Self {
            executable: PathBuf::from("/nonexistent/kvboot-server"),
            script: "",
        }
    }

    pub fn new(script: &'static str) -> Self {
        Self {
            executable: PathBuf::from("sh"),
            script,
        }
    }
}

impl NodeApplication for ScriptApp {
    fn name(&self) -> &str {
        "script"
    }

    fn executable(&self) -> &Path {
        &self.executable
    }

    fn args(&self, spec: &NodeSpec, _config_path: &Path) -> Vec<String> {
        vec![
            "-c".to_string(),
            format!("KVBOOT_TEST_PORT={}; {}", spec.port(), self.script),
        ]
    }

    fn render_config(&self, spec: &NodeSpec) -> String {
        format!("port {}\n", spec.port())
    }
}

/// A test cluster with its scratch directory.
pub struct TestCluster {
    pub admin: MockAdminClient,
    pub config: ClusterConfig,
    pub orchestrator: ClusterOrchestrator<MockAdminClient>,
    pub token: CancellationToken,
    pub dir: TempDir,
}

impl TestCluster {
    pub fn root(&self) -> &Path {
        &self.config.root_dir
    }
}

/// Configuration with short timings.
pub fn test_config(dir: &TempDir, node_count: usize, replica_factor: usize) -> ClusterConfig {
    let mut config = ClusterConfig::new(node_count, replica_factor, dir.path().join("session"));
    config.health_timeout = Duration::from_secs(2);
    config.convergence_timeout = Duration::from_millis(200);
    config.poll_interval = Duration::from_millis(20);
    config.join_retry = JoinRetryConfig {
        max_attempts: 3,
        backoff: Duration::from_millis(5),
    };
    config.shutdown_grace = Duration::from_millis(200);
    config
}

pub fn create_test_cluster(
    node_count: usize,
    replica_factor: usize,
    application: impl NodeApplication,
) -> TestCluster {
    init_test_logging();

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, node_count, replica_factor);
    let admin = MockAdminClient::new();
    let token = CancellationToken::new();

    let orchestrator = ClusterOrchestrator::new(ClusterOrchestratorOptions {
        admin: admin.clone(),
        application: Some(Arc::new(application)),
        cancellation_token: token.clone(),
        config: config.clone(),
    });

    TestCluster {
        admin,
        config,
        orchestrator,
        token,
        dir,
    }
}

/// A second orchestrator over the same root, for resumed sessions only.
pub fn resuming_orchestrator(cluster: &TestCluster) -> ClusterOrchestrator<MockAdminClient> {
    ClusterOrchestrator::new(ClusterOrchestratorOptions {
        admin: cluster.admin.clone(),
        application: None,
        cancellation_token: CancellationToken::new(),
        config: cluster.config.clone(),
    })
}
