//! Cluster configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use kvboot_topology::NodeSpec;

use crate::error::{Error, Result};

/// Retry behavior for individual join calls.
#[derive(Clone, Debug)]
pub struct JoinRetryConfig {
    /// Maximum attempts per admin call (default: 10)
    pub max_attempts: u32,
    /// Fixed pause between attempts (default: 200ms)
    pub backoff: Duration,
}

impl Default for JoinRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Everything needed to provision one local cluster.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Number of nodes to launch.
    pub node_count: usize,

    /// Replicas per master.
    pub replica_factor: usize,

    /// Address the nodes bind to and are reached on.
    pub host: String,

    /// Port of the first node; the others follow consecutively.
    pub base_port: u16,

    /// Distance between a node's client port and its cluster bus port.
    pub bus_port_offset: u16,

    /// Session root; each node gets `<root_dir>/<port>/`.
    pub root_dir: PathBuf,

    /// Per-node limit for becoming healthy.
    pub health_timeout: Duration,

    /// Limit for the cluster reaching its expected shape.
    pub convergence_timeout: Duration,

    /// Pause between health and status polls.
    pub poll_interval: Duration,

    /// Retry behavior of join calls.
    pub join_retry: JoinRetryConfig,

    /// How long each stop step waits for a node to exit.
    pub shutdown_grace: Duration,
}

impl ClusterConfig {
    /// Creates a configuration with default ports and timings.
    #[must_use]
    pub fn new(node_count: usize, replica_factor: usize, root_dir: impl AsRef<Path>) -> Self {
        Self {
            node_count,
            replica_factor,
            host: "127.0.0.1".to_string(),
            base_port: 7000,
            bus_port_offset: 10000,
            root_dir: root_dir.as_ref().to_path_buf(),
            health_timeout: Duration::from_secs(10),
            convergence_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(200),
            join_retry: JoinRetryConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Rejects configurations that cannot describe a cluster.
    ///
    /// Topology shape is left to the planner.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(Error::Config("node count must be at least 1".to_string()));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }

        if self.join_retry.max_attempts == 0 {
            return Err(Error::Config(
                "join retry attempts must be at least 1".to_string(),
            ));
        }

        let last_port = u16::try_from(self.node_count - 1)
            .ok()
            .and_then(|n| self.base_port.checked_add(n))
            .ok_or_else(|| {
                Error::Config(format!(
                    "{} nodes starting at port {} exceed the port range",
                    self.node_count, self.base_port
                ))
            })?;

        if last_port.checked_add(self.bus_port_offset).is_none() {
            return Err(Error::Config(format!(
                "bus port offset {} pushes port {} out of range",
                self.bus_port_offset, last_port
            )));
        }

        Ok(())
    }

    /// Node descriptions in launch order. Call `validate` first.
    #[must_use]
    pub fn node_specs(&self) -> Vec<NodeSpec> {
        (0..self.node_count)
            .filter_map(|i| u16::try_from(i).ok())
            .map(|i| {
                let port = self.base_port + i;
                NodeSpec::new(
                    format!("node-{port}"),
                    self.host.clone(),
                    port,
                    port + self.bus_port_offset,
                    self.root_dir.join(port.to_string()),
                )
            })
            .collect()
    }
}
