//! Server-specific knowledge: what to run and how to configure it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kvboot_topology::NodeSpec;

use crate::error::{Error, Result};

/// Describes the server binary the process manager launches for each node.
pub trait NodeApplication: Send + Sync + 'static {
    /// Name of the application, used in logs.
    fn name(&self) -> &str;

    /// Path to the executable.
    fn executable(&self) -> &Path;

    /// Command line arguments for one node.
    fn args(&self, spec: &NodeSpec, config_path: &Path) -> Vec<String>;

    /// File name of the rendered config inside the node directory.
    fn config_file_name(&self) -> &str {
        "node.conf"
    }

    /// Renders the node's config file.
    fn render_config(&self, spec: &NodeSpec) -> String;

    /// Extra environment variables for the process.
    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Options for `RedisServerApp`.
#[derive(Clone, Debug)]
pub struct RedisServerOptions {
    /// Directory containing `redis-server`. Looked up on `PATH` if unset.
    pub bin_dir: Option<PathBuf>,

    /// Whether nodes persist writes to an append-only file.
    pub append_only: bool,

    /// Time after which an unreachable peer is flagged as failed.
    pub node_timeout: Duration,
}

impl Default for RedisServerOptions {
    fn default() -> Self {
        Self {
            bin_dir: None,
            append_only: true,
            node_timeout: Duration::from_secs(5),
        }
    }
}

/// Cluster-enabled `redis-server` nodes.
#[derive(Clone, Debug)]
pub struct RedisServerApp {
    append_only: bool,
    executable: PathBuf,
    node_timeout: Duration,
}

impl RedisServerApp {
    /// Locates `redis-server` and creates the application.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be found.
    pub fn new(
        RedisServerOptions {
            bin_dir,
            append_only,
            node_timeout,
        }: RedisServerOptions,
    ) -> Result<Self> {
        let executable = match bin_dir {
            Some(dir) => dir.join("redis-server"),
            None => {
                which::which("redis-server").map_err(|_| Error::BinaryNotFound("redis-server"))?
            }
        };

        if !executable.exists() {
            return Err(Error::BinaryNotFound("redis-server"));
        }

        Ok(Self {
            append_only,
            executable,
            node_timeout,
        })
    }
}

impl NodeApplication for RedisServerApp {
    fn name(&self) -> &'static str {
        "redis-server"
    }

    fn executable(&self) -> &Path {
        &self.executable
    }

    fn args(&self, _spec: &NodeSpec, config_path: &Path) -> Vec<String> {
        vec![config_path.to_string_lossy().to_string()]
    }

    fn config_file_name(&self) -> &'static str {
        "redis.conf"
    }

    fn render_config(&self, spec: &NodeSpec) -> String {
        render_redis_config(spec, self.node_timeout, self.append_only)
    }
}

fn render_redis_config(spec: &NodeSpec, node_timeout: Duration, append_only: bool) -> String {
    include_str!("../templates/redis-cluster.conf")
        .replace("{node_id}", spec.id())
        .replace("{host}", spec.host())
        .replace("{port}", &spec.port().to_string())
        .replace("{bus_port}", &spec.bus_port().to_string())
        .replace("{node_timeout_ms}", &node_timeout.as_millis().to_string())
        .replace("{data_dir}", &spec.data_dir().to_string_lossy())
        .replace("{append_only}", if append_only { "yes" } else { "no" })
}
