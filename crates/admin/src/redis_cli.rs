//! `AdminClient` backed by the `redis-cli` command line client.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use kvboot_topology::{NodeSpec, SlotRange};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::{AdminClient, ClusterStatus};

/// Replies that mean the node is up but has not caught up with gossip yet.
const NOT_YET_VISIBLE_MARKERS: &[&str] = &["Unknown node", "LOADING"];

/// Client output that means nothing accepted the connection.
const UNREACHABLE_MARKERS: &[&str] = &["Could not connect", "Connection refused"];

/// Runs admin commands through `redis-cli -h <host> -p <port>`.
#[derive(Clone, Debug)]
pub struct RedisCliAdmin {
    executable: PathBuf,
    timeout: Duration,
}

impl RedisCliAdmin {
    /// Creates a client using `redis-cli` from `bin_dir`, or from `PATH` when
    /// no directory is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be found.
    pub fn new(bin_dir: Option<PathBuf>, timeout: Duration) -> Result<Self> {
        let executable = match bin_dir {
            Some(dir) => dir.join("redis-cli"),
            None => which::which("redis-cli").map_err(|_| Error::BinaryNotFound("redis-cli"))?,
        };

        if !executable.exists() {
            return Err(Error::BinaryNotFound("redis-cli"));
        }

        Ok(Self {
            executable,
            timeout,
        })
    }

    async fn run(&self, node: &NodeSpec, args: &[&str]) -> Result<String> {
        let command = args.join(" ");
        debug!("{}: {}", node.address(), command);

        let mut cmd = Command::new(&self.executable);
        cmd.arg("-h")
            .arg(node.host())
            .arg("-p")
            .arg(node.port().to_string())
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Error::Timeout {
                node: node.address(),
                command: command.clone(),
            })?
            .map_err(|e| Error::Io("failed to run redis-cli", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        trace!("{}: {} -> {:?} {:?}", node.address(), command, stdout, stderr);

        classify(node, &command, output.status.success(), stdout, stderr)
    }

    async fn expect_ok(&self, node: &NodeSpec, args: &[&str]) -> Result<()> {
        let reply = self.run(node, args).await?;
        if reply == "OK" {
            Ok(())
        } else {
            Err(Error::Rejected {
                node: node.address(),
                command: args.join(" "),
                reply,
            })
        }
    }
}

/// Maps raw client output to a reply or a typed error.
fn classify(
    node: &NodeSpec,
    command: &str,
    success: bool,
    stdout: String,
    stderr: String,
) -> Result<String> {
    let combined = format!("{stdout} {stderr}");

    if UNREACHABLE_MARKERS.iter().any(|m| combined.contains(m)) {
        return Err(Error::Unreachable {
            node: node.address(),
            reason: if stderr.is_empty() { stdout } else { stderr },
        });
    }

    if is_error_reply(&stdout) || !success {
        let reply = if stdout.is_empty() { stderr } else { stdout };
        if NOT_YET_VISIBLE_MARKERS.iter().any(|m| reply.contains(m)) {
            return Err(Error::NotYetVisible {
                node: node.address(),
                reply,
            });
        }
        return Err(Error::Rejected {
            node: node.address(),
            command: command.to_string(),
            reply,
        });
    }

    Ok(stdout)
}

/// Error replies start with an upper-case code such as `ERR` or `READONLY`.
fn is_error_reply(reply: &str) -> bool {
    if reply.starts_with("(error)") {
        return true;
    }

    let code = reply.split_whitespace().next().unwrap_or_default();
    code.len() >= 3
        && code != "OK"
        && code != "PONG"
        && code.chars().all(|c| c.is_ascii_uppercase())
}

#[async_trait]
impl AdminClient for RedisCliAdmin {
    async fn ping(&self, node: &NodeSpec) -> Result<()> {
        let reply = self.run(node, &["PING"]).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::Rejected {
                node: node.address(),
                command: "PING".to_string(),
                reply,
            })
        }
    }

    async fn shutdown(&self, node: &NodeSpec) -> Result<()> {
        match self.run(node, &["SHUTDOWN", "NOSAVE"]).await {
            Ok(_) => Ok(()),
            // The server drops the connection instead of replying
            Err(Error::Rejected { reply, .. }) if reply.contains("closed the connection") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn meet(&self, via: &NodeSpec, target: &NodeSpec) -> Result<()> {
        let port = target.port().to_string();
        let bus_port = target.bus_port().to_string();
        self.expect_ok(via, &["CLUSTER", "MEET", target.host(), &port, &bus_port])
            .await
    }

    async fn node_id(&self, node: &NodeSpec) -> Result<String> {
        let reply = self.run(node, &["CLUSTER", "MYID"]).await?;
        if reply.is_empty() || !reply.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Parse {
                node: node.address(),
                reason: format!("invalid node id {reply:?}"),
            });
        }
        Ok(reply)
    }

    async fn assign_slots(&self, node: &NodeSpec, slots: SlotRange) -> Result<()> {
        let start = slots.start.to_string();
        let end = slots.end.to_string();
        self.expect_ok(node, &["CLUSTER", "ADDSLOTSRANGE", &start, &end])
            .await
    }

    async fn replicate(&self, replica: &NodeSpec, master_id: &str) -> Result<()> {
        self.expect_ok(replica, &["CLUSTER", "REPLICATE", master_id])
            .await
    }

    async fn cluster_status(&self, node: &NodeSpec) -> Result<ClusterStatus> {
        let info = self.run(node, &["CLUSTER", "INFO"]).await?;
        let nodes = self.run(node, &["CLUSTER", "NODES"]).await?;

        ClusterStatus::parse(&info, &nodes).map_err(|reason| Error::Parse {
            node: node.address(),
            reason,
        })
    }

    async fn flush(&self, node: &NodeSpec) -> Result<()> {
        self.expect_ok(node, &["FLUSHALL"]).await
    }

    async fn reset(&self, node: &NodeSpec) -> Result<()> {
        self.expect_ok(node, &["CLUSTER", "RESET", "HARD"]).await
    }
}
