//! Error types for cluster orchestration.

use std::fmt;
use std::io;

use kvboot_admin::ClusterStatus;
use thiserror::Error;

/// Result type for cluster orchestration.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bootstrapping or tearing down a cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// Admin client could not be created.
    #[error(transparent)]
    Admin(#[from] kvboot_admin::Error),

    /// Cancellation was requested.
    #[error("cancelled")]
    Cancelled,

    /// Configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The cluster never reached the expected shape.
    #[error("cluster did not converge after {attempts} polls (last status: {last_status})")]
    ConvergenceTimeout {
        /// Polls made.
        attempts: u32,

        /// The final snapshot.
        last_status: ClusterStatus,
    },

    /// The nodes cannot be arranged into the requested topology.
    #[error(transparent)]
    InvalidTopology(#[from] kvboot_topology::Error),

    /// An I/O error occurred.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),

    /// Applying the plan to the nodes failed.
    #[error(transparent)]
    Join(#[from] JoinError),

    /// The session manifest could not be read or written.
    #[error("invalid session manifest: {0}")]
    Manifest(#[source] serde_json::Error),

    /// Launching, health-checking or stopping a node failed.
    #[error(transparent)]
    Node(kvboot_node::Error),
}

impl Error {
    /// Name of the failure class, as reported to operators.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Admin(_) | Self::Config(_) | Self::Manifest(_) => "Config",
            Self::Cancelled => "Cancelled",
            Self::ConvergenceTimeout { .. } => "ConvergenceTimeout",
            Self::InvalidTopology(_) => "InvalidTopology",
            Self::Io(..) => "IoError",
            Self::Join(_) => "JoinError",
            Self::Node(e) => match e {
                kvboot_node::Error::BinaryNotFound(_) | kvboot_node::Error::Launch { .. } => {
                    "LaunchError"
                }
                kvboot_node::Error::Cancelled { .. } => "Cancelled",
                kvboot_node::Error::NoApplication => "Config",
                kvboot_node::Error::HealthCheckTimeout { .. } => "HealthCheckTimeout",
                kvboot_node::Error::Shutdown(_) => "ShutdownError",
            },
        }
    }
}

impl From<kvboot_node::Error> for Error {
    fn from(error: kvboot_node::Error) -> Self {
        match error {
            kvboot_node::Error::Cancelled { .. } => Self::Cancelled,
            other => Self::Node(other),
        }
    }
}

/// Step of the join sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinStep {
    /// Seed introduces a node into the cluster.
    Meet,

    /// Master reports its cluster id.
    NodeId,

    /// Master takes ownership of its slot range.
    AssignSlots,

    /// Replica binds to its master.
    Replicate,

    /// Node wipes its membership state.
    Reset,
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Meet => "meet",
            Self::NodeId => "node-id",
            Self::AssignSlots => "assign-slots",
            Self::Replicate => "replicate",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Failures while applying a plan to running nodes.
#[derive(Debug, Error)]
pub enum JoinError {
    /// One admin call failed for good.
    #[error("{node}: {step} failed after {attempts} attempt(s): {source}")]
    Step {
        /// Id of the node the call concerned.
        node: String,

        /// Join step that failed.
        step: JoinStep,

        /// Attempts made.
        attempts: u32,

        /// Last failure.
        #[source]
        source: kvboot_admin::Error,
    },

    /// Membership reset failed on one or more nodes.
    #[error("reset failed on {}", join_nodes(.failures))]
    Reset {
        /// Each failing node with its error.
        failures: Vec<(String, kvboot_admin::Error)>,
    },
}

impl JoinError {
    /// Ids of the nodes the failure concerns.
    #[must_use]
    pub fn nodes(&self) -> Vec<&str> {
        match self {
            Self::Step { node, .. } => vec![node.as_str()],
            Self::Reset { failures } => failures.iter().map(|(node, _)| node.as_str()).collect(),
        }
    }
}

fn join_nodes(failures: &[(String, kvboot_admin::Error)]) -> String {
    failures
        .iter()
        .map(|(node, e)| format!("{node} ({e})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let launch = Error::from(kvboot_node::Error::Launch {
            node: "node-7000".to_string(),
            context: "failed to spawn process",
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert_eq!(launch.kind(), "LaunchError");

        let cancelled = Error::from(kvboot_node::Error::Cancelled {
            node: "node-7000".to_string(),
        });
        assert!(matches!(cancelled, Error::Cancelled));

        let timeout = Error::ConvergenceTimeout {
            attempts: 3,
            last_status: ClusterStatus::unknown(),
        };
        assert_eq!(timeout.kind(), "ConvergenceTimeout");
        assert!(timeout.to_string().contains("state=unknown"));

        let topology = Error::from(kvboot_topology::Error::NoMasters);
        assert_eq!(topology.kind(), "InvalidTopology");
    }

    #[test]
    fn test_reset_error_names_every_node() {
        let err = JoinError::Reset {
            failures: vec![
                (
                    "node-7000".to_string(),
                    kvboot_admin::Error::Unreachable {
                        node: "127.0.0.1:7000".to_string(),
                        reason: "Connection refused".to_string(),
                    },
                ),
                (
                    "node-7003".to_string(),
                    kvboot_admin::Error::Timeout {
                        node: "127.0.0.1:7003".to_string(),
                        command: "CLUSTER RESET HARD".to_string(),
                    },
                ),
            ],
        };

        assert_eq!(err.nodes(), vec!["node-7000", "node-7003"]);
        let rendered = err.to_string();
        assert!(rendered.contains("node-7000"));
        assert!(rendered.contains("node-7003"));
    }
}
