//! Failure reports handed to operators.

use std::fmt;
use std::path::PathBuf;

use kvboot_admin::ClusterStatus;
use kvboot_node::LOG_FILE_NAME;
use kvboot_topology::NodeSpec;
use serde::Serialize;

use crate::error::Error;

/// Output of one node, copied verbatim.
#[derive(Clone, Debug, Serialize)]
pub struct NodeLog {
    /// Id of the node.
    pub node: String,

    /// Where the log was read from.
    pub path: PathBuf,

    /// File contents, or why they could not be read.
    pub contents: String,
}

/// Everything known about a failed session at the moment it failed.
#[derive(Clone, Debug, Serialize)]
pub struct DiagnosticBundle {
    /// Failure class, e.g. `JoinError`.
    pub kind: &'static str,

    /// Rendered error.
    pub message: String,

    /// Last cluster status observed, if any poll happened.
    pub last_status: Option<ClusterStatus>,

    /// Logs of every node in the session.
    pub node_logs: Vec<NodeLog>,
}

impl DiagnosticBundle {
    pub(crate) async fn collect(
        error: &Error,
        specs: &[NodeSpec],
        last_status: Option<ClusterStatus>,
    ) -> Self {
        let mut node_logs = Vec::with_capacity(specs.len());
        for spec in specs {
            let path = spec.data_dir().join(LOG_FILE_NAME);
            let contents = match tokio::fs::read(&path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => format!("<unavailable: {e}>"),
            };
            node_logs.push(NodeLog {
                node: spec.id().to_string(),
                path,
                contents,
            });
        }

        Self {
            kind: error.kind(),
            message: error.to_string(),
            last_status,
            node_logs,
        }
    }
}

impl fmt::Display for DiagnosticBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.kind, self.message)?;
        match &self.last_status {
            Some(status) => writeln!(f, "last status: {status}")?,
            None => writeln!(f, "last status: none")?,
        }

        for log in &self.node_logs {
            writeln!(f, "--- {} ({}) ---", log.node, log.path.display())?;
            f.write_str(&log.contents)?;
            if !log.contents.ends_with('\n') {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
