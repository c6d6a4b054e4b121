//! Runtime record of one provisioned node.

use std::fmt;
use std::path::{Path, PathBuf};

use kvboot_topology::NodeSpec;

use crate::process::{NodeProcess, ProcessIdentity};

/// Lifecycle state of a node handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// Process launched, not yet answering.
    Starting,

    /// Answering admin commands.
    Ready,

    /// Crashed, never became healthy, or could not be fully stopped.
    Failed,

    /// Process gone and directory reclaimed.
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tracks one node process. Only the process manager changes it.
#[derive(Debug)]
pub struct NodeHandle {
    pub(crate) log_path: PathBuf,
    pub(crate) process: Option<NodeProcess>,
    pub(crate) spec: NodeSpec,
    pub(crate) state: NodeState,
}

impl NodeHandle {
    /// The node this handle tracks.
    #[must_use]
    pub const fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    /// File receiving the server's output.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Process ID, while a process is attached.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(NodeProcess::pid)
    }

    /// Identity of the attached process, for recording in a manifest.
    #[must_use]
    pub fn identity(&self) -> Option<ProcessIdentity> {
        self.process.as_ref().and_then(NodeProcess::identity)
    }

    /// Whether the attached process is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(NodeProcess::is_running)
    }
}
