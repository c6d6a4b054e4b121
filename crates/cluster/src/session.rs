//! Per-provisioning state and its on-disk manifest.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use kvboot_admin::ClusterStatus;
use kvboot_node::{NodeHandle, ProcessIdentity};
use kvboot_topology::{NodeSpec, TopologyPlan};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ClusterConfig;
use crate::diagnostics::DiagnosticBundle;
use crate::error::{Error, Result};

/// File in the session root recording what was provisioned.
pub const MANIFEST_FILE_NAME: &str = "session.json";

/// States of the orchestration state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Nothing started yet.
    Idle,

    /// Planning, launching nodes and waiting for them to become healthy.
    Provisioning,

    /// Applying the plan to the nodes.
    Joining,

    /// Waiting for the cluster to converge.
    Verifying,

    /// Resetting the nodes before the single retry.
    Repairing,

    /// Converged.
    Ready,

    /// Gave up.
    Failed,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::Joining => "joining",
            Self::Verifying => "verifying",
            Self::Repairing => "repairing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One recorded state change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    /// State left.
    pub from: OrchestratorState,

    /// State entered.
    pub to: OrchestratorState,
}

/// Owns the node handles and plan of one provisioning attempt.
///
/// Dropping a session does not stop its nodes; pass it to
/// `ClusterOrchestrator::teardown` for that.
#[derive(Debug)]
pub struct OrchestrationSession {
    pub(crate) diagnostics: Option<DiagnosticBundle>,
    pub(crate) handles: Vec<NodeHandle>,
    pub(crate) history: Vec<Transition>,
    pub(crate) last_status: Option<ClusterStatus>,
    pub(crate) plan: Option<TopologyPlan>,
    pub(crate) repair_attempts: u32,
    pub(crate) replica_factor: usize,
    pub(crate) root: PathBuf,
    pub(crate) specs: Vec<NodeSpec>,
    pub(crate) state: OrchestratorState,
}

impl OrchestrationSession {
    /// Creates an idle session for the configured nodes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            diagnostics: None,
            handles: Vec::new(),
            history: Vec::new(),
            last_status: None,
            plan: None,
            repair_attempts: 0,
            replica_factor: config.replica_factor,
            root: config.root_dir.clone(),
            specs: config.node_specs(),
            state: OrchestratorState::Idle,
        })
    }

    pub(crate) fn resumed(
        root: &Path,
        replica_factor: usize,
        plan: TopologyPlan,
        handles: Vec<NodeHandle>,
    ) -> Self {
        let state = if handles.iter().all(NodeHandle::is_running) {
            OrchestratorState::Ready
        } else {
            OrchestratorState::Failed
        };

        Self {
            diagnostics: None,
            history: Vec::new(),
            last_status: None,
            repair_attempts: 0,
            replica_factor,
            root: root.to_path_buf(),
            specs: handles.iter().map(|h| h.spec().clone()).collect(),
            handles,
            plan: Some(plan),
            state,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Every state change so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Repair cycles run. Never more than one.
    #[must_use]
    pub const fn repair_attempts(&self) -> u32 {
        self.repair_attempts
    }

    /// Most recent cluster status observed.
    #[must_use]
    pub const fn last_status(&self) -> Option<&ClusterStatus> {
        self.last_status.as_ref()
    }

    /// Failure report, once the session has failed.
    #[must_use]
    pub const fn diagnostics(&self) -> Option<&DiagnosticBundle> {
        self.diagnostics.as_ref()
    }

    /// Plan in effect, once planning has happened.
    #[must_use]
    pub const fn plan(&self) -> Option<&TopologyPlan> {
        self.plan.as_ref()
    }

    /// Handles of nodes that were launched and not yet stopped.
    #[must_use]
    pub fn handles(&self) -> &[NodeHandle] {
        &self.handles
    }

    /// Nodes this session provisions.
    #[must_use]
    pub fn specs(&self) -> &[NodeSpec] {
        &self.specs
    }

    /// Directory holding every node directory and the manifest.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn transition(&mut self, to: OrchestratorState) {
        let from = self.state;
        info!("session {}: {} -> {}", self.root.display(), from, to);
        self.history.push(Transition { from, to });
        self.state = to;
    }

    pub(crate) fn manifest(&self) -> SessionManifest {
        SessionManifest {
            replica_factor: self.replica_factor,
            nodes: self
                .handles
                .iter()
                .map(|h| ManifestNode {
                    spec: h.spec().clone(),
                    process: h.identity(),
                })
                .collect(),
        }
    }
}

/// What a later invocation needs to find and stop provisioned nodes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    /// Replicas per master.
    pub replica_factor: usize,

    /// Nodes in plan order.
    pub nodes: Vec<ManifestNode>,
}

/// One provisioned node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
    /// The node.
    pub spec: NodeSpec,

    /// Server process, if it was launched.
    pub process: Option<ProcessIdentity>,
}

impl SessionManifest {
    /// Path of the manifest inside a session root.
    #[must_use]
    pub fn path(root: &Path) -> PathBuf {
        root.join(MANIFEST_FILE_NAME)
    }

    /// Reads the manifest from a session root.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub async fn load(root: &Path) -> Result<Self> {
        let contents = tokio::fs::read(Self::path(root)).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::Config(format!("no session found under {}", root.display()))
            } else {
                Error::Io("failed to read session manifest", e)
            }
        })?;

        serde_json::from_slice(&contents).map_err(Error::Manifest)
    }

    /// Writes the manifest into a session root.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, root: &Path) -> Result<()> {
        let contents = serde_json::to_vec_pretty(self).map_err(Error::Manifest)?;

        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| Error::Io("failed to create session root", e))?;
        tokio::fs::write(Self::path(root), contents)
            .await
            .map_err(|e| Error::Io("failed to write session manifest", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kvboot_topology::Role;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_manifest_survives_save_and_load() {
        let dir = TempDir::new().unwrap();
        let manifest = SessionManifest {
            replica_factor: 1,
            nodes: vec![
                ManifestNode {
                    spec: NodeSpec::new("node-7000", "127.0.0.1", 7000, 17000, dir.path().join("7000"))
                        .with_role(Role::Master),
                    process: Some(ProcessIdentity {
                        pid: 4242,
                        start_time: 1_234_567,
                    }),
                },
                ManifestNode {
                    spec: NodeSpec::new("node-7001", "127.0.0.1", 7001, 17001, dir.path().join("7001"))
                        .with_role(Role::Replica),
                    process: None,
                },
            ],
        };

        manifest.save(dir.path()).await.unwrap();
        let loaded = SessionManifest::load(dir.path()).await.unwrap();

        assert_eq!(loaded, manifest);
        assert_eq!(loaded.nodes[1].spec.role_hint(), Role::Replica);
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let err = SessionManifest::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_malformed_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(SessionManifest::path(dir.path()), "{\"nodes\": 3}").unwrap();

        let err = SessionManifest::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }

    #[test]
    fn test_new_session_is_idle() {
        let config = ClusterConfig::new(6, 1, "/tmp/kvboot-session");
        let session = OrchestrationSession::new(&config).unwrap();

        assert_eq!(session.state(), OrchestratorState::Idle);
        assert_eq!(session.specs().len(), 6);
        assert!(session.plan().is_none());
        assert!(session.history().is_empty());

        assert!(OrchestrationSession::new(&ClusterConfig::new(0, 0, "/tmp")).is_err());
    }
}
