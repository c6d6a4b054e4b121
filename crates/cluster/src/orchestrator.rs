//! The provisioning state machine.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use kvboot_admin::{AdminClient, ClusterStatus};
use kvboot_node::{
    NodeApplication, NodeProcessManager, NodeProcessManagerOptions, NodeState, ShutdownError,
    ShutdownFailure,
};
use kvboot_topology::{TopologyPlan, TopologyPlanner};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClusterConfig;
use crate::diagnostics::DiagnosticBundle;
use crate::error::{Error, Result};
use crate::joiner::ClusterJoiner;
use crate::session::{OrchestrationSession, OrchestratorState, SessionManifest};
use crate::watcher::ConvergenceWatcher;

/// Options for creating a `ClusterOrchestrator`.
pub struct ClusterOrchestratorOptions<C>
where
    C: AdminClient,
{
    /// Admin client shared by every stage.
    pub admin: C,

    /// The server to launch for each node. Not needed to inspect or tear
    /// down sessions resumed from a manifest.
    pub application: Option<Arc<dyn NodeApplication>>,

    /// Token that aborts a running `start`.
    pub cancellation_token: CancellationToken,

    /// Timings and retry limits.
    pub config: ClusterConfig,
}

/// What `teardown` did.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Ids of nodes stopped by this call.
    pub stopped: Vec<String>,

    /// Nodes that could not be fully stopped.
    pub errors: Vec<ShutdownError>,

    /// Directories that could not be removed.
    pub reclaim_errors: Vec<(PathBuf, io::Error)>,
}

impl TeardownReport {
    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.reclaim_errors.is_empty()
    }

    /// Whether there was nothing left to tear down.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty() && self.is_clean()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stopped {} node(s)", self.stopped.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        for (path, error) in &self.reclaim_errors {
            write!(f, "; failed to remove {}: {error}", path.display())?;
        }
        Ok(())
    }
}

/// Composes planning, process management, joining and verification into one
/// provisioning flow with a single repair cycle.
pub struct ClusterOrchestrator<C>
where
    C: AdminClient,
{
    admin: C,
    cancellation_token: CancellationToken,
    config: ClusterConfig,
    joiner: ClusterJoiner<C>,
    nodes: NodeProcessManager<C>,
    watcher: ConvergenceWatcher<C>,
}

impl<C> ClusterOrchestrator<C>
where
    C: AdminClient,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(
        ClusterOrchestratorOptions {
            admin,
            application,
            cancellation_token,
            config,
        }: ClusterOrchestratorOptions<C>,
    ) -> Self {
        let nodes = NodeProcessManager::new(NodeProcessManagerOptions {
            admin: admin.clone(),
            application,
            cancellation_token: cancellation_token.clone(),
            poll_interval: config.poll_interval,
            shutdown_grace: config.shutdown_grace,
        });
        let joiner = ClusterJoiner::new(
            admin.clone(),
            config.join_retry.clone(),
            cancellation_token.clone(),
        );
        let watcher = ConvergenceWatcher::new(
            admin.clone(),
            config.poll_interval,
            cancellation_token.clone(),
        );

        Self {
            admin,
            cancellation_token,
            config,
            joiner,
            nodes,
            watcher,
        }
    }

    /// Creates an idle session for the configured nodes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn session(&self) -> Result<OrchestrationSession> {
        OrchestrationSession::new(&self.config)
    }

    /// Provisions, joins and verifies the session's cluster.
    ///
    /// On failure the session ends in `Failed` with a diagnostic bundle.
    /// Failures while provisioning, and cancellation at any stage, also tear
    /// the session down.
    ///
    /// A root that still holds a manifest or node directories belongs to
    /// another session; it is refused and left untouched.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the run.
    pub async fn start(&self, session: &mut OrchestrationSession) -> Result<ClusterStatus> {
        if session.state != OrchestratorState::Idle {
            return Err(Error::Config(format!(
                "session is {}, only idle sessions can be started",
                session.state
            )));
        }
        Self::ensure_unclaimed(session).await?;

        match self.run(session).await {
            Ok(status) => {
                session.transition(OrchestratorState::Ready);
                info!("cluster ready: {}", status);
                Ok(status)
            }
            Err(e) => {
                let stage = session.state;
                error!("{} during {}: {}", e.kind(), stage, e);

                session.diagnostics = Some(
                    DiagnosticBundle::collect(&e, &session.specs, session.last_status.clone())
                        .await,
                );
                session.transition(OrchestratorState::Failed);

                if stage == OrchestratorState::Provisioning || matches!(e, Error::Cancelled) {
                    let report = self.teardown(session).await;
                    if !report.is_clean() {
                        warn!("teardown after failure incomplete: {}", report);
                    }
                }

                Err(e)
            }
        }
    }

    async fn ensure_unclaimed(session: &OrchestrationSession) -> Result<()> {
        let claimed = std::iter::once(SessionManifest::path(&session.root))
            .chain(session.specs.iter().map(|spec| spec.data_dir().to_path_buf()));

        for path in claimed {
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| Error::Io("failed to inspect session root", e))?;
            if exists {
                return Err(Error::Config(format!(
                    "{} already exists; tear down the existing session under {} first",
                    path.display(),
                    session.root.display()
                )));
            }
        }

        Ok(())
    }

    async fn run(&self, session: &mut OrchestrationSession) -> Result<ClusterStatus> {
        session.transition(OrchestratorState::Provisioning);
        let plan = TopologyPlanner::plan(&session.specs, session.replica_factor)?;
        session.plan = Some(plan.clone());
        self.provision(session, &plan).await?;

        session.transition(OrchestratorState::Joining);
        self.joiner.join(&plan).await?;

        session.transition(OrchestratorState::Verifying);
        match self.verify(session, &plan).await {
            Err(Error::ConvergenceTimeout { last_status, .. })
                if last_status.master_count() != plan.master_count() =>
            {
                warn!(
                    "{} of {} masters after convergence timeout, repairing",
                    last_status.master_count(),
                    plan.master_count()
                );
                self.repair(session).await
            }
            result => result,
        }
    }

    async fn provision(&self, session: &mut OrchestrationSession, plan: &TopologyPlan) -> Result<()> {
        for spec in plan.nodes() {
            if self.cancellation_token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let handle = self.nodes.start(spec).await?;
            session.handles.push(handle);
        }

        session.manifest().save(&session.root).await?;

        let timeout = self.config.health_timeout;
        let results = join_all(
            session
                .handles
                .iter_mut()
                .map(|handle| self.nodes.await_healthy(handle, timeout)),
        )
        .await;

        // Report cancellation ahead of the health failures it causes
        if self.cancellation_token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        for result in results {
            result?;
        }

        info!("{} nodes healthy", session.handles.len());
        Ok(())
    }

    async fn verify(
        &self,
        session: &mut OrchestrationSession,
        plan: &TopologyPlan,
    ) -> Result<ClusterStatus> {
        let result = self
            .watcher
            .watch(
                plan.seed(),
                plan.node_count(),
                plan.master_count(),
                self.config.convergence_timeout,
            )
            .await;

        match &result {
            Ok(status) | Err(Error::ConvergenceTimeout { last_status: status, .. }) => {
                session.last_status = Some(status.clone());
            }
            Err(_) => {}
        }

        result
    }

    async fn repair(&self, session: &mut OrchestrationSession) -> Result<ClusterStatus> {
        session.transition(OrchestratorState::Repairing);
        session.repair_attempts += 1;

        self.joiner.reset(&session.specs).await?;
        let plan = TopologyPlanner::plan(&session.specs, session.replica_factor)?;
        session.plan = Some(plan.clone());

        session.transition(OrchestratorState::Joining);
        self.joiner.join(&plan).await?;

        session.transition(OrchestratorState::Verifying);
        self.verify(session, &plan).await
    }

    /// Stops every node of the session and removes every node directory and
    /// the manifest. The session root is removed only if nothing else is left
    /// in it. Continues past failures and may be repeated.
    pub async fn teardown(&self, session: &mut OrchestrationSession) -> TeardownReport {
        let mut report = TeardownReport::default();

        for handle in &mut session.handles {
            match self.nodes.stop(handle).await {
                Ok(_) => report.stopped.push(handle.spec().id().to_string()),
                Err(kvboot_node::Error::Shutdown(e)) => report.errors.push(e),
                Err(e) => report.errors.push(ShutdownError {
                    node: handle.spec().id().to_string(),
                    failures: vec![ShutdownFailure::Terminate(e.to_string())],
                }),
            }
        }
        session
            .handles
            .retain(|handle| handle.state() != NodeState::Stopped);

        for spec in &session.specs {
            let dir = spec.data_dir().to_path_buf();
            if let Err(e) = ignore_missing(tokio::fs::remove_dir_all(&dir).await) {
                warn!("failed to remove {}: {}", dir.display(), e);
                report.reclaim_errors.push((dir, e));
            }
        }

        let manifest = SessionManifest::path(&session.root);
        if let Err(e) = ignore_missing(tokio::fs::remove_file(&manifest).await) {
            warn!("failed to remove {}: {}", manifest.display(), e);
            report.reclaim_errors.push((manifest, e));
        }

        // The root may hold files that are not ours; only an empty root goes
        match tokio::fs::remove_dir(&session.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!("keeping {}: {}", session.root.display(), e),
        }

        info!("teardown of {}: {}", session.root.display(), report);
        report
    }

    /// Rebuilds a session from the manifest an earlier invocation left in
    /// `root`, adopting its node processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is missing or malformed.
    pub async fn resume(&self, root: &Path) -> Result<OrchestrationSession> {
        let manifest = SessionManifest::load(root).await?;
        let specs: Vec<_> = manifest.nodes.iter().map(|n| n.spec.clone()).collect();
        let plan = TopologyPlanner::plan(&specs, manifest.replica_factor)?;

        let handles = manifest
            .nodes
            .iter()
            .map(|n| self.nodes.adopt(&n.spec, n.process))
            .collect();

        Ok(OrchestrationSession::resumed(
            root,
            manifest.replica_factor,
            plan,
            handles,
        ))
    }

    /// Asks the session's seed for the current cluster status.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has no plan or the seed cannot be
    /// queried.
    pub async fn status(&self, session: &OrchestrationSession) -> Result<ClusterStatus> {
        let plan = session
            .plan()
            .ok_or_else(|| Error::Config("session has not been planned".to_string()))?;

        Ok(self.admin.cluster_status(plan.seed()).await?)
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
