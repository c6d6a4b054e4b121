//! Launching, health-checking and stopping node processes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use kvboot_admin::AdminClient;
use kvboot_topology::NodeSpec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::NodeApplication;
use crate::error::{Error, Result, ShutdownError, ShutdownFailure};
use crate::handle::{NodeHandle, NodeState};
use crate::poll::PollSchedule;
use crate::process::{NodeProcess, ProcessIdentity};

/// File receiving each node's stdout and stderr.
pub const LOG_FILE_NAME: &str = "node.log";

/// Options for creating a `NodeProcessManager`.
pub struct NodeProcessManagerOptions<C>
where
    C: AdminClient,
{
    /// Admin client used for health pings and graceful shutdown.
    pub admin: C,

    /// The server to launch. Managers that only adopt and stop nodes
    /// started elsewhere need none.
    pub application: Option<Arc<dyn NodeApplication>>,

    /// Token that aborts health waits.
    pub cancellation_token: CancellationToken,

    /// Pause between health attempts.
    pub poll_interval: Duration,

    /// How long each shutdown step waits for the process to exit.
    pub shutdown_grace: Duration,
}

/// Owns the lifecycle of node processes.
#[derive(Clone)]
pub struct NodeProcessManager<C>
where
    C: AdminClient,
{
    admin: C,
    application: Option<Arc<dyn NodeApplication>>,
    cancellation_token: CancellationToken,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl<C> NodeProcessManager<C>
where
    C: AdminClient,
{
    /// Creates a new process manager.
    #[must_use]
    pub fn new(
        NodeProcessManagerOptions {
            admin,
            application,
            cancellation_token,
            poll_interval,
            shutdown_grace,
        }: NodeProcessManagerOptions<C>,
    ) -> Self {
        Self {
            admin,
            application,
            cancellation_token,
            poll_interval,
            shutdown_grace,
        }
    }

    /// Creates the node's directory, writes its config and launches the
    /// server with output appended to the node's log file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Launch` if any of those steps fail, or
    /// `Error::NoApplication` if the manager has no server to launch.
    pub async fn start(&self, spec: &NodeSpec) -> Result<NodeHandle> {
        let application = self.application.as_ref().ok_or(Error::NoApplication)?;

        let launch_error = |context: &'static str| {
            let node = spec.id().to_string();
            move |source: io::Error| Error::Launch {
                node,
                context,
                source,
            }
        };

        let data_dir = spec.data_dir();
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(launch_error("failed to create node directory"))?;

        let config_path = data_dir.join(application.config_file_name());
        tokio::fs::write(&config_path, application.render_config(spec))
            .await
            .map_err(launch_error("failed to write config file"))?;

        let log_path = data_dir.join(LOG_FILE_NAME);
        let process = NodeProcess::spawn(
            application.executable(),
            &application.args(spec, &config_path),
            &application.env(),
            data_dir,
            &log_path,
        )
        .map_err(|(context, source)| launch_error(context)(source))?;

        info!(
            "started {} {} (pid {})",
            application.name(),
            spec,
            process.pid()
        );

        Ok(NodeHandle {
            log_path,
            process: Some(process),
            spec: spec.clone(),
            state: NodeState::Starting,
        })
    }

    /// Builds a handle for a node started by an earlier invocation, or for
    /// one that was never started when `identity` is `None`.
    ///
    /// A recorded process whose pid now belongs to another process is
    /// dropped, so stopping the handle never signals it.
    #[must_use]
    pub fn adopt(&self, spec: &NodeSpec, identity: Option<ProcessIdentity>) -> NodeHandle {
        let process = identity
            .map(NodeProcess::adopt)
            .filter(NodeProcess::is_running);
        if let (None, Some(identity)) = (&process, identity) {
            info!("{} (pid {}) is no longer running", spec, identity.pid);
        }
        let state = if process.is_some() {
            NodeState::Ready
        } else {
            NodeState::Failed
        };

        NodeHandle {
            log_path: spec.data_dir().join(LOG_FILE_NAME),
            process,
            spec: spec.clone(),
            state,
        }
    }

    /// Pings the node until it answers, it dies, or `timeout` worth of poll
    /// intervals have elapsed.
    ///
    /// # Errors
    ///
    /// Returns `Error::HealthCheckTimeout` with `crashed` telling a dead
    /// process from a slow one, or `Error::Cancelled`.
    pub async fn await_healthy(
        &self,
        handle: &mut NodeHandle,
        timeout: Duration,
    ) -> Result<NodeState> {
        let schedule = PollSchedule::within(timeout, self.poll_interval);
        let node = handle.spec.id().to_string();
        let mut last_error = None;

        for attempt in 1..=schedule.attempts {
            if self.cancellation_token.is_cancelled() {
                return Err(Error::Cancelled { node });
            }

            if !handle.is_running() {
                warn!("{} exited before becoming healthy", handle.spec);
                handle.state = NodeState::Failed;
                return Err(Error::HealthCheckTimeout {
                    node,
                    attempts: attempt,
                    crashed: true,
                    last_error,
                });
            }

            match self.admin.ping(&handle.spec).await {
                Ok(()) => {
                    info!("{} is ready after {} attempt(s)", handle.spec, attempt);
                    handle.state = NodeState::Ready;
                    return Ok(NodeState::Ready);
                }
                Err(e) => {
                    debug!("{} health attempt {}: {}", handle.spec, attempt, e);
                    last_error = Some(e.to_string());
                }
            }

            if attempt < schedule.attempts && !schedule.pause(&self.cancellation_token).await {
                return Err(Error::Cancelled { node });
            }
        }

        handle.state = NodeState::Failed;
        Err(Error::HealthCheckTimeout {
            node,
            attempts: schedule.attempts,
            crashed: !handle.is_running(),
            last_error,
        })
    }

    /// Stops the node: graceful admin shutdown, then SIGTERM/SIGKILL if it is
    /// still alive, then removal of its directory. Every step is attempted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Shutdown` listing every step that failed.
    pub async fn stop(&self, handle: &mut NodeHandle) -> Result<NodeState> {
        let mut failures = Vec::new();

        if let Some(process) = handle.process.as_ref().filter(|p| p.is_running()) {
            match self.admin.shutdown(&handle.spec).await {
                Ok(()) => {
                    if !process.wait_for_exit(self.shutdown_grace).await {
                        debug!("{} still running after graceful shutdown", handle.spec);
                    }
                }
                Err(e) => {
                    warn!("graceful shutdown of {} failed: {}", handle.spec, e);
                    failures.push(ShutdownFailure::Graceful(e));
                }
            }

            if let Err(e) = process.terminate(self.shutdown_grace).await {
                warn!("failed to terminate {}: {}", handle.spec, e);
                failures.push(ShutdownFailure::Terminate(e));
            }
        }

        match tokio::fs::remove_dir_all(handle.spec.data_dir()).await {
            Ok(()) => debug!("removed {}", handle.spec.data_dir().display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("failed to remove directory of {}: {}", handle.spec, e);
                failures.push(ShutdownFailure::Reclaim(e));
            }
        }

        if !handle.is_running() {
            handle.process = None;
        }

        if failures.is_empty() {
            info!("stopped {}", handle.spec);
            handle.state = NodeState::Stopped;
            Ok(NodeState::Stopped)
        } else {
            handle.state = NodeState::Failed;
            Err(Error::Shutdown(ShutdownError {
                node: handle.spec.id().to_string(),
                failures,
            }))
        }
    }
}
