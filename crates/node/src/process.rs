//! Spawning, observing and terminating node server processes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interval between liveness checks while waiting for an exit.
const EXIT_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Identifies one process instance across invocations.
///
/// A pid alone is not enough: once the node exits the kernel may hand the
/// same pid to an unrelated process. The start time (clock ticks since boot,
/// from `/proc/<pid>/stat`) tells the two apart.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// Process ID
    pub pid: u32,

    /// Kernel start time of the process.
    pub start_time: u64,
}

impl ProcessIdentity {
    /// Reads the identity of the live process holding `pid`.
    #[must_use]
    pub fn of(pid: u32) -> Option<Self> {
        process_start_time(pid).map(|start_time| Self { pid, start_time })
    }

    /// Whether `pid` is still held by the same process instance.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        process_start_time(self.pid) == Some(self.start_time)
    }
}

/// A node server process, either spawned by this process or adopted from an
/// earlier invocation.
#[derive(Debug)]
pub struct NodeProcess {
    /// Cancelled by the monitor task once the spawned child has been reaped.
    /// Adopted processes have no monitor and are checked through `/proc`.
    exited: Option<CancellationToken>,

    /// Recorded right after spawning. `None` if the child was already gone.
    identity: Option<ProcessIdentity>,

    /// Process ID
    pid: u32,
}

impl NodeProcess {
    /// Spawns `executable` with its output appended to `log_path`.
    ///
    /// The child gets its own process group so terminal signals aimed at the
    /// orchestrator do not reach it, and it keeps running if the orchestrator
    /// exits.
    pub(crate) fn spawn(
        executable: &Path,
        args: &[String],
        env: &[(String, String)],
        working_dir: &Path,
        log_path: &Path,
    ) -> Result<Self, (&'static str, io::Error)> {
        let log = open_log(log_path).map_err(|e| ("failed to open log file", e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| ("failed to duplicate log handle", e))?;

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k, v)))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0);

        debug!("Spawning process: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| ("failed to spawn process", e))?;

        let pid = child.id().ok_or_else(|| {
            (
                "failed to spawn process",
                io::Error::other("no pid available for spawned process"),
            )
        })?;

        debug!("Process spawned with PID: {}", pid);
        let identity = ProcessIdentity::of(pid);

        // Reap the child and record its exit
        let exited = CancellationToken::new();
        let exited_clone = exited.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    info!("Process {} exited with status: {}", pid, status);
                }
                Ok(status) => {
                    error!("Process {} exited with non-zero status: {}", pid, status);
                }
                Err(err) => {
                    error!("Failed to wait for process {}: {}", pid, err);
                }
            }
            exited_clone.cancel();
        });

        Ok(Self {
            exited: Some(exited),
            identity,
            pid,
        })
    }

    /// Takes over a process started by an earlier invocation.
    ///
    /// The process only counts as running, and is only ever signalled, while
    /// its pid is held by the recorded instance.
    #[must_use]
    pub const fn adopt(identity: ProcessIdentity) -> Self {
        Self {
            exited: None,
            identity: Some(identity),
            pid: identity.pid,
        }
    }

    /// Returns the process ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Identity recorded for the process, if known.
    #[must_use]
    pub const fn identity(&self) -> Option<ProcessIdentity> {
        self.identity
    }

    /// Whether the process is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match (&self.exited, &self.identity) {
            (Some(exited), _) => !exited.is_cancelled(),
            (None, Some(identity)) => identity.is_alive(),
            (None, None) => false,
        }
    }

    /// Waits up to `timeout` for the process to exit. Returns whether it did.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        if let Some(exited) = &self.exited {
            return tokio::time::timeout(timeout, exited.cancelled())
                .await
                .is_ok();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_running() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_CHECK_INTERVAL).await;
        }
        true
    }

    /// Sends a signal to the process. A process that is already gone, or
    /// whose pid now belongs to another process, is left alone.
    ///
    /// # Errors
    ///
    /// Returns the errno if the signal could not be delivered.
    pub fn signal(&self, sig: Signal) -> Result<(), Errno> {
        if !self.is_running() {
            return Ok(());
        }

        let raw = i32::try_from(self.pid).map_err(|_| Errno::EINVAL)?;
        match signal::kill(Pid::from_raw(raw), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sends SIGTERM, then SIGKILL if the process outlives `grace`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the process could not be
    /// signalled or survived SIGKILL.
    pub async fn terminate(&self, grace: Duration) -> Result<(), String> {
        if !self.is_running() {
            return Ok(());
        }

        info!("Terminating process {}", self.pid);
        self.signal(Signal::SIGTERM)
            .map_err(|e| format!("SIGTERM to {} failed: {e}", self.pid))?;

        if self.wait_for_exit(grace).await {
            return Ok(());
        }

        warn!("Process {} ignored SIGTERM, killing", self.pid);
        self.signal(Signal::SIGKILL)
            .map_err(|e| format!("SIGKILL to {} failed: {e}", self.pid))?;

        if self.wait_for_exit(grace).await {
            Ok(())
        } else {
            Err(format!("process {} survived SIGKILL", self.pid))
        }
    }
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Start time of a live, non-zombie process.
fn process_start_time(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;

    // The command name may contain spaces and parentheses
    let (_, fields) = stat.rsplit_once(')')?;
    let mut fields = fields.split_whitespace();
    if matches!(fields.next()?, "Z" | "X") {
        return None;
    }

    // Field 22 of the stat line; the state above was field 3
    fields.nth(18)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn spawn_in(dir: &TempDir, executable: &str, args: &[&str]) -> NodeProcess {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        NodeProcess::spawn(
            Path::new(executable),
            &args,
            &[],
            dir.path(),
            &dir.path().join("node.log"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_terminate_running_process() {
        let dir = TempDir::new().unwrap();
        let process = spawn_in(&dir, "sleep", &["30"]);

        assert!(process.is_running());
        process.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!process.is_running());

        // Terminating again is a no-op
        process.terminate(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_output_goes_to_log_file() {
        let dir = TempDir::new().unwrap();
        let process = spawn_in(&dir, "sh", &["-c", "echo ready; echo oops >&2"]);

        assert!(process.wait_for_exit(Duration::from_secs(5)).await);

        let log = std::fs::read_to_string(dir.path().join("node.log")).unwrap();
        assert!(log.contains("ready"));
        assert!(log.contains("oops"));
    }

    #[tokio::test]
    async fn test_adopted_process_can_be_terminated() {
        let dir = TempDir::new().unwrap();
        let spawned = spawn_in(&dir, "sleep", &["30"]);

        let adopted = NodeProcess::adopt(spawned.identity().unwrap());
        assert_eq!(adopted.pid(), spawned.pid());
        assert!(adopted.is_running());

        adopted.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(spawned.wait_for_exit(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_reused_pid_is_never_signalled() {
        let dir = TempDir::new().unwrap();
        let bystander = spawn_in(&dir, "sleep", &["30"]);
        let identity = bystander.identity().unwrap();

        // Same pid, different instance: the recorded node died and the pid
        // was handed out again
        let adopted = NodeProcess::adopt(ProcessIdentity {
            pid: identity.pid,
            start_time: identity.start_time + 1,
        });
        assert!(!adopted.is_running());

        adopted.terminate(Duration::from_millis(100)).await.unwrap();
        adopted.signal(Signal::SIGKILL).unwrap();
        assert!(!bystander.wait_for_exit(Duration::from_millis(300)).await);
        assert!(bystander.is_running());

        bystander.terminate(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_identity_of_exited_process() {
        let dir = TempDir::new().unwrap();
        let process = spawn_in(&dir, "sleep", &["30"]);
        let identity = process.identity().unwrap();
        assert_eq!(ProcessIdentity::of(process.pid()), Some(identity));

        process.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!identity.is_alive());
        assert!(!NodeProcess::adopt(identity).is_running());
    }

    #[test]
    fn test_missing_executable_fails_to_spawn() {
        let dir = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();

        let err = NodeProcess::spawn(
            Path::new("/nonexistent/kvboot-server"),
            &[],
            &[],
            dir.path(),
            &dir.path().join("node.log"),
        )
        .unwrap_err();
        assert_eq!(err.0, "failed to spawn process");
    }
}
