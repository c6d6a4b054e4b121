//! Error types for node process management.

use std::io;

use thiserror::Error;

/// Result type for node process management.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing node processes.
#[derive(Debug, Error)]
pub enum Error {
    /// The server binary could not be located.
    #[error("binary not found: {0}")]
    BinaryNotFound(&'static str),

    /// Cancellation was requested while waiting on the node.
    #[error("{node}: cancelled")]
    Cancelled {
        /// Id of the node being waited on.
        node: String,
    },

    /// The node never answered its health ping.
    #[error("{node}: not healthy after {attempts} attempts ({})", health_detail(.crashed, .last_error))]
    HealthCheckTimeout {
        /// Id of the node.
        node: String,

        /// Health attempts made.
        attempts: u32,

        /// Whether the process had exited, as opposed to being slow.
        crashed: bool,

        /// Last ping failure, if any.
        last_error: Option<String>,
    },

    /// A node had to be launched but no application was configured.
    #[error("no node application configured")]
    NoApplication,

    /// The node process could not be started.
    #[error("{node}: launch failed: {context}: {source}")]
    Launch {
        /// Id of the node.
        node: String,

        /// Step that failed.
        context: &'static str,

        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// One or more stop steps failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// One failed step of stopping a node.
#[derive(Debug, Error)]
pub enum ShutdownFailure {
    /// The admin shutdown command failed.
    #[error("graceful shutdown failed: {0}")]
    Graceful(#[source] kvboot_admin::Error),

    /// The data directory could not be removed.
    #[error("failed to remove data directory: {0}")]
    Reclaim(#[source] io::Error),

    /// The process could not be killed.
    #[error("failed to terminate process: {0}")]
    Terminate(String),
}

/// Every failed step of stopping one node.
#[derive(Debug, Error)]
#[error("failed to stop {node}: {}", join_failures(.failures))]
pub struct ShutdownError {
    /// Id of the node.
    pub node: String,

    /// Failed steps, in the order they were attempted.
    pub failures: Vec<ShutdownFailure>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn health_detail(crashed: &bool, last_error: &Option<String>) -> String {
    let cause = if *crashed {
        "process exited"
    } else {
        "process alive but unresponsive"
    };
    match last_error {
        Some(e) => format!("{cause}, last error: {e}"),
        None => cause.to_string(),
    }
}

fn join_failures(failures: &[ShutdownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
