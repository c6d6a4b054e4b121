//! Bootstraps a local multi-node key-value cluster: launches the nodes, joins
//! them according to a slot/replica plan, verifies convergence with one repair
//! cycle, and tears everything down again.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod diagnostics;
mod error;
mod joiner;
mod orchestrator;
mod session;
mod watcher;

pub use config::{ClusterConfig, JoinRetryConfig};
pub use diagnostics::{DiagnosticBundle, NodeLog};
pub use error::{Error, JoinError, JoinStep, Result};
pub use joiner::{ClusterJoiner, JoinResult};
pub use orchestrator::{ClusterOrchestrator, ClusterOrchestratorOptions, TeardownReport};
pub use session::{
    MANIFEST_FILE_NAME, ManifestNode, OrchestrationSession, OrchestratorState, SessionManifest,
    Transition,
};
pub use watcher::ConvergenceWatcher;
