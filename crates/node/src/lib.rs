//! Launches, health-checks and stops the server processes backing each
//! cluster node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod application;
mod error;
mod handle;
mod manager;
mod poll;
mod process;

pub use application::{NodeApplication, RedisServerApp, RedisServerOptions};
pub use error::{Error, Result, ShutdownError, ShutdownFailure};
pub use handle::{NodeHandle, NodeState};
pub use manager::{LOG_FILE_NAME, NodeProcessManager, NodeProcessManagerOptions};
pub use poll::PollSchedule;
pub use process::{NodeProcess, ProcessIdentity};
