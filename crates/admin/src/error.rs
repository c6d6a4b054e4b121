//! Error types for administrative calls.

use std::io;

use thiserror::Error;

/// Result type for administrative calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by an `AdminClient`.
#[derive(Debug, Error)]
pub enum Error {
    /// The admin binary could not be located.
    #[error("binary not found: {0}")]
    BinaryNotFound(&'static str),

    /// IO error.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),

    /// The node refers to a peer it has not learned about yet.
    #[error("{node}: not yet visible: {reply}")]
    NotYetVisible {
        /// Address of the node that answered.
        node: String,

        /// Raw reply.
        reply: String,
    },

    /// The reply could not be understood.
    #[error("{node}: unparseable reply: {reason}")]
    Parse {
        /// Address of the node that answered.
        node: String,

        /// What was wrong with the reply.
        reason: String,
    },

    /// The node answered with an error reply.
    #[error("{node}: `{command}` rejected: {reply}")]
    Rejected {
        /// Address of the node that answered.
        node: String,

        /// Command that was sent.
        command: String,

        /// Raw reply.
        reply: String,
    },

    /// No reply within the per-call timeout.
    #[error("{node}: `{command}` timed out")]
    Timeout {
        /// Address of the node.
        node: String,

        /// Command that was sent.
        command: String,
    },

    /// Nothing is listening on the node's port.
    #[error("{node}: unreachable: {reason}")]
    Unreachable {
        /// Address of the node.
        node: String,

        /// Connection failure reported by the client.
        reason: String,
    },
}

impl Error {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotYetVisible { .. } | Self::Timeout { .. } | Self::Unreachable { .. }
        )
    }
}
