//! Error types for topology planning.

use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a set of nodes cannot be arranged into a cluster topology.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// Two specs share the same host and port.
    #[error("invalid topology: node {0} appears more than once")]
    DuplicateNode(String),

    /// The node count does not split evenly into master groups.
    #[error(
        "invalid topology: {node_count} nodes cannot be split into groups of {group_size} (1 master + {replica_factor} replicas)"
    )]
    UnevenGroups {
        /// Number of nodes offered to the planner.
        node_count: usize,

        /// Nodes per master group.
        group_size: usize,

        /// Requested replicas per master.
        replica_factor: usize,
    },

    /// No master would be left to own slots.
    #[error("invalid topology: at least one master is required")]
    NoMasters,

    /// Every master needs at least one hash slot.
    #[error("invalid topology: {master_count} masters exceed the {max} available hash slots")]
    TooManyMasters {
        /// Masters the node count would produce.
        master_count: usize,

        /// Upper bound on masters.
        max: usize,
    },
}
