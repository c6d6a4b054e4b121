//! Node role types for the topology.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The role a node is expected to take in the cluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns a slot range and accepts writes.
    Master,

    /// Follows a master.
    Replica,

    /// Not yet placed by a plan.
    #[default]
    Unassigned,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Replica => write!(f, "replica"),
            Self::Unassigned => write!(f, "unassigned"),
        }
    }
}
