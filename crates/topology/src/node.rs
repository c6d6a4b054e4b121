//! Static description of a node to provision.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Role;

/// Immutable description of one node in the cluster.
///
/// Two specs describe the same node when their host and port match; the id,
/// role hint and data directory do not take part in identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    id: String,
    host: String,
    port: u16,
    bus_port: u16,
    role_hint: Role,
    data_dir: PathBuf,
}

impl NodeSpec {
    /// Creates a new spec with an unassigned role.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        bus_port: u16,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            bus_port,
            role_hint: Role::Unassigned,
            data_dir: data_dir.into(),
        }
    }

    /// Returns a copy of this spec carrying the given role hint.
    #[must_use]
    pub fn with_role(&self, role_hint: Role) -> Self {
        Self {
            role_hint,
            ..self.clone()
        }
    }

    /// Human readable id of the node.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host the node listens on.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Client and admin port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Cluster bus port used for gossip.
    #[must_use]
    pub const fn bus_port(&self) -> u16 {
        self.bus_port
    }

    /// Role hint, set by the planner.
    #[must_use]
    pub const fn role_hint(&self) -> Role {
        self.role_hint
    }

    /// Private directory holding the node's config, logs and data.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `host:port`, the node's identity.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether both specs refer to the same node.
    #[must_use]
    pub fn same_node(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl PartialEq for NodeSpec {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other)
    }
}

impl Eq for NodeSpec {}

impl std::hash::Hash for NodeSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.id, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_role_and_dir() {
        let a = NodeSpec::new("a", "127.0.0.1", 7000, 17000, "/tmp/a");
        let b = NodeSpec::new("b", "127.0.0.1", 7000, 17001, "/tmp/b").with_role(Role::Master);
        let c = NodeSpec::new("a", "127.0.0.1", 7001, 17000, "/tmp/a");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(b.role_hint(), Role::Master);
        assert_eq!(a.role_hint(), Role::Unassigned);
    }

    #[test]
    fn test_serde_keeps_role_hint() {
        let spec = NodeSpec::new("n1", "localhost", 7000, 17000, "/tmp/n1").with_role(Role::Replica);
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"replica\""));

        let back: NodeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role_hint(), Role::Replica);
        assert_eq!(back.data_dir(), Path::new("/tmp/n1"));
    }
}
