//! Structured snapshots of cluster membership.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches the leading fields of a `CLUSTER NODES` line:
/// `<id> <host>:<port>@<bus>[,<hostname>] <flags> <master-id>`
static NODE_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+) (\S*):(\d+)@\d+\S* (\S+) (\S+)").expect("Invalid regex pattern")
});

/// Overall state of the cluster as seen from one node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// The status could not be obtained.
    Unknown,

    /// Membership or slot coverage is still propagating.
    PartialJoin,

    /// The node reports a stable cluster.
    Ok,

    /// At least one node is flagged as failed.
    Degraded,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::PartialJoin => "partial-join",
            Self::Ok => "ok",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Role of a single node as reported by the cluster.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum NodeRole {
    /// Serves (or may serve) slots.
    Master,

    /// Follows the master with the given cluster id.
    Replica {
        /// Cluster id of the followed master.
        master_id: String,
    },

    /// Still completing the meet handshake.
    Handshake,

    /// Flagged as failed by the cluster.
    Failed,
}

/// Immutable snapshot of cluster membership.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    state: ClusterState,
    known_node_count: usize,
    master_count: usize,
    per_node_role: BTreeMap<String, NodeRole>,
}

impl ClusterStatus {
    /// Builds a snapshot, deriving the overall state from the node's stable
    /// flag and the reported roles.
    #[must_use]
    pub fn new(
        stable: bool,
        known_node_count: usize,
        master_count: usize,
        per_node_role: BTreeMap<String, NodeRole>,
    ) -> Self {
        let state = if per_node_role.values().any(|r| *r == NodeRole::Handshake) {
            ClusterState::PartialJoin
        } else if per_node_role.values().any(|r| *r == NodeRole::Failed) {
            ClusterState::Degraded
        } else if stable {
            ClusterState::Ok
        } else {
            ClusterState::PartialJoin
        };

        Self::with_state(state, known_node_count, master_count, per_node_role)
    }

    /// Builds a snapshot with an explicit state.
    #[must_use]
    pub const fn with_state(
        state: ClusterState,
        known_node_count: usize,
        master_count: usize,
        per_node_role: BTreeMap<String, NodeRole>,
    ) -> Self {
        Self {
            state,
            known_node_count,
            master_count,
            per_node_role,
        }
    }

    /// Placeholder for a poll that produced no answer.
    #[must_use]
    pub const fn unknown() -> Self {
        Self::with_state(ClusterState::Unknown, 0, 0, BTreeMap::new())
    }

    /// Parses the output of `CLUSTER INFO` and `CLUSTER NODES`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or malformed field.
    pub fn parse(info: &str, nodes: &str) -> Result<Self, String> {
        let fields: HashMap<&str, &str> = info
            .lines()
            .filter_map(|line| line.trim().split_once(':'))
            .collect();

        let stable = match fields.get("cluster_state") {
            Some(&"ok") => true,
            Some(_) => false,
            None => return Err("missing cluster_state".to_string()),
        };
        let known_node_count = parse_count(&fields, "cluster_known_nodes")?;
        let master_count = parse_count(&fields, "cluster_size")?;

        let mut per_node_role = BTreeMap::new();
        for line in nodes.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let caps = NODE_LINE_REGEX
                .captures(line)
                .ok_or_else(|| format!("malformed node line: {line}"))?;
            let address = format!("{}:{}", &caps[2], &caps[3]);
            per_node_role.insert(address, role_from_flags(&caps[4], &caps[5]));
        }

        Ok(Self::new(stable, known_node_count, master_count, per_node_role))
    }

    /// Overall state.
    #[must_use]
    pub const fn state(&self) -> ClusterState {
        self.state
    }

    /// Number of nodes the answering node knows about, itself included.
    #[must_use]
    pub const fn known_node_count(&self) -> usize {
        self.known_node_count
    }

    /// Number of masters serving at least one slot.
    #[must_use]
    pub const fn master_count(&self) -> usize {
        self.master_count
    }

    /// Role of every node, keyed by `host:port`.
    #[must_use]
    pub const fn per_node_role(&self) -> &BTreeMap<String, NodeRole> {
        &self.per_node_role
    }

    /// Number of nodes reported as replicas.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.per_node_role
            .values()
            .filter(|r| matches!(r, NodeRole::Replica { .. }))
            .count()
    }

    /// Whether this one snapshot is stable and reports exactly the expected
    /// node and master counts.
    #[must_use]
    pub fn is_converged(&self, expected_nodes: usize, expected_masters: usize) -> bool {
        self.state == ClusterState::Ok
            && self.known_node_count == expected_nodes
            && self.master_count == expected_masters
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} known_nodes={} masters={} replicas={}",
            self.state,
            self.known_node_count,
            self.master_count,
            self.replica_count()
        )
    }
}

fn parse_count(fields: &HashMap<&str, &str>, key: &str) -> Result<usize, String> {
    fields
        .get(key)
        .ok_or_else(|| format!("missing {key}"))?
        .parse()
        .map_err(|e| format!("invalid {key}: {e}"))
}

fn role_from_flags(flags: &str, master_id: &str) -> NodeRole {
    let flags: Vec<&str> = flags.split(',').collect();

    if flags.contains(&"handshake") {
        NodeRole::Handshake
    } else if flags.contains(&"fail") {
        NodeRole::Failed
    } else if flags.contains(&"slave") || flags.contains(&"replica") {
        NodeRole::Replica {
            master_id: master_id.to_string(),
        }
    } else {
        NodeRole::Master
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_OK: &str = "cluster_state:ok\r\ncluster_slots_assigned:16384\r\ncluster_slots_ok:16384\r\ncluster_known_nodes:6\r\ncluster_size:3\r\ncluster_current_epoch:6\r\n";

    const NODES_OK: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:7003@17003 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:7001@17001 master - 0 1426238316232 2 connected 5462-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:7002@17002 master - 0 1426238318243 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:7004@17004 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 connected
824fe116063bc5fcf9f4ffd895bc17aee7731ac3 127.0.0.1:7005@17005 slave 292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 0 1426238317741 6 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-5461
";

    #[test]
    fn test_parse_converged_cluster() {
        let status = ClusterStatus::parse(INFO_OK, NODES_OK).unwrap();

        assert_eq!(status.state(), ClusterState::Ok);
        assert_eq!(status.known_node_count(), 6);
        assert_eq!(status.master_count(), 3);
        assert_eq!(status.replica_count(), 3);
        assert!(status.is_converged(6, 3));
        assert!(!status.is_converged(6, 2));

        assert_eq!(
            status.per_node_role().get("127.0.0.1:7004"),
            Some(&NodeRole::Replica {
                master_id: "67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1".to_string()
            })
        );
        assert_eq!(
            status.per_node_role().get("127.0.0.1:7000"),
            Some(&NodeRole::Master)
        );
    }

    #[test]
    fn test_handshake_is_partial_join() {
        let nodes = "\
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-16383
9c1a0d3c1f7e0b1b0f7d3e2c5e7a5d9f0c1b2a3d 127.0.0.1:7001@17001 handshake - 0 0 0 disconnected
";
        let status = ClusterStatus::parse(INFO_OK, nodes).unwrap();
        assert_eq!(status.state(), ClusterState::PartialJoin);
        assert!(!status.is_converged(6, 3));
    }

    #[test]
    fn test_failed_node_is_degraded() {
        let nodes = "\
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-16383
9c1a0d3c1f7e0b1b0f7d3e2c5e7a5d9f0c1b2a3d 127.0.0.1:7001@17001 master,fail - 0 0 0 disconnected
";
        let status = ClusterStatus::parse(INFO_OK, nodes).unwrap();
        assert_eq!(status.state(), ClusterState::Degraded);
    }

    #[test]
    fn test_unstable_flag_is_partial_join() {
        let info = INFO_OK.replace("cluster_state:ok", "cluster_state:fail");
        let status = ClusterStatus::parse(&info, NODES_OK).unwrap();
        assert_eq!(status.state(), ClusterState::PartialJoin);
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(ClusterStatus::parse("cluster_known_nodes:1\r\n", "").is_err());
        assert!(ClusterStatus::parse("cluster_state:ok\r\ncluster_size:1\r\n", "").is_err());
        assert!(ClusterStatus::parse(INFO_OK, "garbage").is_err());
    }

    #[test]
    fn test_serializes_for_operators() {
        let status = ClusterStatus::parse(INFO_OK, NODES_OK).unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "ok");
        assert_eq!(json["per_node_role"]["127.0.0.1:7003"]["role"], "replica");
        assert_eq!(
            status.to_string(),
            "state=ok known_nodes=6 masters=3 replicas=3"
        );
    }
}
