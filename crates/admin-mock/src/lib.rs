//! Mock implementation of the admin interface for testing purposes.
//!
//! `MockAdminClient` simulates a cluster as seen from its seed: meets grow the
//! membership, slot assignments create masters, replicate calls bind replicas
//! and resets wipe them again. Failures and status sequences can be injected
//! per node and per command, and every call is recorded.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use kvboot_admin::{AdminClient, ClusterStatus, Error, NodeRole, Result};
use kvboot_topology::{NodeSpec, SLOT_COUNT, SlotRange};
use parking_lot::Mutex;

/// Commands of the admin interface, used to target injected failures and to
/// inspect the call log.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AdminCommand {
    /// `ping`
    Ping,
    /// `shutdown`
    Shutdown,
    /// `meet`, keyed by the target node.
    Meet,
    /// `node_id`
    NodeId,
    /// `assign_slots`
    AssignSlots,
    /// `replicate`, keyed by the replica.
    Replicate,
    /// `cluster_status`
    Status,
    /// `flush`
    Flush,
    /// `reset`
    Reset,
}

/// One recorded call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdminCall {
    /// Which command was issued.
    pub command: AdminCommand,

    /// Address of the node the command concerned.
    pub node: String,
}

#[derive(Clone, Copy, Debug)]
enum FailureKind {
    NotYetVisible,
    Rejected,
}

#[derive(Clone, Debug)]
struct InjectedFailure {
    kind: FailureKind,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<AdminCall>,
    down: HashSet<String>,
    failures: HashMap<(String, AdminCommand), InjectedFailure>,
    members: BTreeSet<String>,
    replicas: BTreeMap<String, String>,
    seed: Option<String>,
    slots: BTreeMap<String, SlotRange>,
    status_queue: VecDeque<ClusterStatus>,
    status_override: Option<ClusterStatus>,
}

impl MockState {
    fn take_failure(&mut self, node: &str, command: AdminCommand) -> Option<Error> {
        let key = (node.to_string(), command);
        if self.failures.get(&key)?.remaining == Some(0) {
            self.failures.remove(&key);
            return None;
        }

        let failure = self.failures.get_mut(&key)?;
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
        }

        Some(match failure.kind {
            FailureKind::NotYetVisible => Error::NotYetVisible {
                node: node.to_string(),
                reply: "ERR Unknown node".to_string(),
            },
            FailureKind::Rejected => Error::Rejected {
                node: node.to_string(),
                command: format!("{command:?}"),
                reply: "ERR injected failure".to_string(),
            },
        })
    }

    fn simulated_status(&self) -> ClusterStatus {
        let Some(seed) = &self.seed else {
            return ClusterStatus::new(false, 1, self.slots.len(), BTreeMap::new());
        };

        let ids: HashMap<String, String> = self
            .members
            .iter()
            .chain(std::iter::once(seed))
            .map(|addr| (mock_id(addr), addr.clone()))
            .collect();

        let mut roles = BTreeMap::new();
        for addr in self.members.iter().chain(std::iter::once(seed)) {
            let role = match self.replicas.get(addr) {
                Some(master_id) if ids.contains_key(master_id) => NodeRole::Replica {
                    master_id: master_id.clone(),
                },
                _ => NodeRole::Master,
            };
            roles.insert(addr.clone(), role);
        }

        let covered: usize = self
            .slots
            .iter()
            .filter(|(addr, _)| roles.contains_key(*addr))
            .map(|(_, range)| range.len())
            .sum();
        let masters = self
            .slots
            .keys()
            .filter(|addr| roles.contains_key(*addr))
            .count();

        ClusterStatus::new(
            covered == usize::from(SLOT_COUNT),
            roles.len(),
            masters,
            roles,
        )
    }

    fn forget(&mut self, addr: &str) {
        self.slots.remove(addr);
        self.replicas.remove(addr);
        self.members.remove(addr);
        if self.seed.as_deref() == Some(addr) {
            self.seed = None;
            self.members.clear();
        }
    }
}

fn mock_id(addr: &str) -> String {
    let hex: String = addr.bytes().map(|b| format!("{b:02x}")).collect();
    format!("{hex:0>40}")
}

/// In-memory admin client simulating a cluster.
#[derive(Clone, Debug, Default)]
pub struct MockAdminClient {
    state: Arc<Mutex<MockState>>,
}

impl MockAdminClient {
    /// Creates a mock with every node reachable and no cluster formed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `command` against `node` fail with a transient "not yet visible"
    /// reply, `times` times or forever when `None`.
    pub fn fail_transiently(&self, node: &NodeSpec, command: AdminCommand, times: Option<usize>) {
        self.inject(node, command, FailureKind::NotYetVisible, times);
    }

    /// Makes `command` against `node` fail with an error reply, `times` times
    /// or forever when `None`.
    pub fn reject(&self, node: &NodeSpec, command: AdminCommand, times: Option<usize>) {
        self.inject(node, command, FailureKind::Rejected, times);
    }

    fn inject(&self, node: &NodeSpec, command: AdminCommand, kind: FailureKind, times: Option<usize>) {
        self.state.lock().failures.insert(
            (node.address(), command),
            InjectedFailure {
                kind,
                remaining: times,
            },
        );
    }

    /// Makes the node refuse connections, as if its process never came up.
    pub fn set_unreachable(&self, node: &NodeSpec) {
        self.state.lock().down.insert(node.address());
    }

    /// Queues statuses returned by the next status polls, before falling back
    /// to the simulated view.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = ClusterStatus>) {
        self.state.lock().status_queue.extend(statuses);
    }

    /// Answers every status poll with `status` once the queue is drained.
    pub fn set_status_override(&self, status: Option<ClusterStatus>) {
        self.state.lock().status_override = status;
    }

    /// The cluster id the mock reports for a node.
    #[must_use]
    pub fn id_of(node: &NodeSpec) -> String {
        mock_id(&node.address())
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<AdminCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of one command.
    #[must_use]
    pub fn count(&self, command: AdminCommand) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// Records the call and returns an injected or connectivity failure.
    fn begin(&self, node: &NodeSpec, command: AdminCommand) -> Result<()> {
        let addr = node.address();
        let mut state = self.state.lock();
        state.calls.push(AdminCall {
            command,
            node: addr.clone(),
        });

        if state.down.contains(&addr) {
            return Err(Error::Unreachable {
                node: addr,
                reason: "Connection refused".to_string(),
            });
        }

        match state.take_failure(&addr, command) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AdminClient for MockAdminClient {
    async fn ping(&self, node: &NodeSpec) -> Result<()> {
        self.begin(node, AdminCommand::Ping)
    }

    async fn shutdown(&self, node: &NodeSpec) -> Result<()> {
        self.begin(node, AdminCommand::Shutdown)?;
        let mut state = self.state.lock();
        state.down.insert(node.address());
        Ok(())
    }

    async fn meet(&self, via: &NodeSpec, target: &NodeSpec) -> Result<()> {
        self.begin(target, AdminCommand::Meet)?;
        let mut state = self.state.lock();
        if state.seed.is_none() {
            state.seed = Some(via.address());
        }
        state.members.insert(target.address());
        Ok(())
    }

    async fn node_id(&self, node: &NodeSpec) -> Result<String> {
        self.begin(node, AdminCommand::NodeId)?;
        Ok(Self::id_of(node))
    }

    async fn assign_slots(&self, node: &NodeSpec, slots: SlotRange) -> Result<()> {
        self.begin(node, AdminCommand::AssignSlots)?;
        let mut state = self.state.lock();
        if state.seed.is_none() {
            state.seed = Some(node.address());
        }
        state.slots.insert(node.address(), slots);
        Ok(())
    }

    async fn replicate(&self, replica: &NodeSpec, master_id: &str) -> Result<()> {
        self.begin(replica, AdminCommand::Replicate)?;
        self.state
            .lock()
            .replicas
            .insert(replica.address(), master_id.to_string());
        Ok(())
    }

    async fn cluster_status(&self, node: &NodeSpec) -> Result<ClusterStatus> {
        self.begin(node, AdminCommand::Status)?;
        let mut state = self.state.lock();
        if let Some(status) = state.status_queue.pop_front() {
            return Ok(status);
        }
        if let Some(status) = &state.status_override {
            return Ok(status.clone());
        }
        Ok(state.simulated_status())
    }

    async fn flush(&self, node: &NodeSpec) -> Result<()> {
        self.begin(node, AdminCommand::Flush)
    }

    async fn reset(&self, node: &NodeSpec) -> Result<()> {
        self.begin(node, AdminCommand::Reset)?;
        self.state.lock().forget(&node.address());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kvboot_admin::ClusterState;

    fn node(port: u16) -> NodeSpec {
        NodeSpec::new(format!("node-{port}"), "127.0.0.1", port, port + 10000, "/tmp")
    }

    #[tokio::test]
    async fn test_simulated_cluster_converges() {
        let admin = MockAdminClient::new();
        let (a, b) = (node(7000), node(7001));

        admin.meet(&a, &b).await.unwrap();
        let status = admin.cluster_status(&a).await.unwrap();
        assert_eq!(status.known_node_count(), 2);
        assert_eq!(status.state(), ClusterState::PartialJoin);

        admin
            .assign_slots(&a, SlotRange { start: 0, end: SLOT_COUNT - 1 })
            .await
            .unwrap();
        admin
            .replicate(&b, &MockAdminClient::id_of(&a))
            .await
            .unwrap();

        let status = admin.cluster_status(&a).await.unwrap();
        assert!(status.is_converged(2, 1));
        assert_eq!(status.replica_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let admin = MockAdminClient::new();
        let n = node(7000);

        admin.fail_transiently(&n, AdminCommand::Ping, Some(2));
        assert!(admin.ping(&n).await.unwrap_err().is_transient());
        assert!(admin.ping(&n).await.is_err());
        assert!(admin.ping(&n).await.is_ok());
        assert_eq!(admin.count(AdminCommand::Ping), 3);

        admin.reject(&n, AdminCommand::Flush, None);
        for _ in 0..3 {
            assert!(matches!(
                admin.flush(&n).await,
                Err(Error::Rejected { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_reset_wipes_membership() {
        let admin = MockAdminClient::new();
        let (a, b) = (node(7000), node(7001));

        admin.meet(&a, &b).await.unwrap();
        admin.reset(&a).await.unwrap();
        admin.reset(&a).await.unwrap();

        let status = admin.cluster_status(&b).await.unwrap();
        assert_eq!(status.known_node_count(), 1);
    }

    #[tokio::test]
    async fn test_status_queue_then_override() {
        let admin = MockAdminClient::new();
        let n = node(7000);

        admin.push_statuses([ClusterStatus::unknown()]);
        admin.set_status_override(Some(ClusterStatus::with_state(
            ClusterState::Degraded,
            6,
            2,
            BTreeMap::new(),
        )));

        assert_eq!(
            admin.cluster_status(&n).await.unwrap().state(),
            ClusterState::Unknown
        );
        for _ in 0..2 {
            assert_eq!(admin.cluster_status(&n).await.unwrap().master_count(), 2);
        }
    }

    #[tokio::test]
    async fn test_shutdown_makes_node_unreachable() {
        let admin = MockAdminClient::new();
        let n = node(7000);

        admin.shutdown(&n).await.unwrap();
        assert!(matches!(
            admin.ping(&n).await,
            Err(Error::Unreachable { .. })
        ));
    }
}
