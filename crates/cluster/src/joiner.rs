//! Applies a topology plan to running nodes.

use std::future::Future;

use kvboot_admin::AdminClient;
use kvboot_node::PollSchedule;
use kvboot_topology::{NodeSpec, TopologyPlan};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JoinRetryConfig;
use crate::error::{Error, JoinError, JoinStep, Result};

/// Outcome of a successful join.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JoinResult {
    /// Cluster id of the seed.
    pub seed_id: String,

    /// Cluster ids of the masters in plan order, keyed by node id.
    pub master_ids: Vec<(String, String)>,

    /// Meet commands issued.
    pub meets: usize,

    /// Replicas bound to their master.
    pub replica_bindings: usize,
}

/// Drives the meet handshake and applies slot ownership and replication.
#[derive(Clone)]
pub struct ClusterJoiner<C>
where
    C: AdminClient,
{
    admin: C,
    cancellation_token: CancellationToken,
    retry: JoinRetryConfig,
}

impl<C> ClusterJoiner<C>
where
    C: AdminClient,
{
    /// Creates a new joiner.
    pub const fn new(admin: C, retry: JoinRetryConfig, cancellation_token: CancellationToken) -> Self {
        Self {
            admin,
            cancellation_token,
            retry,
        }
    }

    /// Joins every node through the plan's seed, assigns each master its
    /// slots and binds each replica to its master.
    ///
    /// # Errors
    ///
    /// Returns `Error::Join` naming the node and step of the first call that
    /// was rejected or ran out of attempts, or `Error::Cancelled`.
    pub async fn join(&self, plan: &TopologyPlan) -> Result<JoinResult> {
        let seed = plan.seed();
        info!("joining {} nodes through seed {}", plan.node_count(), seed);

        let mut meets = 0;
        for node in plan.nodes().into_iter().filter(|n| !n.same_node(seed)) {
            self.call(node, JoinStep::Meet, || self.admin.meet(seed, node))
                .await?;
            meets += 1;
        }

        let mut master_ids = Vec::with_capacity(plan.master_count());
        for assignment in plan.assignments() {
            let master = &assignment.master;
            self.call(master, JoinStep::AssignSlots, || {
                self.admin.assign_slots(master, assignment.slots)
            })
            .await?;

            let id = self
                .call(master, JoinStep::NodeId, || self.admin.node_id(master))
                .await?;
            debug!("{} owns slots {} as {}", master, assignment.slots, id);
            master_ids.push((master.id().to_string(), id));
        }

        let mut replica_bindings = 0;
        for (assignment, (_, master_id)) in plan.assignments().iter().zip(&master_ids) {
            for replica in &assignment.replicas {
                self.call(replica, JoinStep::Replicate, || {
                    self.admin.replicate(replica, master_id)
                })
                .await?;
                debug!("{} follows {}", replica, assignment.master);
                replica_bindings += 1;
            }
        }

        let seed_id = master_ids
            .first()
            .map(|(_, id)| id.clone())
            .unwrap_or_default();

        info!(
            "join complete: {} meets, {} masters, {} replica bindings",
            meets,
            master_ids.len(),
            replica_bindings
        );

        Ok(JoinResult {
            seed_id,
            master_ids,
            meets,
            replica_bindings,
        })
    }

    /// Flushes and hard-resets every node. Flush failures are tolerated since
    /// replicas refuse writes. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns `JoinError::Reset` naming every node whose reset failed, or
    /// `Error::Cancelled`.
    pub async fn reset<'a>(&self, nodes: impl IntoIterator<Item = &'a NodeSpec>) -> Result<()> {
        let mut failures = Vec::new();

        for node in nodes {
            if let Err(e) = self.admin.flush(node).await {
                warn!("flush of {} failed, continuing: {}", node, e);
            }

            match self
                .call(node, JoinStep::Reset, || self.admin.reset(node))
                .await
            {
                Ok(()) => debug!("reset {}", node),
                Err(Error::Join(JoinError::Step { node, source, .. })) => {
                    failures.push((node, source));
                }
                Err(e) => return Err(e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(JoinError::Reset { failures }.into())
        }
    }

    /// Runs one admin call, retrying transient failures with a fixed backoff.
    async fn call<T, F, Fut>(&self, node: &NodeSpec, step: JoinStep, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = kvboot_admin::Result<T>>,
    {
        let schedule = PollSchedule {
            attempts: self.retry.max_attempts.max(1),
            interval: self.retry.backoff,
        };

        let mut attempt = 1;
        loop {
            if self.cancellation_token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < schedule.attempts => {
                    debug!(
                        "{} {} attempt {}/{}: {}",
                        node, step, attempt, schedule.attempts, e
                    );
                    if !schedule.pause(&self.cancellation_token).await {
                        return Err(Error::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{} {} failed after {} attempt(s): {}", node, step, attempt, e);
                    return Err(JoinError::Step {
                        node: node.id().to_string(),
                        step,
                        attempts: attempt,
                        source: e,
                    }
                    .into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use kvboot_admin_mock::{AdminCommand, MockAdminClient};
    use kvboot_topology::TopologyPlanner;

    fn specs(count: u16) -> Vec<NodeSpec> {
        (0..count)
            .map(|i| {
                let port = 7000 + i;
                NodeSpec::new(
                    format!("node-{port}"),
                    "127.0.0.1",
                    port,
                    port + 10000,
                    format!("/tmp/kvboot/{port}"),
                )
            })
            .collect()
    }

    fn joiner(admin: &MockAdminClient) -> ClusterJoiner<MockAdminClient> {
        ClusterJoiner::new(
            admin.clone(),
            JoinRetryConfig {
                max_attempts: 3,
                backoff: Duration::from_millis(5),
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_join_six_nodes_one_replica() {
        let admin = MockAdminClient::new();
        let plan = TopologyPlanner::plan(&specs(6), 1).unwrap();

        let result = joiner(&admin).join(&plan).await.unwrap();

        assert_eq!(result.meets, 5);
        assert_eq!(result.master_ids.len(), 3);
        assert_eq!(result.replica_bindings, 3);
        assert_eq!(result.seed_id, MockAdminClient::id_of(plan.seed()));
        assert_eq!(admin.count(AdminCommand::Meet), 5);

        let status = admin.cluster_status(plan.seed()).await.unwrap();
        assert!(status.is_converged(6, 3));
        assert_eq!(status.replica_count(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let admin = MockAdminClient::new();
        let nodes = specs(6);
        let plan = TopologyPlanner::plan(&nodes, 1).unwrap();
        admin.fail_transiently(&nodes[4], AdminCommand::Replicate, Some(2));

        joiner(&admin).join(&plan).await.unwrap();

        assert_eq!(admin.count(AdminCommand::Replicate), 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_name_the_node() {
        let admin = MockAdminClient::new();
        let nodes = specs(6);
        let plan = TopologyPlanner::plan(&nodes, 1).unwrap();
        admin.fail_transiently(&nodes[5], AdminCommand::Meet, None);

        let err = joiner(&admin).join(&plan).await.unwrap_err();

        match err {
            Error::Join(JoinError::Step {
                node,
                step,
                attempts,
                ..
            }) => {
                assert_eq!(node, "node-7005");
                assert_eq!(step, JoinStep::Meet);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let admin = MockAdminClient::new();
        let nodes = specs(3);
        let plan = TopologyPlanner::plan(&nodes, 0).unwrap();
        admin.reject(&nodes[1], AdminCommand::AssignSlots, None);

        let err = joiner(&admin).join(&plan).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Join(JoinError::Step {
                step: JoinStep::AssignSlots,
                attempts: 1,
                ..
            })
        ));
        assert_eq!(admin.count(AdminCommand::AssignSlots), 2);
    }

    #[tokio::test]
    async fn test_reset_tolerates_flush_failures_and_repeats() {
        let admin = MockAdminClient::new();
        let nodes = specs(6);
        let plan = TopologyPlanner::plan(&nodes, 1).unwrap();
        let joiner = joiner(&admin);
        joiner.join(&plan).await.unwrap();

        for replica in &nodes[3..] {
            admin.reject(replica, AdminCommand::Flush, None);
        }

        joiner.reset(&nodes).await.unwrap();
        joiner.reset(&nodes).await.unwrap();

        assert_eq!(admin.count(AdminCommand::Reset), 12);
        let status = admin.cluster_status(&nodes[0]).await.unwrap();
        assert_eq!(status.known_node_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_failures_are_aggregated() {
        let admin = MockAdminClient::new();
        let nodes = specs(4);
        admin.set_unreachable(&nodes[1]);
        admin.reject(&nodes[3], AdminCommand::Reset, None);

        let err = joiner(&admin).reset(&nodes).await.unwrap_err();

        match err {
            Error::Join(err @ JoinError::Reset { .. }) => {
                assert_eq!(err.nodes(), vec!["node-7001", "node-7003"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Every node was still attempted
        assert_eq!(admin.count(AdminCommand::Reset), 1 + 3 + 1 + 1);
    }

    #[tokio::test]
    async fn test_cancelled_join_stops_early() {
        let admin = MockAdminClient::new();
        let plan = TopologyPlanner::plan(&specs(6), 1).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let joiner = ClusterJoiner::new(admin.clone(), JoinRetryConfig::default(), token);
        let err = joiner.join(&plan).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(admin.calls().is_empty());
    }
}
