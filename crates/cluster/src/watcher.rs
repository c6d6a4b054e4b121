//! Polls cluster status until the cluster has the expected shape.

use std::time::Duration;

use kvboot_admin::{AdminClient, ClusterStatus};
use kvboot_node::PollSchedule;
use kvboot_topology::NodeSpec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Waits for convergence as observed from the seed.
#[derive(Clone)]
pub struct ConvergenceWatcher<C>
where
    C: AdminClient,
{
    admin: C,
    cancellation_token: CancellationToken,
    poll_interval: Duration,
}

impl<C> ConvergenceWatcher<C>
where
    C: AdminClient,
{
    /// Creates a new watcher.
    pub const fn new(
        admin: C,
        poll_interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            admin,
            cancellation_token,
            poll_interval,
        }
    }

    /// Polls until one snapshot is `Ok` with exactly `expected_nodes` known
    /// nodes and `expected_masters` masters.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConvergenceTimeout` carrying the final snapshot, or
    /// `Error::Cancelled`.
    pub async fn watch(
        &self,
        seed: &NodeSpec,
        expected_nodes: usize,
        expected_masters: usize,
        timeout: Duration,
    ) -> Result<ClusterStatus> {
        let schedule = PollSchedule::within(timeout, self.poll_interval);
        let mut last_status = ClusterStatus::unknown();

        for attempt in 1..=schedule.attempts {
            if self.cancellation_token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            last_status = match self.admin.cluster_status(seed).await {
                Ok(status) => status,
                Err(e) => {
                    debug!("status poll {} of {} failed: {}", attempt, seed, e);
                    ClusterStatus::unknown()
                }
            };

            debug!(
                "status poll {}/{}: {}",
                attempt, schedule.attempts, last_status
            );

            if last_status.is_converged(expected_nodes, expected_masters) {
                info!("cluster converged: {}", last_status);
                return Ok(last_status);
            }

            if attempt < schedule.attempts && !schedule.pause(&self.cancellation_token).await {
                return Err(Error::Cancelled);
            }
        }

        warn!(
            "cluster did not converge to {} nodes / {} masters: {}",
            expected_nodes, expected_masters, last_status
        );

        Err(Error::ConvergenceTimeout {
            attempts: schedule.attempts,
            last_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use kvboot_admin::ClusterState;
    use kvboot_admin_mock::{AdminCommand, MockAdminClient};

    fn seed() -> NodeSpec {
        NodeSpec::new("node-7000", "127.0.0.1", 7000, 17000, "/tmp/kvboot/7000")
    }

    fn status(state: ClusterState, known: usize, masters: usize) -> ClusterStatus {
        ClusterStatus::with_state(state, known, masters, BTreeMap::new())
    }

    fn watcher(admin: &MockAdminClient) -> ConvergenceWatcher<MockAdminClient> {
        ConvergenceWatcher::new(
            admin.clone(),
            Duration::from_millis(5),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_accepts_first_complete_snapshot() {
        let admin = MockAdminClient::new();
        admin.push_statuses([
            status(ClusterState::PartialJoin, 4, 3),
            status(ClusterState::PartialJoin, 6, 3),
        ]);
        admin.set_status_override(Some(status(ClusterState::Ok, 6, 3)));

        let status = watcher(&admin)
            .watch(&seed(), 6, 3, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(status.state(), ClusterState::Ok);
        assert_eq!(admin.count(AdminCommand::Status), 3);
    }

    #[tokio::test]
    async fn test_never_combines_conditions_from_different_polls() {
        let admin = MockAdminClient::new();

        // Each condition holds on some poll, never all on the same one
        let split = [
            status(ClusterState::Ok, 5, 3),
            status(ClusterState::PartialJoin, 6, 3),
            status(ClusterState::Ok, 6, 2),
        ];
        admin.push_statuses(split.iter().cycle().take(30).cloned());

        let err = watcher(&admin)
            .watch(&seed(), 6, 3, Duration::from_millis(100))
            .await
            .unwrap_err();

        match err {
            Error::ConvergenceTimeout {
                attempts,
                last_status,
            } => {
                assert_eq!(attempts, 20);
                assert_eq!(last_status, split[(20 - 1) % 3]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_query_failures_become_unknown() {
        let admin = MockAdminClient::new();
        admin.set_unreachable(&seed());

        let err = watcher(&admin)
            .watch(&seed(), 1, 1, Duration::from_millis(20))
            .await
            .unwrap_err();

        match err {
            Error::ConvergenceTimeout { last_status, .. } => {
                assert_eq!(last_status, ClusterStatus::unknown());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_degraded_is_never_accepted() {
        let admin = MockAdminClient::new();
        admin.set_status_override(Some(status(ClusterState::Degraded, 6, 3)));

        let err = watcher(&admin)
            .watch(&seed(), 6, 3, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "ConvergenceTimeout");
    }

    #[tokio::test]
    async fn test_observes_cancellation() {
        let admin = MockAdminClient::new();
        admin.set_status_override(Some(status(ClusterState::PartialJoin, 1, 0)));
        let token = CancellationToken::new();
        let watcher = ConvergenceWatcher::new(admin, Duration::from_secs(5), token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = watcher
            .watch(&seed(), 6, 3, Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
