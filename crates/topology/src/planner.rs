//! Deterministic placement of nodes into masters and replicas.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::plan::{Assignment, SLOT_COUNT, SlotRange, TopologyPlan};
use crate::{NodeSpec, Role};

/// Computes slot and replica assignments for an ordered node set.
#[derive(Clone, Copy, Debug, Default)]
pub struct TopologyPlanner;

impl TopologyPlanner {
    /// Arranges `nodes` into `nodes.len() / (replica_factor + 1)` master groups.
    ///
    /// The first `master_count` nodes become masters in input order. The rest
    /// are dealt round-robin as replicas, one per master per round. The same
    /// ordered input always yields the same plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the node count is not a multiple of
    /// `replica_factor + 1`, if no master would result, if there would be more
    /// masters than hash slots, or if a node appears more than once.
    pub fn plan(nodes: &[NodeSpec], replica_factor: usize) -> Result<TopologyPlan> {
        let group_size = replica_factor.checked_add(1).ok_or(Error::NoMasters)?;

        if nodes.len() % group_size != 0 {
            return Err(Error::UnevenGroups {
                node_count: nodes.len(),
                group_size,
                replica_factor,
            });
        }

        let master_count = nodes.len() / group_size;
        if master_count < 1 {
            return Err(Error::NoMasters);
        }
        if master_count > usize::from(SLOT_COUNT) {
            return Err(Error::TooManyMasters {
                master_count,
                max: usize::from(SLOT_COUNT),
            });
        }

        let mut seen = HashSet::with_capacity(nodes.len());
        for node in nodes {
            if !seen.insert(node) {
                return Err(Error::DuplicateNode(node.address()));
            }
        }

        let (masters, replicas) = nodes.split_at(master_count);
        let slots = SlotRange::split(master_count);

        let mut assignments: Vec<Assignment> = masters
            .iter()
            .zip(slots)
            .map(|(master, slots)| Assignment {
                master: master.with_role(Role::Master),
                replicas: Vec::with_capacity(replica_factor),
                slots,
            })
            .collect();

        for (i, replica) in replicas.iter().enumerate() {
            assignments[i % master_count]
                .replicas
                .push(replica.with_role(Role::Replica));
        }

        Ok(TopologyPlan::new(assignments, replica_factor))
    }
}
