//! Planned arrangement of masters, replicas and hash slots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{NodeSpec, Role};

/// Number of hash slots the key space is divided into.
pub const SLOT_COUNT: u16 = 16384;

/// Inclusive range of hash slots owned by one master.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SlotRange {
    /// First slot of the range.
    pub start: u16,

    /// Last slot of the range (inclusive).
    pub end: u16,
}

impl SlotRange {
    /// Number of slots covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Ranges are never empty; provided for symmetry with `len`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Splits the full slot space into `parts` contiguous ranges.
    ///
    /// The first `SLOT_COUNT % parts` ranges get one extra slot.
    /// Returns no ranges when `parts` is zero or exceeds the slot count.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn split(parts: usize) -> Vec<Self> {
        let total = usize::from(SLOT_COUNT);
        if parts == 0 || parts > total {
            return Vec::new();
        }

        let base = total / parts;
        let extra = total % parts;

        let mut ranges = Vec::with_capacity(parts);
        let mut next = 0usize;
        for i in 0..parts {
            let len = base + usize::from(i < extra);
            let start = next;
            let end = next + len - 1;
            ranges.push(Self {
                start: start as u16,
                end: end as u16,
            });
            next = end + 1;
        }

        ranges
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One master with its replicas and slots.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Assignment {
    /// The master node.
    pub master: NodeSpec,

    /// Replicas following the master, in plan order.
    pub replicas: Vec<NodeSpec>,

    /// Slots served by the master.
    pub slots: SlotRange,
}

/// Result of planning: every node placed exactly once.
///
/// Only `TopologyPlanner::plan` builds plans, so a plan always holds at least
/// one master.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TopologyPlan {
    assignments: Vec<Assignment>,
    replica_factor: usize,
}

impl TopologyPlan {
    pub(crate) const fn new(assignments: Vec<Assignment>, replica_factor: usize) -> Self {
        Self {
            assignments,
            replica_factor,
        }
    }

    /// Assignments in master order.
    #[must_use]
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Replicas per master.
    #[must_use]
    pub const fn replica_factor(&self) -> usize {
        self.replica_factor
    }

    /// Number of masters.
    #[must_use]
    pub fn master_count(&self) -> usize {
        self.assignments.len()
    }

    /// Total number of nodes in the plan.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.assignments.len() * (1 + self.replica_factor)
    }

    /// The seed node: the first master.
    #[must_use]
    pub fn seed(&self) -> &NodeSpec {
        &self.assignments[0].master
    }

    /// Masters in plan order.
    pub fn masters(&self) -> impl Iterator<Item = &NodeSpec> {
        self.assignments.iter().map(|a| &a.master)
    }

    /// Every node in plan order: all masters first, then replicas round by round.
    #[must_use]
    pub fn nodes(&self) -> Vec<&NodeSpec> {
        let mut nodes: Vec<&NodeSpec> = self.masters().collect();
        for round in 0..self.replica_factor {
            for assignment in &self.assignments {
                nodes.push(&assignment.replicas[round]);
            }
        }
        nodes
    }

    /// Replicas paired with the master they follow.
    pub fn replica_bindings(&self) -> impl Iterator<Item = (&NodeSpec, &NodeSpec)> {
        self.assignments
            .iter()
            .flat_map(|a| a.replicas.iter().map(move |r| (r, &a.master)))
    }

    /// Role planned for the given node, if it is part of the plan.
    #[must_use]
    pub fn role_of(&self, spec: &NodeSpec) -> Option<Role> {
        for assignment in &self.assignments {
            if assignment.master.same_node(spec) {
                return Some(Role::Master);
            }
            if assignment.replicas.iter().any(|r| r.same_node(spec)) {
                return Some(Role::Replica);
            }
        }
        None
    }
}
