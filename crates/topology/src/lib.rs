//! Cluster topology for locally provisioned key-value nodes.
//!
//! This crate provides:
//! - Node descriptions (`NodeSpec`, `Role`)
//! - Slot and replica placement (`TopologyPlanner`, `TopologyPlan`)
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod node;
mod plan;
mod planner;
mod role;

pub use error::{Error, Result};
pub use node::NodeSpec;
pub use plan::{Assignment, SLOT_COUNT, SlotRange, TopologyPlan};
pub use planner::TopologyPlanner;
pub use role::Role;
