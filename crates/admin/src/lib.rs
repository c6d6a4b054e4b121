//! Administrative command surface of the provisioned key-value nodes.
//!
//! The orchestrator never speaks the store's data protocol. Everything it
//! needs (health, membership, slot ownership, replication and shutdown) goes
//! through the `AdminClient` trait. `RedisCliAdmin` implements it by shelling
//! out to `redis-cli`; tests use the in-memory mock from `kvboot-admin-mock`.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod redis_cli;
mod status;

pub use error::{Error, Result};
pub use redis_cli::RedisCliAdmin;
pub use status::{ClusterState, ClusterStatus, NodeRole};

use async_trait::async_trait;
use kvboot_topology::{NodeSpec, SlotRange};

/// Request/response access to a node's administrative commands.
#[async_trait]
pub trait AdminClient
where
    Self: Clone + Send + Sync + 'static,
{
    /// Health ping; succeeds once the node accepts commands.
    async fn ping(&self, node: &NodeSpec) -> Result<()>;

    /// Asks the node to exit without persisting data.
    async fn shutdown(&self, node: &NodeSpec) -> Result<()>;

    /// Asks `via` to introduce `target` into its cluster.
    async fn meet(&self, via: &NodeSpec, target: &NodeSpec) -> Result<()>;

    /// Returns the cluster id the node assigned itself.
    async fn node_id(&self, node: &NodeSpec) -> Result<String>;

    /// Makes the node the owner of a slot range.
    async fn assign_slots(&self, node: &NodeSpec, slots: SlotRange) -> Result<()>;

    /// Turns `replica` into a replica of the master with the given cluster id.
    async fn replicate(&self, replica: &NodeSpec, master_id: &str) -> Result<()>;

    /// Returns the membership status as seen by the node.
    async fn cluster_status(&self, node: &NodeSpec) -> Result<ClusterStatus>;

    /// Drops every key held by the node.
    async fn flush(&self, node: &NodeSpec) -> Result<()>;

    /// Wipes the node's membership state. Safe to repeat.
    async fn reset(&self, node: &NodeSpec) -> Result<()>;
}
