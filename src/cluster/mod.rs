//! # Cluster
//!
//! Redis Cluster routing with slot-based dispatch, topology discovery,
//! redirect handling (MOVED/ASK), pipelining and pinned transactions.
//!
//! ## Features
//!
//! - **Slot-based routing**: commands go to the primary owning their slot
//! - **Topology discovery**: `CLUSTER SLOTS` or `CLUSTER NODES`
//! - **Redirect handling**: MOVED patches the slot map, ASK is one-shot
//! - **Pipelining**: append now, collect replies in order later
//! - **Hash tags**: `{...}` colocates related keys
//!
//! ## Example
//!
//! ```no_run
//! # fn example() -> clustermux::Result<()> {
//! use clustermux::ClusterClient;
//!
//! let mut client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001")?;
//! client.set("key", "value")?;
//! let value = client.get("key")?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod commands;
mod errors;
pub mod registry;
pub mod router;
pub mod slot;
pub mod topology;
mod transaction;

pub use client::ClusterClient;
pub use errors::{parse_redis_error, Redirect, RedirectKind};
pub use registry::NodeIter;
pub use slot::{key_slot, SlotMap, SLOT_COUNT};
pub use topology::{ClusterTopology, NodeAddr, NodeFlags, NodeId, NodeInfo, NodeRole, SlotRange};
pub use transaction::Transaction;

pub(crate) use client::{auth_command, parse_topology};
