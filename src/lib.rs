//! # Clustermux
//!
//! Redis Cluster client with pipelining, redirection handling and
//! event-loop driven dispatch.
//!
//! Keys are hashed to one of 16384 slots (CRC16, honouring `{hash tags}`)
//! and each command is sent to the primary owning its slot. `MOVED` and
//! `ASK` replies are followed transparently up to a configurable bound.
//!
//! Two clients share the same routing core:
//!
//! - [`ClusterClient`] blocks the calling thread, and supports pipelining
//!   through `append_command` / `get_reply` and MULTI/EXEC transactions.
//! - [`AsyncClusterClient`] never blocks; an external event loop reports
//!   readiness and each command's callback runs exactly once.
//!
//! ## Features
//!
//! - `tokio` (default) - [`TokioEventLoop`], an event loop for the async
//!   client built on the tokio reactor
//!
//! ## Example
//!
//! ```no_run
//! use clustermux::ClusterBuilder;
//!
//! fn main() -> clustermux::Result<()> {
//!     let mut client = ClusterBuilder::new()
//!         .seeds("127.0.0.1:7000,127.0.0.1:7001")
//!         .max_redirects(3)
//!         .connect()?;
//!
//!     client.set("{user1}.name", "ann")?;
//!     let name = client.get("{user1}.name")?;
//!     assert_eq!(name.as_deref(), Some(&b"ann"[..]));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod dispatch;
pub mod proto;

cfg_if::cfg_if! {
    if #[cfg(feature = "tokio")] {
        pub mod adapters;
        pub use adapters::tokio::TokioEventLoop;
    }
}

pub use crate::cluster::{key_slot, ClusterClient, NodeAddr, Transaction};
pub use crate::core::builder::{ClusterBuilder, ClusterConfig, RedirectPolicy, RouteStrategy};
pub use crate::core::command::Cmd;
pub use crate::core::{Error, Result};
pub use crate::dispatch::{AsyncClusterClient, EventLoop};
pub use crate::proto::frame::Frame;
