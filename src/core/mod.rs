//! # Core
//!
//! Per-node plumbing shared by the cluster clients.
//!
//! ## Modules
//!
//! - [`builder`] - Cluster configuration and builder
//! - [`command`] - Command construction and reply conversion
//! - [`connection`] - Blocking pipelined connection with a FIFO reply queue
//! - [`transport`] - Byte streams and how they are opened
//!

#![warn(missing_docs)]

pub use crate::proto::error::{Error, Result};

/// Cluster builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Blocking connection management.
pub mod connection;
/// Transports for blocking connections.
pub mod transport;
