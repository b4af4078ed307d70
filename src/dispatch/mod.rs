//! # Dispatch
//!
//! Event-loop driven cluster client.
//!
//! [`AsyncClusterClient`] never blocks and never spawns: an external event
//! loop opens sockets, watches readiness and calls back into
//! [`handle_connect`](AsyncClusterClient::handle_connect),
//! [`handle_readable`](AsyncClusterClient::handle_readable) and
//! [`handle_writable`](AsyncClusterClient::handle_writable). Every reply is
//! delivered to the callback given with its command, exactly once, from
//! inside one of those calls.
//!
//! The client keeps no timers. When a command timeout is configured the loop
//! asks [`next_deadline`](AsyncClusterClient::next_deadline) and calls
//! [`handle_timeouts`](AsyncClusterClient::handle_timeouts) once it passes.
//!
//! The loop is abstracted by [`EventLoop`]; a tokio implementation ships in
//! `adapters::tokio` behind the default `tokio` feature.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::cluster::topology::NodeAddr;

mod client;
mod connection;

pub use client::{AsyncClusterClient, ReplyCallback, StatusCallback};
pub use connection::{AsyncConnection, ConnState};

/// Identifies one connection between the client and its event loop.
///
/// A new id is allocated for every connection attempt, so notifications
/// for a connection that was already dropped are recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A connected non-blocking socket.
///
/// Both methods must return [`io::ErrorKind::WouldBlock`] instead of
/// blocking; `try_read` returns `Ok(0)` once the peer closed.
pub trait NonBlockingIo {
    /// Reads available bytes.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Writes as many bytes as the socket accepts.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// The external event loop driving an [`AsyncClusterClient`].
pub trait EventLoop {
    /// Socket handed to the client once connected.
    type Io: NonBlockingIo;

    /// Starts connecting to `addr`, giving up after `timeout` if set.
    ///
    /// The outcome must be reported later through
    /// [`AsyncClusterClient::handle_connect`]; an `Err` here means the
    /// attempt could not even start. A timed out attempt is reported as an
    /// [`io::ErrorKind::TimedOut`] error.
    fn connect(
        &mut self,
        id: ConnectionId,
        addr: &NodeAddr,
        timeout: Option<Duration>,
    ) -> io::Result<()>;

    /// Sets which readiness notifications the connection wants.
    fn attach(&mut self, id: ConnectionId, want_read: bool, want_write: bool);

    /// Stops watching the connection and releases the loop's handle on it.
    fn detach(&mut self, id: ConnectionId);
}
