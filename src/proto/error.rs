use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for clustermux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a Redis Cluster.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A socket-level IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// The connection carrying a command failed or was closed before the
    /// reply arrived.
    #[error("connection error: {message}")]
    Connection {
        /// Why the connection went away.
        message: String,
    },

    /// The reply stream was unsynchronized or a reply had an unexpected shape.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The byte stream could not be decoded as RESP.
    #[error("decode error: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: DecodeError,
    },

    /// The server returned an error.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed: {message}")]
    Auth {
        /// Error message from server.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// Key moved to another node (permanent redirect).
    ///
    /// Only produced by [`parse_redis_error`](crate::cluster::parse_redis_error);
    /// routed commands follow MOVED replies instead of returning them.
    #[error("MOVED to slot {slot} at {address}")]
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node owning this slot (e.g., "127.0.0.1:7001").
        address: String,
    },

    /// Temporary redirect during slot migration (ASK redirect).
    #[error("ASK to slot {slot} at {address}")]
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node temporarily handling this slot.
        address: String,
    },

    /// The cluster reported CLUSTERDOWN.
    #[error("CLUSTERDOWN cluster is down")]
    ClusterDown,

    /// No seed or known node could provide the cluster topology.
    #[error("cluster unavailable: {message}")]
    ClusterUnavailable {
        /// The last failure seen while contacting candidates.
        message: String,
    },

    /// No node is known to own the slot, even after a topology refresh.
    #[error("no node serves slot {slot}")]
    UnknownSlot {
        /// The unserved slot.
        slot: u16,
    },

    /// Multi-key operation with keys in different slots.
    ///
    /// All keys of one command must map to the same slot. Use hash tags
    /// `{...}` to colocate keys.
    #[error("CROSSSLOT keys in multi-key operation map to different slots")]
    CrossSlot,

    /// A command kept being redirected past the configured bound.
    #[error("too many cluster redirections, last error: {last}")]
    TooManyRedirections {
        /// Text of the last relocation signal received.
        last: String,
    },

    /// A transaction could not be pinned to one node, or did not queue.
    #[error("transaction aborted: {message}")]
    TransactionAborted {
        /// Why the transaction was aborted.
        message: String,
    },
}

impl Error {
    /// Returns true if this error means the connection that produced it is
    /// no longer usable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Connection { .. } | Error::Decode { .. }
        )
    }

    /// Error handed to each command still owed a reply by a connection that
    /// failed with `reason`.
    ///
    /// An undecodable or unsynchronized stream stays a [`Error::Protocol`];
    /// every other failure becomes [`Error::Connection`].
    pub fn for_pending(origin: impl fmt::Display, reason: &Error) -> Error {
        let message = format!("{origin}: {reason}");
        match reason {
            Error::Decode { .. } | Error::Protocol { .. } => Error::Protocol { message },
            _ => Error::Connection { message },
        }
    }
}

/// Error returned when the inbound byte stream is not valid RESP.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a new decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
