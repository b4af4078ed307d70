//! Parsing of cluster error replies.
//!
//! Redis Cluster uses special error replies for redirects:
//! - `MOVED <slot> <host>:<port>` - slot ownership moved permanently
//! - `ASK <slot> <host>:<port>` - slot is migrating, ask once
//! - `CLUSTERDOWN` - cluster is unavailable
//!
//! Routing branches on [`Redirect`] values rather than on reply text.

use crate::cluster::topology::NodeAddr;
use crate::proto::error::Error;
use crate::proto::frame::Frame;

/// The kind of relocation a node asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Permanent: update the slot map and resend.
    Moved,
    /// Transient: send `ASKING` plus the command to the target this once.
    Ask,
}

/// A relocation signal parsed from an error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// MOVED or ASK.
    pub kind: RedirectKind,
    /// The slot being redirected.
    pub slot: u16,
    /// Where to send the command. The host is empty if the node did not
    /// know its own address.
    pub addr: NodeAddr,
}

impl Redirect {
    /// Returns the redirect carried by an error frame, if any.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        match frame {
            Frame::Error(msg) => Self::parse(msg),
            _ => None,
        }
    }

    /// Parses `MOVED <slot> <addr>` or `ASK <slot> <addr>`.
    pub fn parse(msg: &[u8]) -> Option<Self> {
        let msg = std::str::from_utf8(msg).ok()?.trim();
        let (kind, args) = if let Some(args) = msg.strip_prefix("MOVED ") {
            (RedirectKind::Moved, args)
        } else if let Some(args) = msg.strip_prefix("ASK ") {
            (RedirectKind::Ask, args)
        } else {
            return None;
        };
        let (slot, address) = parse_redirect(args)?;
        let addr = NodeAddr::parse(&address).ok()?;
        Some(Self { kind, slot, addr })
    }
}

/// Parses an error reply into a typed error.
///
/// # Returns
///
/// - `Error::Moved` for MOVED redirects
/// - `Error::Ask` for ASK redirects
/// - `Error::ClusterDown` for CLUSTERDOWN errors
/// - `Error::CrossSlot` for CROSSSLOT errors
/// - `Error::Server` for anything else
///
/// # Examples
///
/// ```
/// use clustermux::cluster::parse_redis_error;
/// use clustermux::Error;
///
/// let err = parse_redis_error(b"MOVED 3999 127.0.0.1:7000");
/// assert!(matches!(err, Error::Moved { slot: 3999, .. }));
/// ```
pub fn parse_redis_error(error_msg: &[u8]) -> Error {
    let msg = String::from_utf8_lossy(error_msg);
    let msg = msg.trim();

    if let Some(redirect) = Redirect::parse(msg.as_bytes()) {
        let slot = redirect.slot;
        let address = redirect.addr.to_string();
        return match redirect.kind {
            RedirectKind::Moved => Error::Moved { slot, address },
            RedirectKind::Ask => Error::Ask { slot, address },
        };
    }

    if msg.starts_with("CLUSTERDOWN") {
        return Error::ClusterDown;
    }

    if msg.starts_with("CROSSSLOT") {
        return Error::CrossSlot;
    }

    Error::Server {
        message: msg.to_string(),
    }
}

/// Parses redirect arguments: `<slot> <host>:<port>`.
fn parse_redirect(args: &str) -> Option<(u16, String)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 2 {
        return None;
    }

    let slot: u16 = parts[0].parse().ok()?;
    if slot >= crate::cluster::slot::SLOT_COUNT {
        return None;
    }

    Some((slot, parts[1].to_string()))
}
