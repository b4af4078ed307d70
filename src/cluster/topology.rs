//! Cluster topology data structures and parsers.
//!
//! This module provides types for representing a Redis Cluster topology,
//! including node addresses, roles, slot ranges, and parsers for
//! `CLUSTER SLOTS` and `CLUSTER NODES` replies.

use std::fmt;

use crate::cluster::slot::{SlotMap, SLOT_COUNT};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// Network identity of a cluster node.
///
/// Two nodes are the same node exactly when host and port are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NodeAddr {
    /// Creates a node address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`, `[v6]:port` or `v6:port`.
    ///
    /// The host may be empty (`:7000`); cluster nodes send that when they do
    /// not know their own address, and callers substitute the host they
    /// reached the node through.
    ///
    /// # Examples
    ///
    /// ```
    /// use clustermux::NodeAddr;
    ///
    /// let addr = NodeAddr::parse("127.0.0.1:7000").unwrap();
    /// assert_eq!(addr.port, 7000);
    /// let v6 = NodeAddr::parse("[::1]:7001").unwrap();
    /// assert_eq!(v6.host, "::1");
    /// assert_eq!(v6.to_string(), "[::1]:7001");
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::InvalidArgument {
            message: format!("invalid node address: {s}"),
        };

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            (host, port)
        } else {
            s.rsplit_once(':').ok_or_else(invalid)?
        };
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }

    /// Returns this address, replacing an empty host with `host`.
    pub fn or_host(mut self, host: &str) -> Self {
        if self.host.is_empty() {
            self.host = host.to_string();
        }
        self
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Role of a node within its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    /// Owns slots and accepts writes.
    #[default]
    Primary,
    /// Replicates a primary.
    Replica,
    /// Reached through explicit dispatch and not yet listed by a topology
    /// reply. Never routed to, never iterated.
    Unassigned,
}

/// Unique identifier for a node in the cluster.
///
/// Node IDs are 40-character hex strings assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new NodeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the node ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flags reported for a node by `CLUSTER NODES`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeFlags {
    /// `master`
    pub primary: bool,
    /// `slave`
    pub replica: bool,
    /// `myself`: the node that answered the query
    pub myself: bool,
    /// `fail?`: possibly failing
    pub pfail: bool,
    /// `fail`: confirmed failed
    pub fail: bool,
    /// `handshake`: not yet part of the cluster
    pub handshake: bool,
    /// `noaddr`: address unknown
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parses node flags from a comma-separated string.
    ///
    /// # Examples
    ///
    /// ```
    /// use clustermux::cluster::NodeFlags;
    ///
    /// let flags = NodeFlags::parse("myself,master");
    /// assert!(flags.primary);
    /// assert!(flags.myself);
    /// assert!(!flags.replica);
    /// ```
    pub fn parse(flags: &str) -> Self {
        let mut parsed = Self::default();
        for flag in flags.split(',') {
            match flag.trim() {
                "master" => parsed.primary = true,
                "slave" => parsed.replica = true,
                "myself" => parsed.myself = true,
                "fail?" | "pfail" => parsed.pfail = true,
                "fail" => parsed.fail = true,
                "handshake" => parsed.handshake = true,
                "noaddr" => parsed.noaddr = true,
                _ => {}
            }
        }
        parsed
    }

    /// Returns true if the node can serve traffic.
    pub fn is_usable(&self) -> bool {
        !self.fail && !self.handshake && !self.noaddr
    }
}

/// A node as described by a topology reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Network address.
    pub addr: NodeAddr,
    /// Server-assigned id, when the reply carried one.
    pub id: Option<NodeId>,
    /// Primary or replica.
    pub role: NodeRole,
    /// For replicas, the id of the primary they follow.
    pub primary_id: Option<NodeId>,
    /// Raw flags (all default for `CLUSTER SLOTS`, which carries none).
    pub flags: NodeFlags,
}

/// An inclusive range of hash slots served by one primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    /// First slot of the range.
    pub start: u16,
    /// Last slot of the range (inclusive).
    pub end: u16,
    /// Primary serving the range.
    pub primary: NodeAddr,
    /// Replicas of that primary.
    pub replicas: Vec<NodeAddr>,
}

impl SlotRange {
    /// Returns true if the given slot is within this range.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Returns the number of slots in this range.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Returns true if this range is empty (invalid).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Cluster topology as reported by one node.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    /// Slot ranges with their primaries and replicas.
    pub ranges: Vec<SlotRange>,
    /// Every node mentioned by the reply, without duplicates.
    pub nodes: Vec<NodeInfo>,
}

impl ClusterTopology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `CLUSTER SLOTS` reply.
    ///
    /// Each entry is `[start, end, [host, port, id?], replica...]`. An empty
    /// host means "the node you asked", so `fallback_host` is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the reply is not an array, or a range
    /// is malformed or out of bounds.
    pub fn from_cluster_slots(frame: &Frame, fallback_host: &str) -> Result<Self> {
        let entries = frame.as_array().ok_or_else(|| Error::Protocol {
            message: "CLUSTER SLOTS response must be an array".to_string(),
        })?;

        let mut topology = Self::new();
        for entry in entries {
            let parts = entry
                .as_array()
                .filter(|parts| parts.len() >= 3)
                .ok_or_else(|| Error::Protocol {
                    message: "CLUSTER SLOTS entry must be an array of at least 3 items"
                        .to_string(),
                })?;

            let start = slot_number(&parts[0])?;
            let end = slot_number(&parts[1])?;
            if start > end {
                return Err(Error::Protocol {
                    message: format!("invalid slot range {start}-{end}"),
                });
            }

            let primary = parse_slots_node(&parts[2], fallback_host)?;
            let mut replicas = Vec::new();
            for replica in &parts[3..] {
                let node = parse_slots_node(replica, fallback_host)?;
                topology.add_node(NodeInfo {
                    addr: node.0.clone(),
                    id: node.1,
                    role: NodeRole::Replica,
                    primary_id: None,
                    flags: NodeFlags::default(),
                });
                replicas.push(node.0);
            }

            topology.add_node(NodeInfo {
                addr: primary.0.clone(),
                id: primary.1,
                role: NodeRole::Primary,
                primary_id: None,
                flags: NodeFlags::default(),
            });
            topology.ranges.push(SlotRange {
                start,
                end,
                primary: primary.0,
                replicas,
            });
        }

        Ok(topology)
    }

    /// Parses the text reply of `CLUSTER NODES`.
    ///
    /// Each line is
    /// `<id> <ip:port@cport[,hostname]> <flags> <primary> <ping> <pong> <epoch> <link> <slot>...`.
    /// Slot fields in brackets describe migrations in progress and are
    /// skipped; failed, handshaking and address-less nodes are ignored.
    pub fn from_cluster_nodes(text: &str, fallback_host: &str) -> Result<Self> {
        let mut topology = Self::new();
        let mut replicas_of: Vec<(NodeId, NodeAddr)> = Vec::new();
        let mut primaries: Vec<(NodeId, usize)> = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return Err(Error::Protocol {
                    message: format!("malformed CLUSTER NODES line: {line}"),
                });
            }

            let flags = NodeFlags::parse(fields[2]);
            if !flags.is_usable() {
                continue;
            }

            let id = NodeId::new(fields[0]);
            let endpoint = fields[1].split('@').next().unwrap_or_default();
            let addr = NodeAddr::parse(endpoint)?.or_host(fallback_host);
            if addr.port == 0 {
                continue;
            }
            let primary_id = match fields[3] {
                "-" => None,
                other => Some(NodeId::new(other)),
            };
            let role = if flags.replica {
                NodeRole::Replica
            } else {
                NodeRole::Primary
            };

            if role == NodeRole::Replica {
                if let Some(owner) = &primary_id {
                    replicas_of.push((owner.clone(), addr.clone()));
                }
            } else {
                for field in &fields[8..] {
                    if field.starts_with('[') {
                        continue;
                    }
                    let (start, end) = match field.split_once('-') {
                        Some((s, e)) => (parse_slot_text(s)?, parse_slot_text(e)?),
                        None => {
                            let slot = parse_slot_text(field)?;
                            (slot, slot)
                        }
                    };
                    if start > end {
                        return Err(Error::Protocol {
                            message: format!("invalid slot range {start}-{end}"),
                        });
                    }
                    primaries.push((id.clone(), topology.ranges.len()));
                    topology.ranges.push(SlotRange {
                        start,
                        end,
                        primary: addr.clone(),
                        replicas: Vec::new(),
                    });
                }
            }

            topology.add_node(NodeInfo {
                addr,
                id: Some(id),
                role,
                primary_id,
                flags,
            });
        }

        for (owner, replica) in replicas_of {
            for (id, index) in &primaries {
                if *id == owner {
                    topology.ranges[*index].replicas.push(replica.clone());
                }
            }
        }

        Ok(topology)
    }

    /// Returns the distinct primaries that own at least one slot.
    pub fn primaries(&self) -> Vec<NodeAddr> {
        let mut out: Vec<NodeAddr> = Vec::new();
        for range in &self.ranges {
            if !out.contains(&range.primary) {
                out.push(range.primary.clone());
            }
        }
        out
    }

    /// Finds the primary responsible for a slot.
    pub fn primary_for_slot(&self, slot: u16) -> Option<&NodeAddr> {
        self.ranges
            .iter()
            .find(|range| range.contains(slot))
            .map(|range| &range.primary)
    }

    /// Builds a complete slot map carrying the given version.
    pub fn to_slot_map(&self, version: u64) -> SlotMap {
        let mut map = SlotMap::empty();
        for range in &self.ranges {
            map.assign_range(range.start, range.end, &range.primary);
        }
        map.set_version(version);
        map
    }

    fn add_node(&mut self, node: NodeInfo) {
        if !self.nodes.iter().any(|known| known.addr == node.addr) {
            self.nodes.push(node);
        }
    }
}

fn slot_number(frame: &Frame) -> Result<u16> {
    match frame {
        Frame::Integer(n) if (0..SLOT_COUNT as i64).contains(n) => Ok(*n as u16),
        other => Err(Error::Protocol {
            message: format!("invalid slot number in CLUSTER SLOTS: {other:?}"),
        }),
    }
}

fn parse_slot_text(text: &str) -> Result<u16> {
    text.parse::<u16>()
        .ok()
        .filter(|slot| *slot < SLOT_COUNT)
        .ok_or_else(|| Error::Protocol {
            message: format!("invalid slot number in CLUSTER NODES: {text}"),
        })
}

fn parse_slots_node(frame: &Frame, fallback_host: &str) -> Result<(NodeAddr, Option<NodeId>)> {
    let parts = frame
        .as_array()
        .filter(|parts| parts.len() >= 2)
        .ok_or_else(|| Error::Protocol {
            message: "CLUSTER SLOTS node must be an array of at least 2 items".to_string(),
        })?;

    let host = match &parts[0] {
        Frame::BulkString(Some(data)) => String::from_utf8_lossy(data).into_owned(),
        Frame::SimpleString(data) => String::from_utf8_lossy(data).into_owned(),
        _ => {
            return Err(Error::Protocol {
                message: "node host must be a string".to_string(),
            })
        }
    };
    let port = match &parts[1] {
        Frame::Integer(n) => u16::try_from(*n).map_err(|_| Error::Protocol {
            message: format!("node port out of range: {n}"),
        })?,
        _ => {
            return Err(Error::Protocol {
                message: "node port must be an integer".to_string(),
            })
        }
    };
    let id = match parts.get(2) {
        Some(Frame::BulkString(Some(data))) => {
            Some(NodeId::new(String::from_utf8_lossy(data).into_owned()))
        }
        _ => None,
    };

    Ok((NodeAddr::new(host, port).or_host(fallback_host), id))
}
