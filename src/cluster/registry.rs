//! Known cluster nodes and their connections.
//!
//! The registry is generic over the connection type so the blocking and
//! event-loop clients share it. Connections are created lazily by the
//! clients; the registry only tracks them.

use std::collections::HashMap;
use std::iter::FusedIterator;
use std::vec;

use tracing::{debug, warn};

use crate::cluster::topology::{ClusterTopology, NodeAddr, NodeId, NodeRole};

/// Connections report how many replies they still owe.
///
/// A node is only forgotten once its connection owes nothing.
pub trait PendingReplies {
    /// Number of commands sent whose replies have not been consumed.
    fn pending_replies(&self) -> usize;
}

/// One known node.
#[derive(Debug)]
pub struct NodeEntry<C> {
    /// Node address.
    pub addr: NodeAddr,
    /// Role from the last topology reply.
    pub role: NodeRole,
    /// Server-assigned id, if known.
    pub id: Option<NodeId>,
    /// Replicas following this node, if it is a primary.
    pub replicas: Vec<NodeAddr>,
    /// Live connection, created on first use.
    pub conn: Option<C>,
    /// Set when I/O to the node failed; cleared on the next successful
    /// connection.
    pub unreachable: bool,
}

impl<C> NodeEntry<C> {
    fn new(addr: NodeAddr, role: NodeRole) -> Self {
        Self {
            addr,
            role,
            id: None,
            replicas: Vec::new(),
            conn: None,
            unreachable: false,
        }
    }
}

/// Node identity to node entry.
#[derive(Debug)]
pub struct NodeRegistry<C> {
    nodes: HashMap<NodeAddr, NodeEntry<C>>,
}

impl<C: PendingReplies> NodeRegistry<C> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Returns the entry for `addr`, registering it as
    /// [`NodeRole::Unassigned`] if new.
    ///
    /// Connections to any address live here, but only topology replies and
    /// MOVED targets make a node a primary.
    pub fn ensure(&mut self, addr: &NodeAddr) -> &mut NodeEntry<C> {
        self.nodes
            .entry(addr.clone())
            .or_insert_with(|| NodeEntry::new(addr.clone(), NodeRole::Unassigned))
    }

    /// Returns the entry for `addr`, registering or promoting it as a
    /// primary. Replicas keep their role.
    pub fn ensure_primary(&mut self, addr: &NodeAddr) -> &mut NodeEntry<C> {
        let entry = self.ensure(addr);
        if entry.role == NodeRole::Unassigned {
            debug!(node = %addr, "node promoted to primary");
            entry.role = NodeRole::Primary;
        }
        entry
    }

    /// Looks up a node.
    pub fn get(&self, addr: &NodeAddr) -> Option<&NodeEntry<C>> {
        self.nodes.get(addr)
    }

    /// Looks up a node mutably.
    pub fn get_mut(&mut self, addr: &NodeAddr) -> Option<&mut NodeEntry<C>> {
        self.nodes.get_mut(addr)
    }

    /// Returns the live connection to `addr`, if any.
    pub fn connection_mut(&mut self, addr: &NodeAddr) -> Option<&mut C> {
        self.nodes.get_mut(addr).and_then(|entry| entry.conn.as_mut())
    }

    /// Number of known nodes, replicas included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Snapshot of every known primary, reachable ones first.
    pub fn primaries(&self) -> Vec<NodeAddr> {
        let mut out: Vec<&NodeEntry<C>> = self
            .nodes
            .values()
            .filter(|entry| entry.role == NodeRole::Primary)
            .collect();
        out.sort_by(|a, b| a.unreachable.cmp(&b.unreachable).then(a.addr.cmp(&b.addr)));
        out.into_iter().map(|entry| entry.addr.clone()).collect()
    }

    /// Lazy iterator over the distinct known primaries.
    ///
    /// The node list is copied when the iterator is created, so a refresh
    /// during iteration does not affect it.
    pub fn iter_primaries(&self) -> NodeIter {
        NodeIter {
            inner: self.primaries().into_iter(),
        }
    }

    /// Picks a primary for a node-agnostic command.
    ///
    /// Prefers a reachable node with a live connection, then any reachable
    /// node.
    pub fn any_primary(&self) -> Option<NodeAddr> {
        let reachable = || {
            self.nodes
                .values()
                .filter(|e| e.role == NodeRole::Primary && !e.unreachable)
        };
        reachable()
            .filter(|e| e.conn.is_some())
            .min_by(|a, b| a.addr.cmp(&b.addr))
            .or_else(|| reachable().min_by(|a, b| a.addr.cmp(&b.addr)))
            .map(|e| e.addr.clone())
    }

    /// Records a fresh topology.
    ///
    /// New nodes are registered, roles updated, and nodes missing from the
    /// topology are removed unless their connection still owes replies.
    /// Returns the removed entries so their idle connections can be closed.
    pub fn apply_topology(&mut self, topology: &ClusterTopology) -> Vec<NodeEntry<C>> {
        for info in &topology.nodes {
            let entry = self
                .nodes
                .entry(info.addr.clone())
                .or_insert_with(|| NodeEntry::new(info.addr.clone(), info.role));
            entry.role = info.role;
            if info.id.is_some() {
                entry.id = info.id.clone();
            }
        }
        for range in &topology.ranges {
            if let Some(entry) = self.nodes.get_mut(&range.primary) {
                entry.role = NodeRole::Primary;
                entry.replicas = range.replicas.clone();
            }
        }

        let stale: Vec<NodeAddr> = self
            .nodes
            .iter()
            .filter(|(addr, entry)| {
                let listed = topology.nodes.iter().any(|n| n.addr == **addr);
                let busy = entry
                    .conn
                    .as_ref()
                    .is_some_and(|c| c.pending_replies() > 0);
                !listed && !busy
            })
            .map(|(addr, _)| addr.clone())
            .collect();

        stale
            .iter()
            .filter_map(|addr| {
                debug!(node = %addr, "forgetting node absent from topology");
                self.nodes.remove(addr)
            })
            .collect()
    }

    /// Addresses of nodes that currently hold a connection.
    pub fn connected_nodes(&self) -> Vec<NodeAddr> {
        let mut out: Vec<NodeAddr> = self
            .nodes
            .values()
            .filter(|entry| entry.conn.is_some())
            .map(|entry| entry.addr.clone())
            .collect();
        out.sort();
        out
    }

    /// Marks a node unreachable and drops its connection.
    ///
    /// Returns the dropped connection so the caller can fail what it owed.
    pub fn mark_unreachable(&mut self, addr: &NodeAddr) -> Option<C> {
        let entry = self.nodes.get_mut(addr)?;
        warn!(node = %addr, "node marked unreachable");
        entry.unreachable = true;
        entry.conn.take()
    }

    /// Removes every connection, leaving the node list intact.
    pub fn take_connections(&mut self) -> Vec<(NodeAddr, C)> {
        self.nodes
            .values_mut()
            .filter_map(|entry| entry.conn.take().map(|c| (entry.addr.clone(), c)))
            .collect()
    }
}

impl<C: PendingReplies> Default for NodeRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over node addresses, snapshotted at creation.
///
/// Finite and not restartable: once exhausted it keeps returning `None`.
#[derive(Debug)]
pub struct NodeIter {
    inner: vec::IntoIter<NodeAddr>,
}

impl Iterator for NodeIter {
    type Item = NodeAddr;

    fn next(&mut self) -> Option<NodeAddr> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for NodeIter {}

impl FusedIterator for NodeIter {}
