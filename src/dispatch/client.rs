use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::connection::{AsyncConnection, ConnState};
use super::{ConnectionId, EventLoop};
use crate::cluster::commands::{asking, cluster_nodes, cluster_slots};
use crate::cluster::registry::{NodeIter, NodeRegistry};
use crate::cluster::router::{next_step, route_for, RedirectStep, Route};
use crate::cluster::slot::SlotMap;
use crate::cluster::topology::{ClusterTopology, NodeAddr};
use crate::cluster::{auth_command, parse_topology, ClusterClient, RedirectKind};
use crate::core::builder::{ClusterConfig, RedirectPolicy, RouteStrategy};
use crate::core::command::Cmd;
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// Continuation invoked exactly once with the final reply of a command.
pub type ReplyCallback<E> = Box<dyn FnOnce(&mut AsyncClusterClient<E>, Result<Frame>)>;

/// Connect or disconnect notification for one node.
pub type StatusCallback = Box<dyn FnMut(&NodeAddr, Result<()>)>;

/// What a queued reply is for.
enum Pending<E: EventLoop> {
    Command {
        frame: Frame,
        redirects: u32,
        routed: bool,
        callback: ReplyCallback<E>,
    },
    Asking,
    Auth,
    Discovery,
}

type Conn<E> = AsyncConnection<<E as EventLoop>::Io, Pending<E>>;

/// Cluster client driven by an external event loop.
///
/// Commands are submitted with a callback and return immediately. The
/// event loop reports connect results and socket readiness through the
/// `handle_*` methods, which flush requests, decode replies, follow MOVED
/// and ASK redirections and finally invoke the callbacks.
///
/// # Example
///
/// ```no_run
/// use clustermux::core::command;
/// use clustermux::{ClusterBuilder, TokioEventLoop};
///
/// # async fn demo() -> clustermux::Result<()> {
/// let mut client = ClusterBuilder::new()
///     .seeds("127.0.0.1:7000")
///     .connect_async(TokioEventLoop::new())?;
///
/// client.command(&command::set("greeting", "hello"), |client, reply| {
///     println!("SET -> {reply:?}");
///     client.disconnect();
/// })?;
/// clustermux::adapters::tokio::run(&mut client).await;
/// # Ok(())
/// # }
/// ```
pub struct AsyncClusterClient<E: EventLoop> {
    config: ClusterConfig,
    event_loop: E,
    slots: Arc<SlotMap>,
    stale: bool,
    refreshing: bool,
    disconnecting: bool,
    registry: NodeRegistry<Conn<E>>,
    ids: HashMap<ConnectionId, NodeAddr>,
    next_id: u64,
    on_connect: Option<StatusCallback>,
    on_disconnect: Option<StatusCallback>,
}

impl<E: EventLoop> AsyncClusterClient<E> {
    /// Discovers the topology from the configured seeds and returns a client
    /// bound to `event_loop`.
    ///
    /// Discovery uses a short-lived blocking connection; everything after it
    /// goes through the event loop.
    pub fn connect(config: ClusterConfig, event_loop: E) -> Result<Self> {
        let discovery = ClusterClient::with_config(config.clone())?;
        let topology = discovery.topology().clone();
        discovery.close();
        Ok(Self::from_topology(config, event_loop, &topology))
    }

    /// Creates a client from an already known topology.
    pub fn from_topology(config: ClusterConfig, event_loop: E, topology: &ClusterTopology) -> Self {
        let mut registry = NodeRegistry::new();
        registry.apply_topology(topology);
        info!(
            nodes = registry.len(),
            ranges = topology.ranges.len(),
            "event-loop cluster client ready"
        );
        Self {
            config,
            event_loop,
            slots: Arc::new(topology.to_slot_map(1)),
            stale: false,
            refreshing: false,
            disconnecting: false,
            registry,
            ids: HashMap::new(),
            next_id: 1,
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Sets the callback told about every connect attempt's outcome.
    pub fn set_connect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&NodeAddr, Result<()>) + 'static,
    {
        self.on_connect = Some(Box::new(callback));
    }

    /// Sets the callback told about every closed connection.
    ///
    /// `Ok(())` for a close requested through [`disconnect`](Self::disconnect),
    /// the failure otherwise.
    pub fn set_disconnect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&NodeAddr, Result<()>) + 'static,
    {
        self.on_disconnect = Some(Box::new(callback));
    }

    /// Routes `cmd` by key and queues it.
    ///
    /// `callback` runs exactly once, from a later `handle_*` call, with the
    /// final reply after redirections. Error replies other than
    /// redirections are delivered as `Ok(Frame::Error)`.
    ///
    /// # Errors
    ///
    /// If the command cannot be submitted the error is returned here and
    /// `callback` is dropped without being called: the client is
    /// disconnecting, the keys span slots, or no node owns the slot (which
    /// also schedules a topology refresh).
    #[instrument(skip(self, cmd, callback), fields(command = %cmd.name()))]
    pub fn command<F>(&mut self, cmd: &Cmd, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Frame>) + 'static,
    {
        self.check_open()?;
        let route = route_for(cmd)?;
        if self.stale {
            self.schedule_refresh();
        }
        let node = match route {
            Route::Slot(slot) => match self.slots.node_for_slot(slot) {
                Some(node) => node.clone(),
                None => {
                    debug!(slot, "slot has no known owner");
                    self.stale = true;
                    self.schedule_refresh();
                    return Err(Error::UnknownSlot { slot });
                }
            },
            Route::Any => self
                .registry
                .any_primary()
                .ok_or_else(|| Error::ClusterUnavailable {
                    message: "no reachable primary".to_string(),
                })?,
        };

        let frame = cmd.to_frame();
        let pending = Pending::Command {
            frame: frame.clone(),
            redirects: 0,
            routed: matches!(route, Route::Slot(_)),
            callback: Box::new(callback),
        };
        self.enqueue(&node, &frame, pending).map_err(|(e, _)| e)
    }

    /// Queues `cmd` on an explicit node. Redirections are not followed.
    pub fn command_to_node<F>(&mut self, node: &NodeAddr, cmd: &Cmd, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Frame>) + 'static,
    {
        self.check_open()?;
        if cmd.args().is_empty() {
            return Err(Error::InvalidArgument {
                message: "empty command".to_string(),
            });
        }
        let frame = cmd.to_frame();
        let pending = Pending::Command {
            frame: frame.clone(),
            redirects: 0,
            routed: false,
            callback: Box::new(callback),
        };
        self.enqueue(node, &frame, pending).map_err(|(e, _)| e)
    }

    /// Stops accepting commands and closes every connection once its
    /// queued replies have arrived.
    ///
    /// Idle connections close immediately. Safe to call from a callback.
    pub fn disconnect(&mut self) {
        if self.disconnecting {
            return;
        }
        self.disconnecting = true;
        info!(connections = self.ids.len(), "disconnecting");

        let mut ids: Vec<ConnectionId> = self.ids.keys().copied().collect();
        ids.sort();
        for id in ids {
            let Some(conn) = self.conn_mut(id) else {
                continue;
            };
            if conn.state() == ConnState::Connected {
                conn.set_state(ConnState::Disconnecting);
            }
            if conn.pending_len() == 0 && !conn.wants_write() {
                self.close(id);
            }
        }
    }

    /// Reports the outcome of a connect started by [`EventLoop::connect`].
    pub fn handle_connect(&mut self, id: ConnectionId, result: io::Result<E::Io>) {
        let Some(node) = self.ids.get(&id).cloned() else {
            debug!(%id, "connect result for unknown connection");
            return;
        };
        match result {
            Ok(io) => {
                let disconnecting = self.disconnecting;
                let Some(conn) = self.conn_mut(id) else {
                    return;
                };
                conn.connected(io);
                if disconnecting {
                    conn.set_state(ConnState::Disconnecting);
                }
                let want_write = conn.wants_write();
                if let Some(entry) = self.registry.get_mut(&node) {
                    entry.unreachable = false;
                }
                self.event_loop.attach(id, true, want_write);
                info!(node = %node, %id, "connected");
                if let Some(callback) = self.on_connect.as_mut() {
                    callback(&node, Ok(()));
                }
                self.finish_if_drained(id);
            }
            Err(e) => {
                warn!(node = %node, %id, error = %e, "connect failed");
                self.connection_lost(id, Error::Io { source: e });
            }
        }
    }

    /// Reads what the socket has and delivers every complete reply.
    pub fn handle_readable(&mut self, id: ConnectionId) {
        let Some(conn) = self.conn_mut(id) else {
            return;
        };
        if !conn.is_open() {
            return;
        }
        let node = conn.addr().clone();
        let failure = match conn.read_some() {
            Ok(false) => None,
            Ok(true) => Some(Error::Connection {
                message: "connection closed by server".to_string(),
            }),
            Err(e) => Some(Error::Io { source: e }),
        };

        // Callbacks may close this connection; look it up again each time.
        loop {
            let Some(conn) = self.conn_mut(id) else {
                return;
            };
            match conn.next_reply() {
                Ok(Some((pending, reply))) => self.deliver(id, &node, pending, reply),
                Ok(None) => break,
                Err(e) => {
                    self.connection_lost(id, e);
                    return;
                }
            }
        }

        match failure {
            Some(reason) => self.connection_lost(id, reason),
            None => self.finish_if_drained(id),
        }
    }

    /// Flushes buffered commands.
    pub fn handle_writable(&mut self, id: ConnectionId) {
        let Some(conn) = self.conn_mut(id) else {
            return;
        };
        if !conn.is_open() {
            return;
        }
        match conn.write_some() {
            Ok(()) => {
                let want_write = conn.wants_write();
                self.event_loop.attach(id, true, want_write);
                self.finish_if_drained(id);
            }
            Err(e) => self.connection_lost(id, Error::Io { source: e }),
        }
    }

    /// When the oldest outstanding command will exceed `command_timeout`.
    ///
    /// `None` without a configured timeout or with nothing outstanding.
    pub fn next_deadline(&self) -> Option<Instant> {
        let limit = self.config.command_timeout?;
        self.ids
            .values()
            .filter_map(|node| self.registry.get(node))
            .filter_map(|entry| entry.conn.as_ref())
            .filter_map(|conn| conn.oldest_pending_since())
            .min()
            .map(|queued| queued + limit)
    }

    /// Drops every connection whose oldest outstanding command has waited
    /// at least `command_timeout` by `now`.
    ///
    /// A late reply would desynchronize the stream, so each command on such
    /// a connection fails and the disconnect callback reports the timeout.
    pub fn handle_timeouts(&mut self, now: Instant) {
        let Some(limit) = self.config.command_timeout else {
            return;
        };
        let mut expired: Vec<ConnectionId> = self
            .ids
            .iter()
            .filter(|(id, node)| {
                self.registry
                    .get(node)
                    .and_then(|entry| entry.conn.as_ref())
                    .filter(|conn| conn.id() == **id)
                    .and_then(|conn| conn.oldest_pending_since())
                    .is_some_and(|queued| now.saturating_duration_since(queued) >= limit)
            })
            .map(|(id, _)| *id)
            .collect();
        expired.sort();
        for id in expired {
            warn!(%id, timeout = ?limit, "command timed out");
            self.connection_lost(id, timed_out(limit));
        }
    }

    /// Iterates over the known primaries, snapshotted now.
    pub fn nodes(&self) -> NodeIter {
        self.registry.iter_primaries()
    }

    /// Current slot map snapshot.
    pub fn slot_map(&self) -> Arc<SlotMap> {
        Arc::clone(&self.slots)
    }

    /// State of the connection to `node`.
    pub fn connection_state(&self, node: &NodeAddr) -> ConnState {
        self.registry
            .get(node)
            .and_then(|entry| entry.conn.as_ref())
            .map_or(ConnState::Disconnected, |conn| conn.state())
    }

    /// Replies still owed across every connection.
    pub fn pending_replies(&self) -> usize {
        self.ids
            .values()
            .filter_map(|node| self.registry.get(node))
            .filter_map(|entry| entry.conn.as_ref())
            .map(|conn| conn.pending_len())
            .sum()
    }

    /// Returns true once [`disconnect`](Self::disconnect) was called.
    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    /// Active configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The event loop.
    pub fn event_loop(&self) -> &E {
        &self.event_loop
    }

    /// The event loop, mutably.
    pub fn event_loop_mut(&mut self) -> &mut E {
        &mut self.event_loop
    }

    fn check_open(&self) -> Result<()> {
        if self.disconnecting {
            return Err(Error::Connection {
                message: "client is disconnecting".to_string(),
            });
        }
        Ok(())
    }

    fn conn_mut(&mut self, id: ConnectionId) -> Option<&mut Conn<E>> {
        let node = self.ids.get(&id)?;
        self.registry
            .connection_mut(node)
            .filter(|conn| conn.id() == id)
    }

    /// Returns the connection to `node`, starting one if needed.
    fn open(&mut self, node: &NodeAddr) -> Result<ConnectionId> {
        if let Some(conn) = self.registry.connection_mut(node) {
            return Ok(conn.id());
        }
        self.check_open()?;

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        if let Err(e) = self
            .event_loop
            .connect(id, node, self.config.connect_timeout)
        {
            warn!(node = %node, error = %e, "cannot start connect");
            self.registry.ensure(node).unreachable = true;
            self.stale = true;
            return Err(Error::Connection {
                message: format!("connect to {node} failed: {e}"),
            });
        }
        debug!(node = %node, %id, "connecting");

        let mut conn = AsyncConnection::new(id, node.clone());
        if let Some(auth) = auth_command(&self.config) {
            conn.push(Pending::Auth, &auth.into_frame());
        }
        self.registry.ensure(node).conn = Some(conn);
        self.ids.insert(id, node.clone());
        Ok(id)
    }

    /// Queues `frame` on `node`; hands `pending` back if that is impossible.
    fn enqueue(
        &mut self,
        node: &NodeAddr,
        frame: &Frame,
        pending: Pending<E>,
    ) -> std::result::Result<(), (Error, Pending<E>)> {
        let id = match self.open(node) {
            Ok(id) => id,
            Err(e) => return Err((e, pending)),
        };
        let Some(conn) = self.conn_mut(id) else {
            let error = Error::Connection {
                message: format!("no connection to {node}"),
            };
            return Err((error, pending));
        };
        conn.push(pending, frame);
        let (state, want_write) = (conn.state(), conn.wants_write());
        if matches!(state, ConnState::Connected | ConnState::Disconnecting) {
            self.event_loop.attach(id, true, want_write);
        }
        Ok(())
    }

    fn deliver(&mut self, id: ConnectionId, node: &NodeAddr, pending: Pending<E>, reply: Frame) {
        match pending {
            Pending::Asking => {}
            Pending::Auth => {
                if let Some(message) = reply.error_message() {
                    warn!(node = %node, "authentication rejected");
                    self.connection_lost(id, Error::Auth { message });
                }
            }
            Pending::Discovery => self.finish_refresh(node, &reply),
            Pending::Command {
                routed: false,
                callback,
                ..
            } => callback(self, Ok(reply)),
            Pending::Command {
                frame,
                redirects,
                callback,
                ..
            } => match next_step(&reply, redirects, self.config.max_redirects) {
                RedirectStep::Done => callback(self, Ok(reply)),
                RedirectStep::GiveUp(e) => callback(self, Err(e)),
                RedirectStep::Follow(redirect) => {
                    let target = redirect.addr.clone().or_host(&node.host);
                    debug!(
                        kind = ?redirect.kind,
                        slot = redirect.slot,
                        from = %node,
                        to = %target,
                        redirects = redirects + 1,
                        "following redirect"
                    );
                    if redirect.kind == RedirectKind::Moved {
                        self.apply_moved(redirect.slot, &target);
                    }
                    self.resend(redirect.kind, &target, frame, redirects + 1, callback);
                }
            },
        }
    }

    fn resend(
        &mut self,
        kind: RedirectKind,
        target: &NodeAddr,
        frame: Frame,
        redirects: u32,
        callback: ReplyCallback<E>,
    ) {
        if kind == RedirectKind::Ask {
            if let Err((e, _)) = self.enqueue(target, &asking().into_frame(), Pending::Asking) {
                callback(self, Err(e));
                return;
            }
        }
        let wire = frame.clone();
        let pending = Pending::Command {
            frame,
            redirects,
            routed: true,
            callback,
        };
        if let Err((e, Pending::Command { callback, .. })) = self.enqueue(target, &wire, pending) {
            callback(self, Err(e));
        }
    }

    fn apply_moved(&mut self, slot: u16, target: &NodeAddr) {
        self.registry.ensure_primary(target);
        Arc::make_mut(&mut self.slots).assign(slot, target);
        if self.config.redirect_policy == RedirectPolicy::Refresh {
            self.stale = true;
            self.schedule_refresh();
        }
    }

    /// Sends the discovery command through the event loop; the slot map is
    /// swapped when the reply arrives.
    #[instrument(skip(self))]
    fn schedule_refresh(&mut self) {
        if self.refreshing || self.disconnecting {
            return;
        }
        let Some(node) = self
            .registry
            .any_primary()
            .or_else(|| self.config.seeds.first().cloned())
        else {
            warn!("no node available for topology refresh");
            return;
        };
        let cmd = match self.config.route_strategy {
            RouteStrategy::Slots => cluster_slots(),
            RouteStrategy::Nodes => cluster_nodes(),
        };
        match self.enqueue(&node, &cmd.into_frame(), Pending::Discovery) {
            Ok(()) => {
                self.refreshing = true;
                debug!(node = %node, "topology refresh sent");
            }
            Err((e, _)) => warn!(node = %node, error = %e, "cannot send topology refresh"),
        }
    }

    fn finish_refresh(&mut self, node: &NodeAddr, reply: &Frame) {
        self.refreshing = false;
        let topology = match parse_topology(self.config.route_strategy, reply, &node.host) {
            Ok(topology) => topology,
            Err(e) => {
                warn!(node = %node, error = %e, "topology refresh failed");
                return;
            }
        };

        let version = self.slots.version() + 1;
        self.slots = Arc::new(topology.to_slot_map(version));
        self.stale = false;
        info!(
            version,
            ranges = topology.ranges.len(),
            covered = self.slots.is_fully_covered(),
            "slot map refreshed"
        );

        for entry in self.registry.apply_topology(&topology) {
            let Some(mut conn) = entry.conn else {
                continue;
            };
            let id = conn.id();
            self.ids.remove(&id);
            self.event_loop.detach(id);
            let pending = conn.close();
            self.fail_pending(pending, &|| Error::Connection {
                message: format!("{}: node left the cluster", entry.addr),
            });
            if let Some(callback) = self.on_disconnect.as_mut() {
                callback(&entry.addr, Ok(()));
            }
        }
    }

    fn finish_if_drained(&mut self, id: ConnectionId) {
        let Some(conn) = self.conn_mut(id) else {
            return;
        };
        if conn.state() == ConnState::Disconnecting
            && conn.pending_len() == 0
            && !conn.wants_write()
        {
            self.close(id);
        }
    }

    /// Graceful close.
    fn close(&mut self, id: ConnectionId) {
        let Some(node) = self.ids.remove(&id) else {
            return;
        };
        let Some(mut conn) = self.registry.get_mut(&node).and_then(|e| e.conn.take()) else {
            return;
        };
        self.event_loop.detach(id);
        let pending = conn.close();
        info!(node = %node, %id, "connection closed");
        self.fail_pending(pending, &|| Error::Connection {
            message: format!("{node}: connection closed"),
        });
        if let Some(callback) = self.on_disconnect.as_mut() {
            callback(&node, Ok(()));
        }
    }

    /// Drops a failed connection and fails everything it owed.
    ///
    /// Runs at most once per connection: the id is forgotten first, so a
    /// second failure report for it is ignored.
    fn connection_lost(&mut self, id: ConnectionId, reason: Error) {
        let Some(node) = self.ids.remove(&id) else {
            return;
        };
        let Some(mut conn) = self.registry.mark_unreachable(&node) else {
            return;
        };
        self.event_loop.detach(id);
        if !self.disconnecting {
            self.stale = true;
        }

        let connecting = conn.state() == ConnState::Connecting;
        let pending = conn.close();
        warn!(
            node = %node,
            %id,
            pending = pending.len(),
            error = %reason,
            "connection lost"
        );
        self.fail_pending(pending, &|| Error::for_pending(&node, &reason));

        let status = if connecting {
            self.on_connect.as_mut()
        } else {
            self.on_disconnect.as_mut()
        };
        if let Some(callback) = status {
            callback(&node, Err(reason));
        }
    }

    /// Fails every owed command once, each with its own `error()`.
    fn fail_pending(&mut self, pending: Vec<Pending<E>>, error: &dyn Fn() -> Error) {
        for entry in pending {
            match entry {
                Pending::Command { callback, .. } => callback(self, Err(error())),
                Pending::Discovery => self.refreshing = false,
                Pending::Asking | Pending::Auth => {}
            }
        }
    }
}

fn timed_out(limit: Duration) -> Error {
    Error::Io {
        source: io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no reply within {limit:?}"),
        ),
    }
}

impl<E: EventLoop> Drop for AsyncClusterClient<E> {
    fn drop(&mut self) {
        self.disconnecting = true;
        let ids: Vec<ConnectionId> = self.ids.keys().copied().collect();
        for id in ids {
            let Some(node) = self.ids.remove(&id) else {
                continue;
            };
            let Some(mut conn) = self.registry.get_mut(&node).and_then(|e| e.conn.take()) else {
                continue;
            };
            self.event_loop.detach(id);
            let pending = conn.close();
            self.fail_pending(pending, &|| Error::Connection {
                message: format!("{node}: client dropped"),
            });
        }
    }
}

impl<E: EventLoop> fmt::Debug for AsyncClusterClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncClusterClient")
            .field("slot_map_version", &self.slots.version())
            .field("nodes", &self.registry.len())
            .field("connections", &self.ids.len())
            .field("stale", &self.stale)
            .field("disconnecting", &self.disconnecting)
            .finish()
    }
}
