//! Blocking Redis Cluster client.
//!
//! [`ClusterClient`] owns the slot map, the node registry and one blocking
//! connection per node. Commands are routed by slot, relocation signals
//! are followed transparently, and commands can be pipelined with
//! [`append_command`](ClusterClient::append_command) /
//! [`get_reply`](ClusterClient::get_reply).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::commands::{asking, cluster_nodes, cluster_slots};
use super::errors::{Redirect, RedirectKind};
use super::registry::{NodeIter, NodeRegistry};
use super::router::{next_step, route_for, RedirectStep, Route};
use super::slot::{key_slot, SlotMap};
use super::topology::{ClusterTopology, NodeAddr};
use super::transaction::{self, Transaction};
use crate::core::builder::{ClusterBuilder, ClusterConfig, RedirectPolicy, RouteStrategy};
use crate::core::command::{self, Cmd};
use crate::core::connection::Connection;
use crate::core::transport::{Connector, TcpConnector};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// Identifies one sent command on its connection.
type Ticket = u64;

/// A pipelined command waiting for [`ClusterClient::get_reply`].
#[derive(Debug)]
struct Request {
    ticket: Ticket,
    node: NodeAddr,
    /// Key-routed commands keep their frame so a redirect can resend it.
    resend: Option<Frame>,
}

/// Blocking Redis Cluster client.
///
/// # Example
///
/// ```no_run
/// use clustermux::ClusterClient;
/// use clustermux::core::command;
///
/// # fn main() -> clustermux::Result<()> {
/// let mut client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001")?;
/// client.set("foo", "bar")?;
///
/// // Pipelining: replies come back in append order.
/// client.append_command(&command::get("foo"))?;
/// client.append_command(&command::incr("counter"))?;
/// while let Some(reply) = client.get_reply()? {
///     println!("{reply:?}");
/// }
///
/// // Fan-out: one DBSIZE per primary.
/// for node in client.nodes() {
///     let size = client.dbsize(&node)?;
///     println!("{node}: {size}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct ClusterClient {
    config: ClusterConfig,
    connector: Box<dyn Connector>,
    slots: Arc<SlotMap>,
    topology: ClusterTopology,
    stale: bool,
    registry: NodeRegistry<Connection<Ticket>>,
    requests: VecDeque<Request>,
    stash: HashMap<Ticket, Result<Frame>>,
    next_ticket: Ticket,
}

impl ClusterClient {
    /// Connects using a comma-separated seed list and default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an unparsable seed list and
    /// [`Error::ClusterUnavailable`] if no seed answers the topology query.
    pub fn connect(seeds: &str) -> Result<Self> {
        ClusterBuilder::new().seeds(seeds).connect()
    }

    /// Connects over TCP with the given configuration.
    pub fn with_config(config: ClusterConfig) -> Result<Self> {
        Self::with_connector(config, TcpConnector)
    }

    /// Connects with a custom [`Connector`] and discovers the topology.
    pub fn with_connector(
        config: ClusterConfig,
        connector: impl Connector + 'static,
    ) -> Result<Self> {
        if config.seeds.is_empty() {
            return Err(Error::InvalidArgument {
                message: "at least one seed node is required".to_string(),
            });
        }
        let mut client = Self {
            config,
            connector: Box::new(connector),
            slots: Arc::new(SlotMap::empty()),
            topology: ClusterTopology::new(),
            stale: false,
            registry: NodeRegistry::new(),
            requests: VecDeque::new(),
            stash: HashMap::new(),
            next_ticket: 1,
        };
        client.refresh()?;
        Ok(client)
    }

    /// Rediscovers the topology and replaces the slot map.
    ///
    /// Known primaries are asked first (reachable ones first), then the
    /// seeds; the first valid answer wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClusterUnavailable`] carrying the last failure if
    /// no candidate answers.
    #[instrument(skip(self))]
    pub fn refresh(&mut self) -> Result<()> {
        let mut candidates = self.registry.primaries();
        for seed in &self.config.seeds {
            if !candidates.contains(seed) {
                candidates.push(seed.clone());
            }
        }

        let mut last_err = None;
        for addr in candidates {
            match self.fetch_topology(&addr) {
                Ok(topology) => {
                    self.install(topology);
                    info!(
                        node = %addr,
                        version = self.slots.version(),
                        nodes = self.registry.len(),
                        "cluster topology refreshed"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(node = %addr, error = %e, "topology query failed");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::ClusterUnavailable {
            message: last_err.map_or_else(|| "no candidate nodes".to_string(), |e| e.to_string()),
        })
    }

    /// Returns the node currently serving `key`.
    pub fn key_to_node<K: AsRef<[u8]> + ?Sized>(&mut self, key: &K) -> Result<NodeAddr> {
        self.refresh_if_stale()?;
        self.node_for_slot(key_slot(key))
    }

    /// Iterates over the distinct known primaries.
    ///
    /// The list is snapshotted now; later refreshes do not change it.
    pub fn nodes(&self) -> NodeIter {
        self.registry.iter_primaries()
    }

    /// Number of known nodes, replicas included.
    pub fn node_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of the current slot map.
    pub fn slot_map(&self) -> Arc<SlotMap> {
        Arc::clone(&self.slots)
    }

    /// The topology returned by the last successful refresh.
    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Sends a key-routed command and waits for its final reply.
    ///
    /// MOVED and ASK replies are followed up to `max_redirects` times.
    /// Other error replies are returned as [`Frame::Error`].
    ///
    /// # Errors
    ///
    /// - [`Error::CrossSlot`] before any I/O if keys span several slots
    /// - [`Error::TooManyRedirections`] when the redirect bound is exceeded
    /// - [`Error::Connection`] if the node's connection fails
    #[instrument(skip(self, cmd), fields(command = %cmd.name()))]
    pub fn command(&mut self, cmd: &Cmd) -> Result<Frame> {
        let route = route_for(cmd)?;
        self.refresh_if_stale()?;
        let frame = cmd.to_frame();
        match route {
            Route::Any => {
                let node = self.any_node()?;
                let ticket = self.send(&node, &frame)?;
                self.wait(ticket, &node)
            }
            Route::Slot(slot) => {
                let node = self.node_for_slot(slot)?;
                debug!(slot, node = %node, "routing command");
                let ticket = self.send(&node, &frame)?;
                let reply = self.wait(ticket, &node)?;
                self.follow_redirects(frame, node, reply)
            }
        }
    }

    /// Sends a command to an explicit node and waits for its reply.
    ///
    /// No slot is computed and redirects are returned as error frames.
    pub fn command_to_node(&mut self, node: &NodeAddr, cmd: &Cmd) -> Result<Frame> {
        let ticket = self.send(node, &cmd.to_frame())?;
        self.wait(ticket, node)
    }

    /// Queues a key-routed command without waiting for its reply.
    ///
    /// The command is buffered until [`get_reply`](Self::get_reply).
    pub fn append_command(&mut self, cmd: &Cmd) -> Result<()> {
        let route = route_for(cmd)?;
        self.refresh_if_stale()?;
        let frame = cmd.to_frame();
        let (node, resend) = match route {
            Route::Any => (self.any_node()?, None),
            Route::Slot(slot) => (self.node_for_slot(slot)?, Some(frame.clone())),
        };
        let ticket = self.send(&node, &frame)?;
        self.requests.push_back(Request {
            ticket,
            node,
            resend,
        });
        Ok(())
    }

    /// Queues a command for an explicit node without waiting.
    pub fn append_command_to_node(&mut self, node: &NodeAddr, cmd: &Cmd) -> Result<()> {
        let ticket = self.send(node, &cmd.to_frame())?;
        self.requests.push_back(Request {
            ticket,
            node: node.clone(),
            resend: None,
        });
        Ok(())
    }

    /// Returns the reply to the oldest appended command.
    ///
    /// All buffered output is flushed first. Returns `Ok(None)` when every
    /// appended command has been answered.
    ///
    /// # Errors
    ///
    /// A failed connection yields one [`Error::Connection`] for each
    /// command appended to it, in turn.
    pub fn get_reply(&mut self) -> Result<Option<Frame>> {
        self.flush_pending_nodes();
        let Some(request) = self.requests.pop_front() else {
            return Ok(None);
        };
        let reply = self.wait(request.ticket, &request.node)?;
        match request.resend {
            Some(frame) => self.follow_redirects(frame, request.node, reply).map(Some),
            None => Ok(Some(reply)),
        }
    }

    /// Number of appended commands whose reply has not been taken.
    pub fn pending_replies(&self) -> usize {
        self.requests.len()
    }

    /// Runs a transaction and returns one result per command.
    ///
    /// # Errors
    ///
    /// [`Error::TransactionAborted`] if the commands cannot be pinned to one
    /// node, a command fails to queue, or EXEC reports an abort.
    pub fn transaction(&mut self, tx: &Transaction) -> Result<Vec<Frame>> {
        let node = self.transaction_node(tx)?;
        let mut tickets = vec![self.send(&node, &command::multi().into_frame())?];
        for cmd in tx.commands() {
            tickets.push(self.send(&node, &cmd.to_frame())?);
        }
        tickets.push(self.send(&node, &command::exec().into_frame())?);

        let mut replies = self.wait_all(&tickets, &node)?;
        let exec = replies.pop().unwrap_or(Frame::Null);
        let queued = replies.split_off(1.min(replies.len()));
        let multi = replies.pop().unwrap_or(Frame::Null);
        self.note_moved(&queued)?;
        transaction::collect(multi, queued, exec)
    }

    /// Queues a transaction; its replies come from [`get_reply`](Self::get_reply).
    ///
    /// The caller receives `+OK`, one `+QUEUED` per command, then the EXEC
    /// array.
    pub fn append_transaction(&mut self, tx: &Transaction) -> Result<()> {
        let node = self.transaction_node(tx)?;
        self.append_command_to_node(&node, &command::multi())?;
        for cmd in tx.commands() {
            self.append_command_to_node(&node, cmd)?;
        }
        self.append_command_to_node(&node, &command::exec())
    }

    /// GET: returns the value, or `None` if the key does not exist.
    pub fn get(&mut self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let frame = self.command(&command::get(key))?;
        command::frame_to_bytes(frame)
    }

    /// SET.
    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let frame = self.command(&command::set(key, value))?;
        command::parse_frame_response(frame)?;
        Ok(())
    }

    /// DEL of one key: returns true if it existed.
    pub fn del(&mut self, key: impl Into<Bytes>) -> Result<bool> {
        let frame = self.command(&command::del([key]))?;
        command::frame_to_bool(frame)
    }

    /// EXISTS of one key.
    pub fn exists(&mut self, key: impl Into<Bytes>) -> Result<bool> {
        let frame = self.command(&command::exists([key]))?;
        command::frame_to_bool(frame)
    }

    /// INCR: returns the new value.
    pub fn incr(&mut self, key: impl Into<Bytes>) -> Result<i64> {
        let frame = self.command(&command::incr(key))?;
        command::frame_to_int(frame)
    }

    /// DBSIZE of one node.
    pub fn dbsize(&mut self, node: &NodeAddr) -> Result<i64> {
        let frame = self.command_to_node(node, &command::dbsize())?;
        command::frame_to_int(frame)
    }

    /// Flushes buffered output and closes every connection.
    pub fn close(mut self) {
        self.flush_pending_nodes();
        for (addr, conn) in self.registry.take_connections() {
            debug!(node = %addr, pending = conn.pending_len(), "closing connection");
        }
    }

    fn refresh_if_stale(&mut self) -> Result<()> {
        if self.stale {
            debug!("slot map is stale, refreshing");
            self.refresh()?;
        }
        Ok(())
    }

    fn node_for_slot(&mut self, slot: u16) -> Result<NodeAddr> {
        if let Some(node) = self.slots.node_for_slot(slot) {
            return Ok(node.clone());
        }
        debug!(slot, "slot has no known owner, refreshing");
        self.refresh()?;
        self.slots
            .node_for_slot(slot)
            .cloned()
            .ok_or(Error::UnknownSlot { slot })
    }

    fn any_node(&mut self) -> Result<NodeAddr> {
        if let Some(node) = self.registry.any_primary() {
            return Ok(node);
        }
        self.refresh()?;
        self.registry.any_primary().ok_or_else(|| Error::ClusterUnavailable {
            message: "no reachable primary".to_string(),
        })
    }

    fn fetch_topology(&mut self, addr: &NodeAddr) -> Result<ClusterTopology> {
        let cmd = match self.config.route_strategy {
            RouteStrategy::Slots => cluster_slots(),
            RouteStrategy::Nodes => cluster_nodes(),
        };
        let reply = self.command_to_node(addr, &cmd)?;
        parse_topology(self.config.route_strategy, &reply, &addr.host)
    }

    fn install(&mut self, topology: ClusterTopology) {
        let version = self.slots.version() + 1;
        self.slots = Arc::new(topology.to_slot_map(version));
        self.registry.apply_topology(&topology);
        self.topology = topology;
        self.stale = false;
    }

    fn follow_redirects(
        &mut self,
        frame: Frame,
        mut node: NodeAddr,
        mut reply: Frame,
    ) -> Result<Frame> {
        let mut redirects = 0;
        loop {
            let redirect = match next_step(&reply, redirects, self.config.max_redirects) {
                RedirectStep::Done => return Ok(reply),
                RedirectStep::GiveUp(e) => return Err(e),
                RedirectStep::Follow(redirect) => redirect,
            };
            redirects += 1;
            let target = redirect.addr.clone().or_host(&node.host);
            debug!(
                kind = ?redirect.kind,
                slot = redirect.slot,
                from = %node,
                to = %target,
                redirects,
                "following redirect"
            );

            reply = match redirect.kind {
                RedirectKind::Moved => {
                    self.apply_moved(redirect.slot, &target)?;
                    let ticket = self.send(&target, &frame)?;
                    self.wait(ticket, &target)?
                }
                RedirectKind::Ask => {
                    let asking = self.send(&target, &asking().into_frame())?;
                    let ticket = self.send(&target, &frame)?;
                    let mut replies = self.wait_all(&[asking, ticket], &target)?;
                    replies.pop().unwrap_or(Frame::Null)
                }
            };
            node = target;
        }
    }

    fn apply_moved(&mut self, slot: u16, target: &NodeAddr) -> Result<()> {
        match self.config.redirect_policy {
            RedirectPolicy::PatchSlot => {
                self.registry.ensure_primary(target);
                Arc::make_mut(&mut self.slots).assign(slot, target);
            }
            RedirectPolicy::Refresh => {
                self.refresh()?;
                if self.slots.node_for_slot(slot) != Some(target) {
                    self.registry.ensure_primary(target);
                    Arc::make_mut(&mut self.slots).assign(slot, target);
                }
            }
        }
        Ok(())
    }

    fn note_moved(&mut self, replies: &[Frame]) -> Result<()> {
        for reply in replies {
            if let Some(redirect) = Redirect::from_frame(reply) {
                if redirect.kind == RedirectKind::Moved {
                    let target = redirect.addr.clone();
                    if !target.host.is_empty() {
                        self.apply_moved(redirect.slot, &target)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn transaction_node(&mut self, tx: &Transaction) -> Result<NodeAddr> {
        if tx.is_empty() {
            return Err(Error::InvalidArgument {
                message: "transaction has no commands".to_string(),
            });
        }
        if let Some(node) = tx.node() {
            return Ok(node.clone());
        }
        self.refresh_if_stale()?;
        let mut owners = Vec::new();
        for slot in tx.slots()? {
            owners.push(self.node_for_slot(slot)?);
        }
        match transaction::pin(&owners)? {
            Some(node) => Ok(node),
            None => self.any_node(),
        }
    }

    /// Appends `frame` to the node's connection, connecting if needed.
    fn send(&mut self, node: &NodeAddr, frame: &Frame) -> Result<Ticket> {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.connection(node)?.append(ticket, frame);
        Ok(ticket)
    }

    fn connection(&mut self, node: &NodeAddr) -> Result<&mut Connection<Ticket>> {
        let entry = self.registry.ensure(node);
        if entry.conn.is_none() {
            match open_connection(self.connector.as_ref(), node, &self.config) {
                Ok(conn) => {
                    entry.conn = Some(conn);
                    entry.unreachable = false;
                }
                Err(e) => {
                    warn!(node = %node, error = %e, "connection failed");
                    entry.unreachable = true;
                    self.stale = true;
                    return Err(e);
                }
            }
        }
        entry.conn.as_mut().ok_or_else(|| Error::Connection {
            message: format!("no connection to {node}"),
        })
    }

    /// Blocks until the reply for `ticket` is available.
    ///
    /// Replies for other tickets read on the way are stashed.
    fn wait(&mut self, ticket: Ticket, node: &NodeAddr) -> Result<Frame> {
        loop {
            if let Some(result) = self.stash.remove(&ticket) {
                return result;
            }
            let read = match self.registry.connection_mut(node) {
                Some(conn) => conn.read_reply(),
                None => {
                    return Err(Error::Connection {
                        message: format!("connection to {node} was lost"),
                    })
                }
            };
            match read {
                Ok(Some((got, frame))) if got == ticket => return Ok(frame),
                Ok(Some((got, frame))) => {
                    self.stash.insert(got, Ok(frame));
                }
                Ok(None) => {
                    return Err(Error::Protocol {
                        message: format!("no reply pending on {node}"),
                    })
                }
                Err(e) => self.fail_node(node, &e),
            }
        }
    }

    /// Waits for every ticket, returning the first error only after all
    /// of them were consumed.
    fn wait_all(&mut self, tickets: &[Ticket], node: &NodeAddr) -> Result<Vec<Frame>> {
        let mut replies = Vec::with_capacity(tickets.len());
        let mut first_err = None;
        for ticket in tickets {
            match self.wait(*ticket, node) {
                Ok(frame) => replies.push(frame),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }

    /// Drops a failed connection, failing each command it owed exactly once.
    fn fail_node(&mut self, node: &NodeAddr, reason: &Error) {
        let Some(mut conn) = self.registry.mark_unreachable(node) else {
            return;
        };
        let owed = conn.drain_pending();
        warn!(node = %node, pending = owed.len(), error = %reason, "connection failed");
        for ticket in owed {
            self.stash.insert(ticket, Err(Error::for_pending(node, reason)));
        }
        self.stale = true;
    }

    fn flush_pending_nodes(&mut self) {
        let mut nodes: Vec<NodeAddr> = Vec::new();
        for request in &self.requests {
            if !nodes.contains(&request.node) {
                nodes.push(request.node.clone());
            }
        }
        for node in nodes {
            let flushed = match self.registry.connection_mut(&node) {
                Some(conn) => conn.flush(),
                None => continue,
            };
            if let Err(e) = flushed {
                self.fail_node(&node, &e);
            }
        }
    }
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("seeds", &self.config.seeds)
            .field("slot_map_version", &self.slots.version())
            .field("nodes", &self.registry.len())
            .field("pending", &self.requests.len())
            .finish()
    }
}

/// Connects and authenticates a new blocking connection.
fn open_connection(
    connector: &dyn Connector,
    node: &NodeAddr,
    config: &ClusterConfig,
) -> Result<Connection<Ticket>> {
    let transport = connector
        .connect(node, config)
        .map_err(|e| Error::Connection {
            message: format!("failed to connect to {node}: {e}"),
        })?;
    let mut conn = Connection::new(transport);

    if let Some(auth) = auth_command(config) {
        conn.append(0, &auth.into_frame());
        let reply = match conn.read_reply()? {
            Some((_, reply)) => reply,
            None => Frame::Null,
        };
        if let Some(message) = reply.error_message() {
            return Err(Error::Auth { message });
        }
    }
    Ok(conn)
}

/// AUTH for new connections, if credentials are configured.
pub(crate) fn auth_command(config: &ClusterConfig) -> Option<Cmd> {
    let password = config.password.as_ref()?;
    Some(match &config.username {
        Some(user) => command::auth_with_username(user.clone(), password.clone()),
        None => command::auth(password.clone()),
    })
}

/// Parses a discovery reply according to the routing strategy.
pub(crate) fn parse_topology(
    strategy: RouteStrategy,
    reply: &Frame,
    host: &str,
) -> Result<ClusterTopology> {
    if let Some(message) = reply.error_message() {
        return Err(Error::Server { message });
    }
    let topology = match strategy {
        RouteStrategy::Slots => ClusterTopology::from_cluster_slots(reply, host)?,
        RouteStrategy::Nodes => {
            let text = match reply {
                Frame::BulkString(Some(text)) => String::from_utf8_lossy(text).into_owned(),
                Frame::SimpleString(text) => String::from_utf8_lossy(text).into_owned(),
                _ => {
                    return Err(Error::Protocol {
                        message: "CLUSTER NODES reply must be a string".to_string(),
                    })
                }
            };
            ClusterTopology::from_cluster_nodes(&text, host)?
        }
    };
    if topology.ranges.is_empty() {
        return Err(Error::Protocol {
            message: "topology reply lists no slot ranges".to_string(),
        });
    }
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Write};

    use super::*;
    use crate::core::transport::Transport;

    /// Replays canned reply bytes and swallows whatever is written.
    struct Canned(Cursor<Vec<u8>>);

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for Canned {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// 7000 describes a two-node cluster; 7001 answers with garbage.
    struct GarbledReplica;

    impl Connector for GarbledReplica {
        fn connect(&self, addr: &NodeAddr, _: &ClusterConfig) -> io::Result<Box<dyn Transport>> {
            let bytes: &[u8] = match addr.port {
                7000 => b"*2\r\n*3\r\n:0\r\n:8191\r\n*2\r\n$9\r\n127.0.0.1\r\n:7000\r\n\
                      *3\r\n:8192\r\n:16383\r\n*2\r\n$9\r\n127.0.0.1\r\n:7001\r\n",
                _ => b"?garbage\r\n",
            };
            Ok(Box::new(Canned(Cursor::new(bytes.to_vec()))))
        }
    }

    #[test]
    fn test_auth_command() {
        let mut config = ClusterConfig::default();
        assert!(auth_command(&config).is_none());

        config.password = Some("pw".to_string());
        assert_eq!(auth_command(&config), Some(command::auth("pw")));

        config.username = Some("app".to_string());
        assert_eq!(
            auth_command(&config),
            Some(command::auth_with_username("app", "pw"))
        );
    }

    #[test]
    fn test_parse_topology_rejects_error_and_empty() {
        let err = parse_topology(
            RouteStrategy::Slots,
            &Frame::Error(b"ERR This instance has cluster support disabled".to_vec()),
            "h",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Server { .. }));

        let err = parse_topology(RouteStrategy::Slots, &Frame::Array(vec![]), "h").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_topology_nodes_text() {
        let reply = Frame::bulk("abc :7000@17000 myself,master - 0 0 1 connected 0-16383\n");
        let topology = parse_topology(RouteStrategy::Nodes, &reply, "10.0.0.1").unwrap();
        assert_eq!(topology.primaries(), vec![NodeAddr::new("10.0.0.1", 7000)]);
    }

    #[test]
    fn test_connect_requires_seeds() {
        let err = ClusterClient::with_config(ClusterConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_undecodable_stream_is_a_protocol_error() {
        let config = ClusterConfig {
            seeds: vec![NodeAddr::new("127.0.0.1", 7000)],
            ..ClusterConfig::default()
        };
        let mut client = ClusterClient::with_connector(config, GarbledReplica).unwrap();
        assert_eq!(client.nodes().count(), 2);

        let node = NodeAddr::new("127.0.0.1", 7001);
        let err = client.command_to_node(&node, &command::ping()).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "got {err:?}");
        assert!(err.to_string().contains("unknown frame type"));
    }
}
