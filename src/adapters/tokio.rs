//! tokio adapter.
//!
//! [`TokioEventLoop`] owns the connect futures and socket handles; [`run`]
//! turns their readiness into `handle_*` calls on the client until every
//! connection is closed, and enforces the client's command deadlines.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::poll_fn;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::cluster::topology::NodeAddr;
use crate::dispatch::{AsyncClusterClient, ConnectionId, EventLoop, NonBlockingIo};

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

enum Source {
    Connecting(ConnectFuture),
    Attached {
        stream: Arc<TcpStream>,
        read: bool,
        write: bool,
    },
}

/// What the loop observed.
#[derive(Debug)]
pub enum Event {
    /// A connect finished.
    Connected(ConnectionId, io::Result<TokioIo>),
    /// The socket has data or was closed.
    Readable(ConnectionId),
    /// The socket accepts writes.
    Writable(ConnectionId),
}

/// Socket handed to the client; shares the stream with the loop.
#[derive(Debug)]
pub struct TokioIo {
    stream: Arc<TcpStream>,
}

impl TokioIo {
    /// Remote address of the socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl NonBlockingIo for TokioIo {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }
}

/// [`EventLoop`] backed by the tokio reactor.
///
/// Must be driven from inside a tokio runtime, usually through [`run`].
#[derive(Default)]
pub struct TokioEventLoop {
    sources: HashMap<ConnectionId, Source>,
    connect_timeout: Option<Duration>,
    last: Option<ConnectionId>,
}

impl TokioEventLoop {
    /// Creates an empty loop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds connect attempts for which the client passes no timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Number of connections being connected or watched.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if nothing is being watched.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Waits for the next event. `None` once nothing is watched.
    pub async fn next_event(&mut self) -> Option<Event> {
        poll_fn(|cx| self.poll_event(cx)).await
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        if self.sources.is_empty() {
            return Poll::Ready(None);
        }

        // Start after the last served connection so a busy socket cannot
        // starve the others.
        let mut ids: Vec<ConnectionId> = self.sources.keys().copied().collect();
        ids.sort();
        if let Some(last) = self.last {
            let split = ids.partition_point(|id| *id <= last);
            ids.rotate_left(split);
        }

        for id in ids {
            let step = match self.sources.get_mut(&id) {
                Some(Source::Connecting(connect)) => match connect.as_mut().poll(cx) {
                    Poll::Ready(result) => Step::Connected(result),
                    Poll::Pending => continue,
                },
                Some(Source::Attached {
                    stream,
                    read,
                    write,
                }) => {
                    if *write && stream.poll_write_ready(cx).is_ready() {
                        Step::Writable
                    } else if *read && stream.poll_read_ready(cx).is_ready() {
                        Step::Readable
                    } else {
                        continue;
                    }
                }
                None => continue,
            };

            self.last = Some(id);
            let event = match step {
                Step::Connected(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%id, error = %e, "cannot set TCP_NODELAY");
                    }
                    let stream = Arc::new(stream);
                    self.sources.insert(
                        id,
                        Source::Attached {
                            stream: Arc::clone(&stream),
                            read: false,
                            write: false,
                        },
                    );
                    Event::Connected(id, Ok(TokioIo { stream }))
                }
                Step::Connected(Err(e)) => {
                    self.sources.remove(&id);
                    Event::Connected(id, Err(e))
                }
                Step::Writable => Event::Writable(id),
                Step::Readable => Event::Readable(id),
            };
            return Poll::Ready(Some(event));
        }
        Poll::Pending
    }
}

enum Step {
    Connected(io::Result<TcpStream>),
    Writable,
    Readable,
}

impl EventLoop for TokioEventLoop {
    type Io = TokioIo;

    fn connect(
        &mut self,
        id: ConnectionId,
        addr: &NodeAddr,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let target = (addr.host.clone(), addr.port);
        let limit = timeout.or(self.connect_timeout);
        let connect = async move {
            let connect = TcpStream::connect(target);
            match limit {
                Some(limit) => tokio::time::timeout(limit, connect)
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
                None => connect.await,
            }
        };
        self.sources.insert(id, Source::Connecting(Box::pin(connect)));
        debug!(node = %addr, %id, timeout = ?limit, "connect started");
        Ok(())
    }

    fn attach(&mut self, id: ConnectionId, want_read: bool, want_write: bool) {
        if let Some(Source::Attached { read, write, .. }) = self.sources.get_mut(&id) {
            *read = want_read;
            *write = want_write;
            trace!(%id, want_read, want_write, "interest updated");
        }
    }

    fn detach(&mut self, id: ConnectionId) {
        if self.sources.remove(&id).is_some() {
            trace!(%id, "detached");
        }
    }
}

impl fmt::Debug for TokioEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioEventLoop")
            .field("sources", &self.sources.len())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Drives `client` until no connection is left.
///
/// Returns after [`AsyncClusterClient::disconnect`] once every reply has
/// been delivered, or when every connection failed. Commands outliving the
/// configured command timeout fail their connection.
pub async fn run(client: &mut AsyncClusterClient<TokioEventLoop>) {
    loop {
        let event = match client.next_deadline() {
            Some(deadline) => tokio::select! {
                event = client.event_loop_mut().next_event() => Some(event),
                () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => None,
            },
            None => Some(client.event_loop_mut().next_event().await),
        };
        match event {
            Some(Some(Event::Connected(id, result))) => client.handle_connect(id, result),
            Some(Some(Event::Readable(id))) => client.handle_readable(id),
            Some(Some(Event::Writable(id))) => client.handle_writable(id),
            Some(None) => break,
            None => client.handle_timeouts(Instant::now()),
        }
    }
}
