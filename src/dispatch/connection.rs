use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::time::Instant;

use bytes::{Buf, BytesMut};

use super::{ConnectionId, NonBlockingIo};
use crate::cluster::registry::PendingReplies;
use crate::cluster::topology::NodeAddr;
use crate::proto::codec::{encode_into, Decoder};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const READ_CHUNK: usize = 16 * 1024;

/// Lifecycle of an event-loop connection.
///
/// `Disconnected → Connecting → Connected → Disconnecting → Disconnected`;
/// an I/O error jumps straight back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    /// No socket.
    #[default]
    Disconnected,
    /// The event loop is connecting; commands are buffered.
    Connecting,
    /// Commands flow.
    Connected,
    /// No new commands; closes once every reply has arrived.
    Disconnecting,
}

/// A non-blocking connection to one node.
///
/// Same FIFO discipline as the blocking connection: every pushed command
/// adds a descriptor `P`, every decoded reply pops the oldest one. Each
/// descriptor remembers when it was queued.
pub struct AsyncConnection<I, P> {
    id: ConnectionId,
    addr: NodeAddr,
    state: ConnState,
    io: Option<I>,
    decoder: Decoder,
    outbound: BytesMut,
    pending: VecDeque<(P, Instant)>,
}

impl<I: NonBlockingIo, P> AsyncConnection<I, P> {
    /// Creates a connection whose connect is in progress.
    pub fn new(id: ConnectionId, addr: NodeAddr) -> Self {
        Self {
            id,
            addr,
            state: ConnState::Connecting,
            io: None,
            decoder: Decoder::new(),
            outbound: BytesMut::new(),
            pending: VecDeque::new(),
        }
    }

    /// Event-loop id of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Node this connection talks to.
    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    /// Current state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnState) {
        self.state = state;
    }

    /// Installs the connected socket.
    pub(crate) fn connected(&mut self, io: I) {
        self.io = Some(io);
        self.state = ConnState::Connected;
    }

    /// Returns true while the socket may be read or written.
    pub fn is_open(&self) -> bool {
        self.io.is_some()
            && matches!(self.state, ConnState::Connected | ConnState::Disconnecting)
    }

    /// Encodes `frame` and queues its descriptor.
    pub fn push(&mut self, descriptor: P, frame: &Frame) {
        encode_into(frame, &mut self.outbound);
        self.pending.push_back((descriptor, Instant::now()));
    }

    /// Returns true if buffered output is waiting for the socket.
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Number of replies still owed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// When the oldest command still owed a reply was queued.
    pub fn oldest_pending_since(&self) -> Option<Instant> {
        self.pending.front().map(|(_, queued)| *queued)
    }

    /// Writes until the socket would block or the buffer is empty.
    pub fn write_some(&mut self) -> io::Result<()> {
        let Some(io) = self.io.as_mut() else {
            return Ok(());
        };
        while !self.outbound.is_empty() {
            match io.try_write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads until the socket would block.
    ///
    /// Returns `Ok(true)` if the peer closed the connection. Bytes read
    /// before the close stay buffered for [`next_reply`](Self::next_reply).
    pub fn read_some(&mut self) -> io::Result<bool> {
        let Some(io) = self.io.as_mut() else {
            return Ok(false);
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match io.try_read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.decoder.append(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Decodes the next buffered reply and pairs it with its descriptor.
    ///
    /// # Errors
    ///
    /// Malformed bytes, or a reply nobody is waiting for, are fatal
    /// protocol errors.
    pub fn next_reply(&mut self) -> Result<Option<(P, Frame)>> {
        let Some(frame) = self.decoder.decode()? else {
            return Ok(None);
        };
        match self.pending.pop_front() {
            Some((descriptor, _)) => Ok(Some((descriptor, frame))),
            None => Err(Error::Protocol {
                message: format!("unexpected reply from {}: {frame:?}", self.addr),
            }),
        }
    }

    /// Closes the socket and returns every descriptor still owed a reply.
    pub fn close(&mut self) -> Vec<P> {
        self.io = None;
        self.state = ConnState::Disconnected;
        self.outbound.clear();
        self.pending.drain(..).map(|(descriptor, _)| descriptor).collect()
    }
}

impl<I, P> PendingReplies for AsyncConnection<I, P> {
    fn pending_replies(&self) -> usize {
        self.pending.len()
    }
}

impl<I, P> fmt::Debug for AsyncConnection<I, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("outbound", &self.outbound.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts `budget` bytes per write call, then would block.
    struct Throttled {
        input: Vec<u8>,
        written: Vec<u8>,
        budget: usize,
        closed: bool,
    }

    impl NonBlockingIo for Throttled {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.input.is_empty() {
                return if self.closed {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(self.input.len());
            buf[..n].copy_from_slice(&self.input[..n]);
            self.input.drain(..n);
            Ok(n)
        }

        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    fn conn(input: &[u8], budget: usize, closed: bool) -> AsyncConnection<Throttled, u32> {
        let mut conn = AsyncConnection::new(ConnectionId(1), NodeAddr::new("127.0.0.1", 7000));
        conn.connected(Throttled {
            input: input.to_vec(),
            written: Vec::new(),
            budget,
            closed,
        });
        conn
    }

    #[test]
    fn test_state_transitions() {
        let mut c: AsyncConnection<Throttled, u32> =
            AsyncConnection::new(ConnectionId(1), NodeAddr::new("127.0.0.1", 7000));
        assert_eq!(c.state(), ConnState::Connecting);
        assert!(!c.is_open());
        c.push(1, &Frame::Array(vec![Frame::bulk("PING")]));
        assert!(c.wants_write());

        let mut c = conn(b"", 64, false);
        assert_eq!(c.state(), ConnState::Connected);
        c.set_state(ConnState::Disconnecting);
        assert!(c.is_open());
        c.push(7, &Frame::Array(vec![Frame::bulk("PING")]));
        assert_eq!(c.close(), vec![7]);
        assert_eq!(c.state(), ConnState::Disconnected);
    }

    #[test]
    fn test_partial_writes_stop_at_would_block() {
        let mut c = conn(b"", 5, false);
        c.push(1, &Frame::Array(vec![Frame::bulk("PING")]));
        c.write_some().unwrap();
        assert!(c.wants_write());
        c.io.as_mut().unwrap().budget = 100;
        c.write_some().unwrap();
        assert!(!c.wants_write());
        assert_eq!(c.io.as_ref().unwrap().written, b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_replies_in_order_then_eof() {
        let mut c = conn(b"+OK\r\n:5\r\n", 64, true);
        c.push(1, &Frame::Array(vec![Frame::bulk("SET")]));
        c.push(2, &Frame::Array(vec![Frame::bulk("INCR")]));
        assert!(c.read_some().unwrap());
        assert_eq!(
            c.next_reply().unwrap(),
            Some((1, Frame::SimpleString(b"OK".to_vec())))
        );
        assert_eq!(c.next_reply().unwrap(), Some((2, Frame::Integer(5))));
        assert_eq!(c.next_reply().unwrap(), None);
    }

    #[test]
    fn test_oldest_pending_tracks_queue_head() {
        let mut c = conn(b"+OK\r\n", 64, false);
        assert_eq!(c.oldest_pending_since(), None);
        let before = Instant::now();
        c.push(1, &Frame::Array(vec![Frame::bulk("GET")]));
        let first = c.oldest_pending_since().unwrap();
        assert!(first >= before);
        c.push(2, &Frame::Array(vec![Frame::bulk("GET")]));
        assert_eq!(c.oldest_pending_since(), Some(first));

        c.read_some().unwrap();
        assert_eq!(c.next_reply().unwrap().map(|(d, _)| d), Some(1));
        assert!(c.oldest_pending_since().unwrap() >= first);
        assert_eq!(c.close(), vec![2]);
        assert_eq!(c.oldest_pending_since(), None);
    }

    #[test]
    fn test_unsolicited_reply_is_protocol_error() {
        let mut c = conn(b"+OK\r\n", 64, false);
        assert!(!c.read_some().unwrap());
        assert!(matches!(c.next_reply(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_malformed_bytes_are_fatal() {
        let mut c = conn(b"!bogus\r\n", 64, false);
        c.push(1, &Frame::Array(vec![Frame::bulk("GET")]));
        c.read_some().unwrap();
        assert!(c.next_reply().unwrap_err().is_connection_fatal());
    }
}
