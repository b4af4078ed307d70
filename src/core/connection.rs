use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

use crate::cluster::registry::PendingReplies;
use crate::core::transport::Transport;
use crate::proto::codec::{encode_into, Decoder};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const READ_CHUNK: usize = 16 * 1024;

/// A blocking connection to one cluster node.
///
/// Owns one outbound buffer and one FIFO of pending descriptors `P`. Each
/// appended command pushes its descriptor; each reply read pops the oldest
/// one, so replies are always matched in send order.
pub struct Connection<P> {
    transport: Box<dyn Transport>,
    decoder: Decoder,
    outbound: BytesMut,
    pending: VecDeque<P>,
}

impl<P> Connection<P> {
    /// Wraps a connected transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            decoder: Decoder::new(),
            outbound: BytesMut::new(),
            pending: VecDeque::new(),
        }
    }

    /// Encodes `frame` into the outbound buffer and queues its descriptor.
    ///
    /// Nothing is written until [`flush`](Self::flush) or
    /// [`read_reply`](Self::read_reply).
    pub fn append(&mut self, descriptor: P, frame: &Frame) {
        encode_into(frame, &mut self.outbound);
        self.pending.push_back(descriptor);
    }

    /// Writes the whole outbound buffer.
    pub fn flush(&mut self) -> Result<()> {
        while !self.outbound.is_empty() {
            match self.transport.write(&self.outbound) {
                Ok(0) => {
                    return Err(Error::Connection {
                        message: "connection closed while writing".to_string(),
                    })
                }
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.transport.flush()?;
        Ok(())
    }

    /// Flushes, then blocks until the reply to the oldest pending command
    /// arrives.
    ///
    /// Returns `Ok(None)` without any I/O when nothing is pending.
    ///
    /// # Errors
    ///
    /// Any error leaves the connection unusable: the stream is either
    /// closed or no longer aligned with the pending queue.
    pub fn read_reply(&mut self) -> Result<Option<(P, Frame)>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.flush()?;

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return match self.pending.pop_front() {
                    Some(descriptor) => Ok(Some((descriptor, frame))),
                    None => Err(Error::Protocol {
                        message: "reply received with no pending command".to_string(),
                    }),
                };
            }
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    return Err(Error::Connection {
                        message: "connection closed by server".to_string(),
                    })
                }
                Ok(n) => self.decoder.append(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Number of commands whose reply has not been read yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns every pending descriptor, oldest first.
    pub fn drain_pending(&mut self) -> Vec<P> {
        self.outbound.clear();
        self.pending.drain(..).collect()
    }
}

impl<P> PendingReplies for Connection<P> {
    fn pending_replies(&self) -> usize {
        self.pending.len()
    }
}

impl<P> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("outbound", &self.outbound.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
