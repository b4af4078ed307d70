use bytes::{BufMut, BytesMut};

use crate::proto::frame::Frame;

/// A RESP encoder that accumulates [`Frame`]s into one outbound buffer.
///
/// Pipelined commands are encoded back to back; the whole buffer is then
/// handed to the socket with a single write where possible.
///
/// # Example
///
/// ```
/// use clustermux::proto::codec::Encoder;
/// use clustermux::proto::frame::Frame;
///
/// let mut encoder = Encoder::new();
/// encoder.encode(&Frame::Array(vec![Frame::bulk("PING")]));
/// let data = encoder.take();
/// assert_eq!(&data[..], b"*1\r\n$4\r\nPING\r\n");
/// ```
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Encodes a frame into the internal buffer.
    pub fn encode(&mut self, frame: &Frame) {
        encode_into(frame, &mut self.buf);
    }

    /// Returns the number of encoded bytes waiting to be taken.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been encoded since the last take.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Takes the encoded data from the buffer, leaving it empty.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends the RESP encoding of `frame` to `buf`.
///
/// Connections keep their own outbound `BytesMut` and encode into it
/// directly with this function.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) {
    match frame {
        Frame::SimpleString(s) => {
            buf.put_u8(b'+');
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        Frame::Error(e) => {
            buf.put_u8(b'-');
            buf.extend_from_slice(e);
            buf.extend_from_slice(b"\r\n");
        }
        Frame::Integer(n) => {
            buf.put_u8(b':');
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Frame::BulkString(Some(data)) => {
            buf.put_u8(b'$');
            buf.extend_from_slice(data.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(data);
            buf.extend_from_slice(b"\r\n");
        }
        Frame::BulkString(None) | Frame::Null => {
            buf.extend_from_slice(b"$-1\r\n");
        }
        Frame::Array(items) => {
            buf.put_u8(b'*');
            buf.extend_from_slice(items.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            for item in items {
                encode_into(item, buf);
            }
        }
    }
}
