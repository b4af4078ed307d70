use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// A RESP decoder that converts bytes to [`Frame`] types.
///
/// The decoder handles streaming input: call [`append`](Decoder::append) as
/// bytes arrive, then [`decode`](Decoder::decode) until it returns `Ok(None)`.
/// Bytes are only consumed once a whole frame is available, so a reply split
/// across reads is never half-parsed.
///
/// # Example
///
/// ```
/// use clustermux::proto::codec::Decoder;
/// use clustermux::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame, Frame::SimpleString(b"OK".to_vec()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    ///
    /// # Arguments
    ///
    /// * `max_frame_size` - Maximum size in bytes for a single frame
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends raw bytes to the internal buffer.
    ///
    /// Buffer size limits are checked during decode, not append.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Attempts to decode a frame from the buffer.
    ///
    /// Returns `Ok(Some(Frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, and an error if the data is
    /// malformed. After an error the stream is unsynchronized and the
    /// connection must be dropped.
    pub fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.len() > self.max_frame_size {
            return Err(DecodeError::new("Buffer size exceeded maximum frame size"));
        }

        let mut pos = 0;
        match parse_frame(&self.buf, &mut pos, self.max_frame_size)? {
            Some(frame) => {
                self.buf.advance(pos);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses one frame starting at `pos`, advancing `pos` past it on success.
fn parse_frame(buf: &[u8], pos: &mut usize, max: usize) -> Result<Option<Frame>, DecodeError> {
    let Some(&tag) = buf.get(*pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, *pos + 1) else {
        return Ok(None);
    };

    match tag {
        b'+' => {
            *pos = next;
            Ok(Some(Frame::SimpleString(line.to_vec())))
        }
        b'-' => {
            *pos = next;
            Ok(Some(Frame::Error(line.to_vec())))
        }
        b':' => {
            let num = parse_int(line)?;
            *pos = next;
            Ok(Some(Frame::Integer(num)))
        }
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                *pos = next;
                return Ok(Some(Frame::BulkString(None)));
            }
            if len < 0 {
                return Err(DecodeError::new(format!("invalid bulk string length: {len}")));
            }
            let len = len as usize;
            if len > max {
                return Err(DecodeError::new(
                    "Bulk string length exceeds maximum frame size",
                ));
            }
            if buf.len() < next + len + 2 {
                return Ok(None);
            }
            if &buf[next + len..next + len + 2] != b"\r\n" {
                return Err(DecodeError::new("bulk string is not terminated by CRLF"));
            }
            let data = Bytes::copy_from_slice(&buf[next..next + len]);
            *pos = next + len + 2;
            Ok(Some(Frame::BulkString(Some(data))))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len == -1 {
                *pos = next;
                return Ok(Some(Frame::Null));
            }
            if len < 0 {
                return Err(DecodeError::new(format!("invalid array length: {len}")));
            }
            let len = len as usize;
            // Assume minimum 16 bytes per item
            if len > max / 16 {
                return Err(DecodeError::new("Array length exceeds reasonable maximum"));
            }
            let mut cursor = next;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                match parse_frame(buf, &mut cursor, max)? {
                    Some(frame) => items.push(frame),
                    None => return Ok(None),
                }
            }
            *pos = cursor;
            Ok(Some(Frame::Array(items)))
        }
        other => Err(DecodeError::new(format!(
            "unknown frame type: {}",
            other as char
        ))),
    }
}

/// Returns the line starting at `start` (without CRLF) and the index after it.
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    if start > buf.len() {
        return None;
    }
    buf[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|offset| (&buf[start..start + offset], start + offset + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .map_err(|e| DecodeError::new(e.to_string()))?
        .parse::<i64>()
        .map_err(|e| DecodeError::new(e.to_string()))
}
