use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// This enum represents every reply a cluster node can send:
/// - SimpleString: Status responses like "OK" or "QUEUED"
/// - Error: Error responses, including MOVED/ASK relocation signals
/// - Integer: Numeric responses
/// - BulkString: Binary-safe string data
/// - Array: Command arguments, transaction results, topology listings
/// - Null: NULL value
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
}

impl Frame {
    /// Builds a bulk string frame from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::BulkString(Some(data.into()))
    }

    /// Returns true for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::SimpleString(s) if s == b"OK")
    }

    /// Returns true for the `+QUEUED` acknowledgement sent inside MULTI.
    pub fn is_queued(&self) -> bool {
        matches!(self, Frame::SimpleString(s) if s == b"QUEUED")
    }

    /// Returns true if this frame is Null.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }

    /// Returns the error text if this is an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Frame::Error(e) => Some(String::from_utf8_lossy(e).into_owned()),
            _ => None,
        }
    }

    /// Attempts to extract an integer from this frame.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to borrow the items of an array frame.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(a) => Some(a),
            _ => None,
        }
    }
}
