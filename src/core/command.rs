use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;
use bytes::Bytes;

/// A command ready to be sent to a cluster node.
///
/// Commands are built using the builder pattern and converted to frames
/// for transmission over the connection. The first argument is the
/// command name.
///
/// # Example
///
/// ```
/// use clustermux::core::command::{Cmd, get, set};
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// let get_cmd = get("key");
/// let set_cmd = set("key", "new_value");
/// assert_eq!(cmd, set_cmd);
/// assert_eq!(get_cmd.name(), "GET");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    ///
    /// # Arguments
    ///
    /// * `name` - The command name (e.g., "GET", "SET", "DEL")
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Builds a command from an already split argument vector.
    ///
    /// Returns `None` if `args` is empty.
    pub fn from_args<I, T>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let args: Vec<Bytes> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            None
        } else {
            Some(Self { args })
        }
    }

    /// Appends an argument to the command.
    ///
    /// # Arguments
    ///
    /// * `arg` - The argument value
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Returns the upper-cased command name.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Returns every argument, the command name included.
    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(self.args.into_iter().map(Frame::bulk).collect())
    }

    /// Builds the RESP Array frame without consuming the command.
    #[inline]
    pub fn to_frame(&self) -> Frame {
        Frame::Array(self.args.iter().cloned().map(Frame::bulk).collect())
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a DEL command over one or more keys.
#[inline]
pub fn del<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    keys.into_iter().fold(Cmd::new("DEL"), Cmd::arg)
}

/// Creates an EXISTS command over one or more keys.
#[inline]
pub fn exists<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    keys.into_iter().fold(Cmd::new("EXISTS"), Cmd::arg)
}

/// Creates an INCR command.
#[inline]
pub fn incr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("INCR").arg(key)
}

/// Creates an MGET command.
#[inline]
pub fn mget<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    keys.into_iter().fold(Cmd::new("MGET"), Cmd::arg)
}

/// Creates an MSET command from key/value pairs.
#[inline]
pub fn mset<I, K, V>(pairs: I) -> Cmd
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Bytes>,
    V: Into<Bytes>,
{
    pairs
        .into_iter()
        .fold(Cmd::new("MSET"), |cmd, (k, v)| cmd.arg(k).arg(v))
}

/// Creates a DBSIZE command.
#[inline]
pub fn dbsize() -> Cmd {
    Cmd::new("DBSIZE")
}

/// Creates a MULTI command.
#[inline]
pub fn multi() -> Cmd {
    Cmd::new("MULTI")
}

/// Creates an EXEC command.
#[inline]
pub fn exec() -> Cmd {
    Cmd::new("EXEC")
}

/// Creates a DISCARD command.
#[inline]
pub fn discard() -> Cmd {
    Cmd::new("DISCARD")
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates an AUTH command with username and password (ACL style).
#[inline]
pub fn auth_with_username(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(username).arg(password)
}

/// Returns the frame unchanged unless it is an error reply.
#[inline]
pub fn parse_frame_response(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(e) => Err(Error::Server {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        _ => Ok(frame),
    }
}

/// Converts a frame to bytes.
#[inline]
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>> {
    match frame {
        Frame::BulkString(b) => Ok(b),
        Frame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        Frame::Null => Ok(None),
        Frame::Error(e) => Err(Error::Server {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        _ => Err(Error::Protocol {
            message: "unexpected frame type".to_string(),
        }),
    }
}

/// Converts a frame to an integer.
#[inline]
pub fn frame_to_int(frame: Frame) -> Result<i64> {
    match frame {
        Frame::Integer(i) => Ok(i),
        Frame::BulkString(Some(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::Protocol {
                message: "invalid integer".to_string(),
            }),
        Frame::Error(e) => Err(Error::Server {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        _ => Err(Error::Protocol {
            message: "unexpected frame type".to_string(),
        }),
    }
}

/// Converts a frame to a boolean.
#[inline]
pub fn frame_to_bool(frame: Frame) -> Result<bool> {
    match frame {
        Frame::Integer(i) => Ok(i != 0),
        Frame::SimpleString(s) => Ok(s == b"OK"),
        Frame::Error(e) => Err(Error::Server {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        _ => Err(Error::Protocol {
            message: "unexpected frame type".to_string(),
        }),
    }
}
