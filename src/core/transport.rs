//! Blocking byte streams to cluster nodes.
//!
//! The blocking client never opens sockets itself; it asks a [`Connector`]
//! for a [`Transport`]. [`TcpConnector`] is the default, tests substitute
//! in-memory streams.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use tracing::debug;

use crate::cluster::topology::NodeAddr;
use crate::core::builder::ClusterConfig;

/// A bidirectional blocking byte stream.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Opens transports to cluster nodes.
pub trait Connector: Send {
    /// Connects to `addr`, applying the timeouts in `config`.
    fn connect(&self, addr: &NodeAddr, config: &ClusterConfig) -> io::Result<Box<dyn Transport>>;
}

/// Plain TCP connector with `TCP_NODELAY` and optional timeouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: &NodeAddr, config: &ClusterConfig) -> io::Result<Box<dyn Transport>> {
        let mut last_err = None;
        for socket_addr in (addr.host.as_str(), addr.port).to_socket_addrs()? {
            let attempt = match config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout),
                None => TcpStream::connect(socket_addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(config.command_timeout)?;
                    stream.set_write_timeout(config.command_timeout)?;
                    debug!(node = %addr, "connected");
                    return Ok(Box::new(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{addr} did not resolve to any address"),
            )
        }))
    }
}
