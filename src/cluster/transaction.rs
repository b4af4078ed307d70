//! MULTI/EXEC transactions pinned to one node.

use crate::cluster::router::{route_for, Route};
use crate::cluster::topology::NodeAddr;
use crate::core::command::Cmd;
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// A batch of commands executed atomically on one node.
///
/// Every keyed command must be served by the same node; the client checks
/// this before sending anything. Use [`on_node`](Self::on_node) to pin a
/// transaction of keyless commands, or to skip the check.
///
/// # Example
///
/// ```
/// use clustermux::cluster::Transaction;
/// use clustermux::core::command;
///
/// let tx = Transaction::new()
///     .add(command::set("{user1}.name", "ann"))
///     .add(command::incr("{user1}.visits"));
/// assert_eq!(tx.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    cmds: Vec<Cmd>,
    node: Option<NodeAddr>,
}

impl Transaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command.
    #[inline]
    pub fn add(mut self, cmd: Cmd) -> Self {
        self.cmds.push(cmd);
        self
    }

    /// Pins the transaction to an explicit node.
    #[inline]
    pub fn on_node(mut self, node: NodeAddr) -> Self {
        self.node = Some(node);
        self
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    /// Returns true if no command was added.
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// The queued commands in order.
    pub fn commands(&self) -> &[Cmd] {
        &self.cmds
    }

    /// The explicitly pinned node, if any.
    pub fn node(&self) -> Option<&NodeAddr> {
        self.node.as_ref()
    }

    /// Slots touched by the keyed commands, in command order.
    pub(crate) fn slots(&self) -> Result<Vec<u16>> {
        if self.cmds.is_empty() {
            return Err(Error::InvalidArgument {
                message: "transaction has no commands".to_string(),
            });
        }
        let mut slots = Vec::new();
        for cmd in &self.cmds {
            match route_for(cmd) {
                Ok(Route::Slot(slot)) => slots.push(slot),
                Ok(Route::Any) => {}
                Err(Error::CrossSlot) => {
                    return Err(Error::TransactionAborted {
                        message: format!("{} keys map to different slots", cmd.name()),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(slots)
    }
}

/// Pins a transaction given the owner of each of its slots.
pub(crate) fn pin(owners: &[NodeAddr]) -> Result<Option<NodeAddr>> {
    let Some(first) = owners.first() else {
        return Ok(None);
    };
    if owners.iter().any(|owner| owner != first) {
        return Err(Error::TransactionAborted {
            message: "commands map to different nodes".to_string(),
        });
    }
    Ok(Some(first.clone()))
}

/// Combines the MULTI reply, the per-command acknowledgements and the EXEC
/// reply into the ordered sub-results.
///
/// A sub-command failing at execution time is an error frame at its
/// position; a command that failed to queue aborts the whole transaction.
pub(crate) fn collect(multi: Frame, queued: Vec<Frame>, exec: Frame) -> Result<Vec<Frame>> {
    if let Some(message) = multi.error_message() {
        return Err(Error::TransactionAborted { message });
    }
    if let Some((index, message)) = queued
        .iter()
        .enumerate()
        .find_map(|(i, reply)| reply.error_message().map(|m| (i, m)))
    {
        return Err(Error::TransactionAborted {
            message: format!("command {index} was not queued: {message}"),
        });
    }

    match exec {
        Frame::Array(results) if results.len() == queued.len() => Ok(results),
        Frame::Array(results) => Err(Error::Protocol {
            message: format!(
                "EXEC returned {} results for {} commands",
                results.len(),
                queued.len()
            ),
        }),
        Frame::Null | Frame::BulkString(None) => Err(Error::TransactionAborted {
            message: "transaction discarded because a watched key changed".to_string(),
        }),
        Frame::Error(e) => Err(Error::TransactionAborted {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        other => Err(Error::Protocol {
            message: format!("unexpected EXEC reply: {other:?}"),
        }),
    }
}
