//! Cluster management commands and key extraction.
//!
//! Provides the builders used for topology discovery and redirect
//! handling, and [`command_keys`], which finds the key arguments of a
//! command so it can be routed by slot.

use bytes::Bytes;

use crate::core::command::Cmd;

/// Creates a CLUSTER SLOTS command.
///
/// The reply lists slot ranges with their primary and replica nodes.
pub fn cluster_slots() -> Cmd {
    Cmd::new("CLUSTER").arg("SLOTS")
}

/// Creates a CLUSTER NODES command.
///
/// The reply is one text line per node with its id, address, flags,
/// primary and served slots.
pub fn cluster_nodes() -> Cmd {
    Cmd::new("CLUSTER").arg("NODES")
}

/// Creates an ASKING command.
///
/// Sent before retrying a command that received an ASK redirect. The flag
/// only affects the immediately following command.
pub fn asking() -> Cmd {
    Cmd::new("ASKING")
}

/// Commands that carry no key and can run on any primary.
const KEYLESS: &[&str] = &[
    "PING",
    "ECHO",
    "DBSIZE",
    "INFO",
    "CLUSTER",
    "ASKING",
    "AUTH",
    "SELECT",
    "FLUSHALL",
    "FLUSHDB",
    "KEYS",
    "SCAN",
    "RANDOMKEY",
    "TIME",
    "CONFIG",
    "CLIENT",
    "COMMAND",
    "LASTSAVE",
    "SCRIPT",
];

/// Commands whose every argument after the name is a key.
const ALL_KEYS: &[&str] = &[
    "DEL", "EXISTS", "UNLINK", "TOUCH", "MGET", "SUNION", "SINTER", "SDIFF", "PFCOUNT", "WATCH",
];

/// Commands taking alternating key/value pairs.
const KEY_VALUE_PAIRS: &[&str] = &["MSET", "MSETNX"];

/// Commands that only make sense inside a pinned transaction.
pub(crate) const TRANSACTION_CONTROL: &[&str] = &["MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH"];

/// Returns the key arguments of `cmd`.
///
/// An empty result means the command is node-agnostic. Unknown commands
/// are assumed to take their key as the first argument.
pub fn command_keys(cmd: &Cmd) -> Vec<&Bytes> {
    let name = cmd.name();
    let args = &cmd.args()[1..];

    if KEYLESS.contains(&name.as_str()) {
        return Vec::new();
    }
    if ALL_KEYS.contains(&name.as_str()) {
        return args.iter().collect();
    }
    if KEY_VALUE_PAIRS.contains(&name.as_str()) {
        return args.iter().step_by(2).collect();
    }
    if name == "EVAL" || name == "EVALSHA" || name == "FCALL" {
        let numkeys = args
            .get(1)
            .and_then(|n| std::str::from_utf8(n).ok())
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        return args.iter().skip(2).take(numkeys).collect();
    }
    args.first().into_iter().collect()
}
