//! In-process fake cluster speaking RESP over real TCP.
//!
//! Every node listens on its own loopback port and is served by plain
//! threads, so both the blocking and the event-loop clients can use it.
//! The nodes share one key space; ownership only decides who answers and
//! who redirects.
//!
//! Threads and `std::net` rather than a tokio server: the blocking client
//! runs on the test thread and needs a server that keeps serving without a
//! runtime.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use clustermux::proto::codec::{Decoder, Encoder};
use clustermux::{key_slot, Frame, NodeAddr};

const SLOTS: usize = 16384;

struct State {
    ports: Vec<u16>,
    owners: Vec<usize>,
    migrating: HashMap<u16, usize>,
    bouncing: HashSet<u16>,
    data: HashMap<Vec<u8>, Vec<u8>>,
    down: Vec<bool>,
    stalled: Vec<bool>,
    received: Vec<usize>,
    topology_queries: usize,
    password: Option<String>,
}

#[derive(Default)]
struct Session {
    authed: bool,
    asking: bool,
    multi: Option<Vec<Vec<Vec<u8>>>>,
    multi_failed: bool,
}

/// Handle to a running fake cluster. Nodes live until the test process
/// exits.
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    /// Starts `nodes` primaries splitting the slots evenly.
    pub fn start(nodes: usize) -> Self {
        Self::spawn(nodes, None)
    }

    /// Starts a cluster whose nodes require AUTH.
    pub fn with_password(nodes: usize, password: &str) -> Self {
        Self::spawn(nodes, Some(password.to_string()))
    }

    fn spawn(nodes: usize, password: Option<String>) -> Self {
        let listeners: Vec<TcpListener> = (0..nodes)
            .map(|_| TcpListener::bind("127.0.0.1:0").expect("bind fake node"))
            .collect();
        let ports = listeners
            .iter()
            .map(|l| l.local_addr().expect("local addr").port())
            .collect();
        let state = Arc::new(Mutex::new(State {
            ports,
            owners: (0..SLOTS).map(|slot| slot * nodes / SLOTS).collect(),
            migrating: HashMap::new(),
            bouncing: HashSet::new(),
            data: HashMap::new(),
            down: vec![false; nodes],
            stalled: vec![false; nodes],
            received: vec![0; nodes],
            topology_queries: 0,
            password,
        }));

        for (index, listener) in listeners.into_iter().enumerate() {
            let state = Arc::clone(&state);
            thread::spawn(move || accept_loop(index, listener, state));
        }
        Self { state }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster state poisoned")
    }

    /// Comma-separated seed list.
    pub fn seeds(&self) -> String {
        self.lock()
            .ports
            .iter()
            .map(|port| format!("127.0.0.1:{port}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Address of node `index`.
    pub fn addr(&self, index: usize) -> NodeAddr {
        NodeAddr::new("127.0.0.1", self.lock().ports[index])
    }

    /// Node owning `key` right now.
    pub fn owner_of(&self, key: &str) -> usize {
        self.lock().owners[key_slot(key) as usize]
    }

    /// Reassigns a slot without telling clients.
    pub fn move_slot(&self, slot: u16, to: usize) {
        self.lock().owners[slot as usize] = to;
    }

    /// Starts migrating a slot: the owner answers ASK for keys it lacks.
    pub fn migrate_slot(&self, slot: u16, to: usize) {
        self.lock().migrating.insert(slot, to);
    }

    /// Makes every node answer MOVED to its neighbour for `slot`.
    pub fn bounce_slot(&self, slot: u16) {
        self.lock().bouncing.insert(slot);
    }

    /// Takes node `from` down and hands its slots to `to`.
    pub fn fail_over(&self, from: usize, to: usize) {
        let mut state = self.lock();
        state.down[from] = true;
        for owner in state.owners.iter_mut() {
            if *owner == from {
                *owner = to;
            }
        }
    }

    /// Makes a node drop its connections, or serve again.
    pub fn set_down(&self, index: usize, down: bool) {
        self.lock().down[index] = down;
    }

    /// Makes a node read commands without ever answering, or answer again.
    pub fn stall(&self, index: usize, stalled: bool) {
        self.lock().stalled[index] = stalled;
    }

    /// Keyed commands node `index` received, redirected ones included.
    pub fn received(&self, index: usize) -> usize {
        self.lock().received[index]
    }

    /// CLUSTER SLOTS / CLUSTER NODES queries answered.
    pub fn topology_queries(&self) -> usize {
        self.lock().topology_queries
    }

    /// Stores a value directly.
    pub fn insert(&self, key: &str, value: &str) {
        self.lock()
            .data
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
    }

    /// Reads a value directly.
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key.as_bytes()).cloned()
    }
}

fn accept_loop(index: usize, listener: TcpListener, state: Arc<Mutex<State>>) {
    for stream in listener.incoming() {
        let Ok(stream) = stream else {
            continue;
        };
        if state.lock().map(|s| s.down[index]).unwrap_or(true) {
            drop(stream);
            continue;
        }
        let state = Arc::clone(&state);
        thread::spawn(move || serve(index, stream, state));
    }
}

fn serve(index: usize, mut stream: TcpStream, state: Arc<Mutex<State>>) {
    let mut session = Session::default();
    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let Ok(mut guard) = state.lock() else {
            return;
        };
        if guard.down[index] {
            return;
        }
        if guard.stalled[index] {
            continue;
        }
        decoder.append(&buf[..n]);
        while let Ok(Some(frame)) = decoder.decode() {
            let reply = guard.handle(index, &mut session, frame);
            encoder.encode(&reply);
        }
        drop(guard);

        if stream.write_all(&encoder.take()).is_err() {
            return;
        }
    }
}

fn simple(text: &str) -> Frame {
    Frame::SimpleString(text.as_bytes().to_vec())
}

fn error(text: impl Into<String>) -> Frame {
    Frame::Error(text.into().into_bytes())
}

fn node_id(index: usize) -> String {
    format!("{:040x}", index + 1)
}

impl State {
    fn handle(&mut self, me: usize, session: &mut Session, frame: Frame) -> Frame {
        let args: Vec<Vec<u8>> = match frame {
            Frame::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Frame::BulkString(Some(bytes)) => Some(bytes.to_vec()),
                    _ => None,
                })
                .collect(),
            _ => return error("ERR Protocol error"),
        };
        let Some(name) = args.first() else {
            return error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();

        if name == "AUTH" {
            let given = args.last().map(|p| String::from_utf8_lossy(p).into_owned());
            return match &self.password {
                Some(password) if given.as_ref() == Some(password) => {
                    session.authed = true;
                    simple("OK")
                }
                Some(_) => error("WRONGPASS invalid username-password pair"),
                None => error("ERR AUTH called without any password configured"),
            };
        }
        if self.password.is_some() && !session.authed {
            return error("NOAUTH Authentication required.");
        }

        match name.as_str() {
            "PING" => simple("PONG"),
            "ASKING" => {
                session.asking = true;
                simple("OK")
            }
            "CLUSTER" => self.cluster(me, &args),
            "MULTI" => {
                session.multi = Some(Vec::new());
                session.multi_failed = false;
                simple("OK")
            }
            "DISCARD" => {
                session.multi = None;
                simple("OK")
            }
            "EXEC" => match session.multi.take() {
                None => error("ERR EXEC without MULTI"),
                Some(_) if session.multi_failed => {
                    error("EXECABORT Transaction discarded because of previous errors.")
                }
                Some(queued) => Frame::Array(
                    queued
                        .into_iter()
                        .map(|cmd| self.execute(&cmd))
                        .collect(),
                ),
            },
            "DBSIZE" => {
                let count = self
                    .data
                    .keys()
                    .filter(|key| self.owners[key_slot(key.as_slice()) as usize] == me)
                    .count();
                Frame::Integer(count as i64)
            }
            _ => {
                let asking = std::mem::take(&mut session.asking);
                self.received[me] += 1;
                if let Some(redirect) = self.redirect(me, &args, asking) {
                    if session.multi.is_some() {
                        session.multi_failed = true;
                    }
                    return redirect;
                }
                if let Some(queued) = session.multi.as_mut() {
                    queued.push(args);
                    return simple("QUEUED");
                }
                self.execute(&args)
            }
        }
    }

    fn redirect(&self, me: usize, args: &[Vec<u8>], asking: bool) -> Option<Frame> {
        let key = args.get(1)?;
        let slot = key_slot(key.as_slice());
        if self.bouncing.contains(&slot) {
            let next = (me + 1) % self.ports.len();
            return Some(error(format!("MOVED {slot} 127.0.0.1:{}", self.ports[next])));
        }
        let owner = self.owners[slot as usize];
        if owner == me {
            return match self.migrating.get(&slot) {
                Some(&target) if !self.data.contains_key(key) => Some(error(format!(
                    "ASK {slot} 127.0.0.1:{}",
                    self.ports[target]
                ))),
                _ => None,
            };
        }
        if asking && self.migrating.get(&slot) == Some(&me) {
            return None;
        }
        Some(error(format!("MOVED {slot} 127.0.0.1:{}", self.ports[owner])))
    }

    fn execute(&mut self, args: &[Vec<u8>]) -> Frame {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let keys = &args[1..];
        match (name.as_str(), keys) {
            ("GET", [key]) => match self.data.get(key) {
                Some(value) => Frame::bulk(value.clone()),
                None => Frame::BulkString(None),
            },
            ("SET", [key, value]) => {
                self.data.insert(key.clone(), value.clone());
                simple("OK")
            }
            ("DEL", keys) if !keys.is_empty() => {
                let removed = keys.iter().filter(|k| self.data.remove(*k).is_some()).count();
                Frame::Integer(removed as i64)
            }
            ("EXISTS", keys) if !keys.is_empty() => {
                let found = keys.iter().filter(|k| self.data.contains_key(*k)).count();
                Frame::Integer(found as i64)
            }
            ("INCR", [key]) => {
                let current = match self.data.get(key) {
                    Some(value) => match String::from_utf8_lossy(value).parse::<i64>() {
                        Ok(n) => n,
                        Err(_) => return error("ERR value is not an integer or out of range"),
                    },
                    None => 0,
                };
                let next = current + 1;
                self.data.insert(key.clone(), next.to_string().into_bytes());
                Frame::Integer(next)
            }
            ("MGET", keys) if !keys.is_empty() => Frame::Array(
                keys.iter()
                    .map(|k| match self.data.get(k) {
                        Some(value) => Frame::bulk(value.clone()),
                        None => Frame::BulkString(None),
                    })
                    .collect(),
            ),
            ("GET" | "SET" | "DEL" | "EXISTS" | "INCR" | "MGET", _) => {
                error(format!("ERR wrong number of arguments for '{}' command", name.to_lowercase()))
            }
            _ => error(format!("ERR unknown command '{name}'")),
        }
    }

    fn cluster(&mut self, me: usize, args: &[Vec<u8>]) -> Frame {
        let sub = args
            .get(1)
            .map(|s| String::from_utf8_lossy(s).to_ascii_uppercase())
            .unwrap_or_default();
        match sub.as_str() {
            "SLOTS" => {
                self.topology_queries += 1;
                let ranges = self
                    .ranges()
                    .into_iter()
                    .map(|(start, end, owner)| {
                        Frame::Array(vec![
                            Frame::Integer(start as i64),
                            Frame::Integer(end as i64),
                            Frame::Array(vec![
                                Frame::bulk("127.0.0.1"),
                                Frame::Integer(self.ports[owner] as i64),
                                Frame::bulk(node_id(owner)),
                            ]),
                        ])
                    })
                    .collect();
                Frame::Array(ranges)
            }
            "NODES" => {
                self.topology_queries += 1;
                let ranges = self.ranges();
                let mut text = String::new();
                for (index, port) in self.ports.iter().enumerate() {
                    if self.down[index] {
                        continue;
                    }
                    let flags = if index == me { "myself,master" } else { "master" };
                    let slots: Vec<String> = ranges
                        .iter()
                        .filter(|(_, _, owner)| *owner == index)
                        .map(|(start, end, _)| {
                            if start == end {
                                start.to_string()
                            } else {
                                format!("{start}-{end}")
                            }
                        })
                        .collect();
                    text.push_str(&format!(
                        "{} 127.0.0.1:{port}@{} {flags} - 0 0 {} connected {}\n",
                        node_id(index),
                        *port as u32 + 10000,
                        index + 1,
                        slots.join(" ")
                    ));
                }
                Frame::bulk(text)
            }
            _ => error("ERR unknown subcommand"),
        }
    }

    /// Contiguous `(start, end, owner)` runs.
    fn ranges(&self) -> Vec<(usize, usize, usize)> {
        let mut out = Vec::new();
        let mut start = 0;
        for slot in 1..=SLOTS {
            if slot == SLOTS || self.owners[slot] != self.owners[start] {
                out.push((start, slot - 1, self.owners[start]));
                start = slot;
            }
        }
        out
    }
}
