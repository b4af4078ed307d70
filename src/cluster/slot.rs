//! Hash slot calculation and the slot-to-node map.
//!
//! Redis Cluster maps every key to one of 16384 slots with CRC16 (XMODEM)
//! modulo 16384. A [`SlotMap`] records which primary owns each slot.

use crc::{Crc, CRC_16_XMODEM};

use crate::cluster::topology::NodeAddr;

/// Number of hash slots in Redis Cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC-16/XMODEM algorithm used by Redis.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the cluster slot for a key.
///
/// If the key contains `{...}` with a non-empty body, only that body is
/// hashed (hash tags), so related keys can be colocated.
///
/// # Examples
///
/// ```
/// use clustermux::key_slot;
///
/// assert_eq!(key_slot("foo"), 12182);
/// assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
/// assert_eq!(key_slot(b"bar".as_slice()), 5061);
/// ```
pub fn key_slot<K: AsRef<[u8]> + ?Sized>(key: &K) -> u16 {
    let hash_key = extract_hash_tag(key.as_ref());
    CRC16.checksum(hash_key) % SLOT_COUNT
}

/// Extracts the hash tag from a key.
///
/// - `{user1000}.following` → `user1000`
/// - `foo{bar}{baz}` → `bar` (first `{`, first `}` after it)
/// - `foo{}bar` → whole key (empty tag)
/// - `foo` → whole key
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Owner of every hash slot, or `None` where the owner is unknown.
///
/// A map is built complete from a topology reply and then shared through an
/// `Arc`; dispatch reads a snapshot while a refresh builds and swaps in a
/// new map. Single-slot corrections go through `Arc::make_mut`, so readers
/// holding the old snapshot never see the change.
#[derive(Debug, Clone)]
pub struct SlotMap {
    owners: Vec<Option<usize>>,
    nodes: Vec<NodeAddr>,
    version: u64,
}

impl SlotMap {
    /// Creates a map where every slot is unknown.
    pub fn empty() -> Self {
        Self {
            owners: vec![None; SLOT_COUNT as usize],
            nodes: Vec::new(),
            version: 0,
        }
    }

    /// Returns the owner of `slot`, or `None` if unknown.
    pub fn node_for_slot(&self, slot: u16) -> Option<&NodeAddr> {
        self.owners
            .get(slot as usize)
            .copied()
            .flatten()
            .map(|index| &self.nodes[index])
    }

    /// Reassigns one slot and bumps the version.
    ///
    /// A node left without slots is dropped from the owner list.
    pub fn assign(&mut self, slot: u16, addr: &NodeAddr) {
        if slot >= SLOT_COUNT {
            return;
        }
        let index = self.intern(addr);
        let previous = self.owners[slot as usize].replace(index);
        self.version += 1;
        if let Some(previous) = previous.filter(|p| *p != index) {
            if !self.owners.contains(&Some(previous)) {
                self.release(previous);
            }
        }
    }

    pub(crate) fn assign_range(&mut self, start: u16, end: u16, addr: &NodeAddr) {
        let index = self.intern(addr);
        let end = end.min(SLOT_COUNT - 1);
        for owner in &mut self.owners[start as usize..=end as usize] {
            *owner = Some(index);
        }
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Monotonic version; every refresh or correction increases it.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns true if every slot has an owner.
    pub fn is_fully_covered(&self) -> bool {
        self.owners.iter().all(Option::is_some)
    }

    /// Number of slots with a known owner.
    pub fn covered_slots(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }

    /// Returns true if `addr` owns at least one slot.
    pub fn owns_any(&self, addr: &NodeAddr) -> bool {
        match self.nodes.iter().position(|n| n == addr) {
            Some(index) => self.owners.contains(&Some(index)),
            None => false,
        }
    }

    /// Distinct nodes owning at least one slot.
    pub fn nodes(&self) -> &[NodeAddr] {
        &self.nodes
    }

    /// Removes an owner no slot refers to; the last owner takes its index.
    fn release(&mut self, index: usize) {
        let last = self.nodes.len() - 1;
        self.nodes.swap_remove(index);
        if index != last {
            for owner in self.owners.iter_mut().filter(|o| **o == Some(last)) {
                *owner = Some(index);
            }
        }
    }

    fn intern(&mut self, addr: &NodeAddr) -> usize {
        match self.nodes.iter().position(|n| n == addr) {
            Some(index) => index,
            None => {
                self.nodes.push(addr.clone());
                self.nodes.len() - 1
            }
        }
    }
}

impl Default for SlotMap {
    fn default() -> Self {
        Self::empty()
    }
}
