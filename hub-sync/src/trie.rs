//! The sync trie: a chronologically ordered Merkle trie over sync ids.
//!
//! Every message merged into a CRDT store is indexed here under its 36-byte
//! [`SyncId`]. The first ten bytes of a sync id are the message timestamp as
//! zero-padded ASCII decimal, so byte order equals chronological order and
//! an in-order walk of the trie yields messages oldest-first.
//!
//! The trie is a 256-ary byte trie. Each node carries the number of sync ids
//! below it and an aggregated digest: `H(sync_id)` at the leaves,
//! `H(label_0 || child_hash_0 || label_1 || child_hash_1 || ..)` with
//! children ordered by byte label at interior nodes. Two hubs hold the same message set iff their
//! root hashes agree, and a divergence can be localized by walking down
//! mismatching child digests.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};

use hub_core::keys::{Hash, InvalidLength};
use hub_core::proto::Message;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a sync id in bytes.
pub const SYNC_ID_LENGTH: usize = 36;

/// Length of the ASCII timestamp prefix of a sync id.
pub const TIMESTAMP_LENGTH: usize = 10;

/// Per-CRDT discriminator byte inside the sync id suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrieSet {
    /// Signer messages.
    Signer = 1,
    /// User data messages.
    UserData = 2,
    /// Cast messages.
    Cast = 3,
    /// Reaction messages.
    Reaction = 4,
    /// Verification messages.
    Verification = 5,
}

/// The 36-byte chronologically sortable identifier of a message.
///
/// Layout: `timestamp_decimal_ascii(10) || fid_be(8) || set(1) || hash[..17]`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncId([u8; SYNC_ID_LENGTH]);

impl SyncId {
    /// Build the sync id for a message in the given CRDT set.
    pub fn new(timestamp: u32, fid: u64, set: TrieSet, hash: &Hash) -> Self {
        let mut bytes = [0u8; SYNC_ID_LENGTH];
        let ts = format!("{timestamp:010}");
        bytes[..TIMESTAMP_LENGTH].copy_from_slice(ts.as_bytes());
        bytes[10..18].copy_from_slice(&fid.to_be_bytes());
        bytes[18] = set as u8;
        bytes[19..].copy_from_slice(&hash.as_bytes()[..17]);
        SyncId(bytes)
    }

    /// The sync id of a message, given the set its store belongs to.
    pub fn of(message: &Message, set: TrieSet) -> Self {
        SyncId::new(message.timestamp(), message.fid(), set, &message.hash20())
    }

    /// Byte representation.
    pub const fn as_bytes(&self) -> &[u8; SYNC_ID_LENGTH] {
        &self.0
    }

    /// Create from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidLength> {
        let bytes: [u8; SYNC_ID_LENGTH] = bytes.try_into().map_err(|_| InvalidLength {
            expected: SYNC_ID_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(SyncId(bytes))
    }

    /// The embedded timestamp.
    pub fn timestamp(&self) -> u32 {
        std::str::from_utf8(&self.0[..TIMESTAMP_LENGTH])
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// The embedded fid.
    pub fn fid(&self) -> u64 {
        u64::from_be_bytes(self.0[10..18].try_into().expect("8 bytes"))
    }

    /// The embedded set discriminator byte.
    pub fn set_byte(&self) -> u8 {
        self.0[18]
    }

    /// The truncated message hash embedded in the suffix.
    pub fn hash_prefix(&self) -> &[u8] {
        &self.0[19..]
    }
}

impl AsRef<[u8]> for SyncId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncId({})", hex::encode(self.0))
    }
}

impl Serialize for SyncId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for SyncId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor;
        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = SyncId;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{SYNC_ID_LENGTH} bytes")
            }
            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<SyncId, E> {
                SyncId::from_slice(v).map_err(de::Error::custom)
            }
            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<SyncId, A::Error> {
                let mut bytes = Vec::with_capacity(SYNC_ID_LENGTH);
                while let Some(byte) = seq.next_element()? {
                    bytes.push(byte);
                }
                SyncId::from_slice(&bytes).map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_bytes(BytesVisitor)
    }
}

/// Metadata of a trie node, recursive to depth 1 unless flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Path from the root to this node.
    pub prefix: Vec<u8>,
    /// Number of sync ids below this node.
    pub num_messages: usize,
    /// Aggregated digest of this node.
    pub hash: Hash,
    /// Metadata of the direct children, with empty `children` themselves.
    pub children: Vec<NodeMetadata>,
}

/// An exclusion-set snapshot of the rightmost (newest) path under a prefix.
///
/// `excluded_hashes[i]` digests all children at level `i` of the rightmost
/// path other than the rightmost child itself, combined in ascending byte
/// label order; the digest of an empty sibling set is the all-zero hash.
/// Comparing two snapshots level by level locates the divergence point
/// between two hubs without transferring either trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieSnapshot {
    /// The prefix the snapshot was taken under.
    pub prefix: Vec<u8>,
    /// Combined non-rightmost sibling digests, one per level.
    pub excluded_hashes: Vec<Hash>,
    /// Number of sync ids below the prefix.
    pub num_messages: usize,
    /// Root hash of the whole trie at observation time.
    pub root_hash: Hash,
}

#[derive(Debug, Clone, Default)]
struct Node {
    children: BTreeMap<u8, Node>,
    leaf: Option<SyncId>,
    count: usize,
    hash: Hash,
}

impl Node {
    fn recompute_hash(&mut self) {
        if let Some(id) = &self.leaf {
            self.hash = Hash::new(id.as_bytes());
        } else if self.children.is_empty() {
            self.hash = Hash::zero();
        } else {
            let mut concat = Vec::with_capacity(self.children.len() * 21);
            for (label, child) in self.children.iter() {
                concat.push(*label);
                concat.extend_from_slice(child.hash.as_bytes());
            }
            self.hash = Hash::new(concat);
        }
    }

    fn insert(&mut self, id: SyncId, depth: usize) -> bool {
        if depth == SYNC_ID_LENGTH {
            if self.leaf.is_some() {
                return false;
            }
            self.leaf = Some(id);
            self.count = 1;
            self.recompute_hash();
            return true;
        }
        let byte = id.as_bytes()[depth];
        let child = self.children.entry(byte).or_default();
        let inserted = child.insert(id, depth + 1);
        if inserted {
            self.count += 1;
            self.recompute_hash();
        }
        inserted
    }

    fn remove(&mut self, id: &SyncId, depth: usize) -> bool {
        if depth == SYNC_ID_LENGTH {
            if self.leaf.take().is_none() {
                return false;
            }
            self.count = 0;
            self.recompute_hash();
            return true;
        }
        let byte = id.as_bytes()[depth];
        let Some(child) = self.children.get_mut(&byte) else {
            return false;
        };
        let removed = child.remove(id, depth + 1);
        if removed {
            if child.count == 0 {
                self.children.remove(&byte);
            }
            self.count -= 1;
            self.recompute_hash();
        }
        removed
    }

    fn walk(&self, path: &[u8]) -> Option<&Node> {
        let mut node = self;
        for byte in path {
            node = node.children.get(byte)?;
        }
        Some(node)
    }

    fn collect_leaves(&self, out: &mut Vec<SyncId>) {
        if let Some(id) = &self.leaf {
            out.push(*id);
        }
        for child in self.children.values() {
            child.collect_leaves(out);
        }
    }
}

/// The sync trie over all merged messages.
#[derive(Debug, Clone, Default)]
pub struct SyncTrie {
    root: Node,
}

impl SyncTrie {
    /// A new, empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sync id. Returns false if it was already present.
    pub fn insert(&mut self, id: SyncId) -> bool {
        self.root.insert(id, 0)
    }

    /// Remove a sync id. Returns false if it was not present.
    pub fn remove(&mut self, id: &SyncId) -> bool {
        self.root.remove(id, 0)
    }

    /// Whether the sync id is present.
    pub fn contains(&self, id: &SyncId) -> bool {
        self.root.walk(id.as_bytes()).is_some_and(|n| n.leaf.is_some())
    }

    /// Number of sync ids in the trie.
    pub fn len(&self) -> usize {
        self.root.count
    }

    /// Whether the trie is empty.
    pub fn is_empty(&self) -> bool {
        self.root.count == 0
    }

    /// The aggregated digest of the whole trie; the zero hash when empty.
    pub fn root_hash(&self) -> Hash {
        self.root.hash
    }

    /// All sync ids under a prefix, in chronological order.
    pub fn leaves_by_prefix(&self, prefix: &[u8]) -> Vec<SyncId> {
        let mut out = Vec::new();
        if let Some(node) = self.root.walk(prefix) {
            node.collect_leaves(&mut out);
        }
        out
    }

    /// The bytes of the rightmost (newest) path below a prefix, not
    /// including the prefix itself. Empty when the prefix has no subtree.
    pub fn rightmost_path(&self, prefix: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let Some(mut node) = self.root.walk(prefix) else {
            return out;
        };
        while let Some((byte, child)) = node.children.iter().next_back() {
            out.push(*byte);
            node = child;
        }
        out
    }

    /// Metadata for the node at a prefix, with direct children included.
    pub fn metadata(&self, prefix: &[u8]) -> Option<NodeMetadata> {
        let node = self.root.walk(prefix)?;
        let children = node
            .children
            .iter()
            .map(|(byte, child)| {
                let mut child_prefix = prefix.to_vec();
                child_prefix.push(*byte);
                NodeMetadata {
                    prefix: child_prefix,
                    num_messages: child.count,
                    hash: child.hash,
                    children: Vec::new(),
                }
            })
            .collect();
        Some(NodeMetadata {
            prefix: prefix.to_vec(),
            num_messages: node.count,
            hash: node.hash,
            children,
        })
    }

    /// Exclusion-set snapshot of the rightmost path under a prefix.
    ///
    /// Returns an empty exclusion set when the prefix has no subtree.
    pub fn snapshot(&self, prefix: &[u8]) -> TrieSnapshot {
        let mut excluded_hashes = Vec::new();
        let mut num_messages = 0;
        if let Some(mut node) = self.root.walk(prefix) {
            num_messages = node.count;
            while !node.children.is_empty() {
                let rightmost = *node.children.keys().next_back().expect("not empty");
                let mut concat = Vec::new();
                for (byte, child) in node.children.iter() {
                    if *byte != rightmost {
                        concat.extend_from_slice(child.hash.as_bytes());
                    }
                }
                let excluded = if concat.is_empty() {
                    Hash::zero()
                } else {
                    Hash::new(concat)
                };
                excluded_hashes.push(excluded);
                node = node.children.get(&rightmost).expect("rightmost child");
            }
        }
        TrieSnapshot {
            prefix: prefix.to_vec(),
            excluded_hashes,
            num_messages,
            root_hash: self.root_hash(),
        }
    }
}
