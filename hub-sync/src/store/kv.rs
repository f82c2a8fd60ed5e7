//! Atomic-batch key-value persistence interface.
//!
//! The durable backend is an external collaborator; the engine only relies
//! on atomic multi-put / multi-delete across namespaces so that a merge or
//! a cascade is never partially visible after a crash. [`MemKv`] is the
//! in-memory implementation used by tests and ephemeral nodes.
//!
//! Key namespaces: `crdt/<name>/add/<conflict_key>`,
//! `crdt/<name>/remove/<conflict_key>`, `trie/<prefix>`, `fid/<id>`.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

/// Errors from the persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The backend detected corruption. Fatal: the hub halts.
    #[error("storage corruption: {0}")]
    Corruption(String),
    /// The backend is temporarily overloaded. Transient.
    #[error("store busy")]
    Busy,
}

/// Which set of a two-phase store a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    /// The add set.
    Add,
    /// The remove set.
    Remove,
}

impl SetKind {
    fn as_str(&self) -> &'static str {
        match self {
            SetKind::Add => "add",
            SetKind::Remove => "remove",
        }
    }
}

/// Storage key for a CRDT entry.
pub fn crdt_key(store: &str, set: SetKind, conflict_key: &[u8]) -> Vec<u8> {
    let mut key = format!("crdt/{store}/{}/", set.as_str()).into_bytes();
    key.extend_from_slice(conflict_key);
    key
}

/// Storage key for a trie leaf.
pub fn trie_key(sync_id: &[u8]) -> Vec<u8> {
    let mut key = b"trie/".to_vec();
    key.extend_from_slice(sync_id);
    key
}

/// Storage key for an fid custody record.
pub fn fid_key(fid: u64) -> Vec<u8> {
    format!("fid/{fid}").into_bytes()
}

/// An ordered set of writes applied atomically.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<Op>,
}

#[derive(Debug)]
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl Batch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(Op::Put(key, value));
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(Op::Delete(key));
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Abstraction over the durable backend.
pub trait Kv: Debug + Send + Sync + 'static {
    /// Apply all operations in the batch atomically.
    fn apply(&self, batch: Batch) -> Result<(), KvError>;

    /// Read a single key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Number of stored keys.
    fn len(&self) -> Result<usize, KvError>;

    /// Whether the store is empty.
    fn is_empty(&self) -> Result<bool, KvError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory [`Kv`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MemKv {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemKv {
    /// A new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for MemKv {
    fn apply(&self, batch: Batch) -> Result<(), KvError> {
        let mut map = self.map.write();
        for op in batch.ops {
            match op {
                Op::Put(key, value) => {
                    map.insert(key, value);
                }
                Op::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn len(&self) -> Result<usize, KvError> {
        Ok(self.map.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_apply() {
        let kv = MemKv::new();
        let mut batch = Batch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"a".to_vec());
        kv.apply(batch).unwrap();

        assert_eq!(kv.get(b"a").unwrap(), None);
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(kv.len().unwrap(), 1);
    }

    #[test]
    fn test_namespaced_keys() {
        assert_eq!(crdt_key("casts", SetKind::Add, b"k"), b"crdt/casts/add/k");
        assert_eq!(
            crdt_key("signers", SetKind::Remove, b"k"),
            b"crdt/signers/remove/k"
        );
        assert_eq!(trie_key(b"id"), b"trie/id");
        assert_eq!(fid_key(42), b"fid/42");
    }
}
