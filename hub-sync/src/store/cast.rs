//! The cast store.
//!
//! Two-phase set over `CastAdd` / `CastRemove`. The conflict key is the
//! hash of the cast itself: its own message hash for an add, the targeted
//! hash for a remove. Unlike the other stores, a remove out-ranks an add
//! regardless of timestamps, so a removed cast can never be re-added with
//! a fresher copy. The removed add's body is dropped entirely; only the
//! remove tombstone (which carries nothing but the target hash) stays in
//! the remove set.

use hub_core::keys::Hash;
use hub_core::proto::{Body, Message, MessageType};

use super::{fid_prefix, MessageSet, SetKind, StorePolicy};
use crate::trie::TrieSet;

/// Policy for the cast CRDT.
#[derive(Debug, Clone, Copy)]
pub struct CastPolicy;

impl StorePolicy for CastPolicy {
    const NAME: &'static str = "casts";
    const TRIE_SET: TrieSet = TrieSet::Cast;
    const REMOVE_WINS_FIRST: bool = true;

    fn set_kind(typ: MessageType) -> Option<SetKind> {
        match typ {
            MessageType::CastAdd => Some(SetKind::Add),
            MessageType::CastRemove => Some(SetKind::Remove),
            _ => None,
        }
    }

    fn conflict_key(message: &Message) -> Option<Vec<u8>> {
        let data = message.data.as_ref()?;
        match &data.body {
            Some(Body::CastAddBody(_)) => Some(conflict_key(data.fid, &message.hash)),
            Some(Body::CastRemoveBody(body)) => Some(conflict_key(data.fid, &body.target_hash)),
            _ => None,
        }
    }
}

/// Conflict key for a cast entry.
pub fn conflict_key(fid: u64, cast_hash: &[u8]) -> Vec<u8> {
    let mut key = fid_prefix(fid).to_vec();
    key.extend_from_slice(cast_hash);
    key
}

/// The cast CRDT.
pub type CastStore = MessageSet<CastPolicy>;

impl CastStore {
    /// Look up a cast by author and hash.
    pub fn get_cast(&self, fid: u64, hash: &Hash) -> Option<&Message> {
        self.get_add(&conflict_key(fid, hash.as_bytes()))
    }

    /// All casts by an author, without tombstones.
    pub fn casts_by_fid(&self, fid: u64) -> Vec<&Message> {
        self.adds_by_fid(fid).collect()
    }
}

#[cfg(test)]
mod tests {
    use hub_test::factory;

    use super::*;
    use crate::store::{SetLimits, StoreError};

    const NOW: u64 = 1_000_000;

    #[test]
    fn test_remove_wins_regardless_of_timestamp() {
        let signer = factory::signer();
        let mut store = CastStore::new(SetLimits::capacity(100));

        let add = factory::cast_add(1, "hello", 2_000, &signer);
        let add_hash = add.hash20();
        store.merge(add.clone(), NOW).unwrap();
        assert!(store.get_cast(1, &add_hash).is_some());

        // The remove is older than the add and still wins.
        let remove = factory::cast_remove(1, add_hash, 1_500, &signer);
        store.merge(remove, NOW).unwrap();
        assert!(store.get_cast(1, &add_hash).is_none());

        // Re-submitting the add is refused by the tombstone.
        assert!(matches!(store.merge(add, NOW), Err(StoreError::Conflict)));
    }

    #[test]
    fn test_newer_remove_replaces_older_remove() {
        let signer = factory::signer();
        let mut store = CastStore::new(SetLimits::capacity(100));
        let target = Hash::new(b"some cast");

        let old = factory::cast_remove(1, target, 1_000, &signer);
        let new = factory::cast_remove(1, target, 2_000, &signer);
        store.merge(old.clone(), NOW).unwrap();
        store.merge(new, NOW).unwrap();
        assert!(matches!(store.merge(old, NOW), Err(StoreError::Conflict)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_distinct_casts_do_not_conflict() {
        let signer = factory::signer();
        let mut store = CastStore::new(SetLimits::capacity(100));

        store.merge(factory::cast_add(1, "one", 1_000, &signer), NOW).unwrap();
        store.merge(factory::cast_add(1, "two", 1_000, &signer), NOW).unwrap();
        assert_eq!(store.casts_by_fid(1).len(), 2);
    }

    #[test]
    fn test_ttl_rejects_and_prunes() {
        let signer = factory::signer();
        let one_day = 24 * 60 * 60 * 1_000;
        let mut store = CastStore::new(SetLimits {
            capacity: Some(100),
            ttl_ms: Some(one_day),
        });

        // Too old to merge at all.
        let stale = factory::cast_add(1, "stale", 100, &signer);
        assert!(matches!(
            store.merge(stale, 2 * one_day),
            Err(StoreError::Expired)
        ));

        // Merged fresh, swept once it ages out.
        let fresh = factory::cast_add(1, "fresh", 1_000, &signer);
        store.merge(fresh, 2_000).unwrap();
        assert_eq!(store.len(), 1);
        let evicted = store.enforce_bounds(one_day + 2_000);
        assert_eq!(evicted.len(), 1);
        assert!(store.is_empty());
    }
}
