//! CRDT message stores.
//!
//! Each store is a two-phase set of messages keyed by a CRDT-specific
//! conflict key, with per-CRDT tie-breaking, capacity bounds, TTL pruning
//! and a bounded log of evicted entries that keeps capacity evictions
//! permanent. [`MessageSet`] implements the generic merge; the per-CRDT
//! behavior is supplied by a [`StorePolicy`].
//!
//! Merges here assume the message has already passed validation and
//! authorization; the engine enforces that ordering.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::marker::PhantomData;
use std::ops::Bound;

use hub_core::keys::Hash;
use hub_core::proto::{Message, MessageType};
use hub_core::time;

pub mod cast;
pub mod kv;
pub mod reaction;
pub mod signer;
pub mod user_data;
pub mod verification;

pub use self::kv::SetKind;
use crate::trie::TrieSet;

/// Why a store refused a message. These are rejections: the message can
/// never merge into this store state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// An existing message with the same conflict key out-ranks this one.
    #[error("message loses conflict to an existing message")]
    Conflict,
    /// The message matches or precedes an entry in the evicted log.
    #[error("message would re-admit an evicted message")]
    Evicted,
    /// The message is older than the store's time to live.
    #[error("message exceeds the store ttl")]
    Expired,
    /// The message type does not belong to this store.
    #[error("message type not accepted by the {0} store")]
    WrongStore(&'static str),
    /// The message has no payload or an unusable body.
    #[error("malformed message")]
    Malformed,
}

/// Capacity and TTL bounds for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SetLimits {
    /// Maximum number of messages across both sets, unbounded when absent.
    pub capacity: Option<usize>,
    /// Maximum message age in milliseconds, unbounded when absent.
    pub ttl_ms: Option<u64>,
}

impl SetLimits {
    /// Bounded capacity without a TTL.
    pub fn capacity(capacity: usize) -> Self {
        SetLimits {
            capacity: Some(capacity),
            ttl_ms: None,
        }
    }

    /// Neither capacity nor TTL bound.
    pub fn unbounded() -> Self {
        SetLimits {
            capacity: None,
            ttl_ms: None,
        }
    }
}

/// Per-CRDT configuration of the generic two-phase set.
pub trait StorePolicy {
    /// Store name, used in storage keys and log lines.
    const NAME: &'static str;

    /// Sync id discriminator for messages of this store.
    const TRIE_SET: TrieSet;

    /// When true, a remove out-ranks an add before timestamps are compared
    /// (the cast rule); otherwise timestamps are compared first.
    const REMOVE_WINS_FIRST: bool = false;

    /// Which set a message type belongs to, `None` if it is foreign to this
    /// store.
    fn set_kind(typ: MessageType) -> Option<SetKind>;

    /// The conflict key of a message. Must start with the fid in big-endian
    /// so that per-fid range scans work. `None` when the body is unusable.
    fn conflict_key(message: &Message) -> Option<Vec<u8>>;
}

/// Key prefix helper: the big-endian fid all conflict keys start with.
pub(crate) fn fid_prefix(fid: u64) -> [u8; 8] {
    fid.to_be_bytes()
}

fn fid_bounds(fid: u64) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = fid_prefix(fid).to_vec();
    let end = match fid.checked_add(1) {
        Some(next) => Bound::Excluded(fid_prefix(next).to_vec()),
        None => Bound::Unbounded,
    };
    (Bound::Included(start), end)
}

/// A successful merge.
#[derive(Debug, Clone)]
pub struct Merged {
    /// The set the message landed in.
    pub set: SetKind,
    /// Messages displaced by this merge: the conflict loser and any
    /// capacity or TTL evictions.
    pub evicted: Vec<Message>,
}

/// Outcome of [`MessageSet::merge`].
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// The message was inserted.
    Merged(Merged),
    /// The exact message is already present; merging is idempotent.
    Noop,
}

/// Bounded log of capacity-evicted entries, keyed by conflict key.
///
/// Re-admitting a capacity-evicted message would let state diverge between
/// hubs that did and did not observe the eviction, so merges consult this
/// log and refuse anything that does not strictly out-rank its entry.
#[derive(Debug, Default, Clone)]
struct EvictedLog {
    entries: HashMap<Vec<u8>, (u32, Hash)>,
    order: VecDeque<Vec<u8>>,
    bound: usize,
}

impl EvictedLog {
    fn new(bound: usize) -> Self {
        EvictedLog {
            entries: HashMap::new(),
            order: VecDeque::new(),
            bound,
        }
    }

    fn record(&mut self, key: Vec<u8>, timestamp: u32, hash: Hash) {
        if self.bound == 0 {
            return;
        }
        if self.entries.insert(key.clone(), (timestamp, hash)).is_none() {
            self.order.push_back(key);
            while self.order.len() > self.bound {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
    }

    fn get(&self, key: &[u8]) -> Option<(u32, Hash)> {
        self.entries.get(key).copied()
    }
}

/// A two-phase set of messages with per-CRDT conflict resolution.
#[derive(Debug, Clone)]
pub struct MessageSet<P> {
    adds: BTreeMap<Vec<u8>, Message>,
    removes: BTreeMap<Vec<u8>, Message>,
    evicted: EvictedLog,
    limits: SetLimits,
    _policy: PhantomData<P>,
}

impl<P: StorePolicy> MessageSet<P> {
    /// A new store with the given bounds.
    pub fn new(limits: SetLimits) -> Self {
        MessageSet {
            adds: BTreeMap::new(),
            removes: BTreeMap::new(),
            evicted: EvictedLog::new(limits.capacity.unwrap_or_default()),
            limits,
            _policy: PhantomData,
        }
    }

    /// Store name from the policy.
    pub fn name(&self) -> &'static str {
        P::NAME
    }

    /// Sync id discriminator from the policy.
    pub fn trie_set(&self) -> TrieSet {
        P::TRIE_SET
    }

    /// Number of messages across both sets.
    pub fn len(&self) -> usize {
        self.adds.len() + self.removes.len()
    }

    /// Whether both sets are empty.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }

    /// Merge a validated message.
    pub fn merge(&mut self, message: Message, now: u64) -> Result<MergeOutcome, StoreError> {
        let typ = message.typ().ok_or(StoreError::Malformed)?;
        let set = P::set_kind(typ).ok_or(StoreError::WrongStore(P::NAME))?;
        if let Some(ttl) = self.limits.ttl_ms {
            if time::age_ms(message.timestamp(), now) > ttl {
                return Err(StoreError::Expired);
            }
        }
        let key = P::conflict_key(&message).ok_or(StoreError::Malformed)?;

        if let Some((timestamp, hash)) = self.evicted.get(&key) {
            if (message.timestamp(), message.hash20()) <= (timestamp, hash) {
                return Err(StoreError::Evicted);
            }
        }

        let loser_set = {
            let existing = self
                .adds
                .get(&key)
                .map(|m| (SetKind::Add, m))
                .or_else(|| self.removes.get(&key).map(|m| (SetKind::Remove, m)));
            match existing {
                None => None,
                Some((_, existing)) if existing.hash == message.hash => {
                    return Ok(MergeOutcome::Noop);
                }
                Some((existing_set, existing)) => {
                    if !Self::tie_break(&message, existing) {
                        return Err(StoreError::Conflict);
                    }
                    Some(existing_set)
                }
            }
        };
        let mut displaced = Vec::new();
        if let Some(existing_set) = loser_set {
            let loser = match existing_set {
                SetKind::Add => self.adds.remove(&key),
                SetKind::Remove => self.removes.remove(&key),
            };
            displaced.extend(loser);
        }

        match set {
            SetKind::Add => self.adds.insert(key, message),
            SetKind::Remove => self.removes.insert(key, message),
        };
        displaced.extend(self.enforce_bounds(now));
        Ok(MergeOutcome::Merged(Merged {
            set,
            evicted: displaced,
        }))
    }

    /// Apply capacity and TTL bounds, returning everything evicted.
    pub fn enforce_bounds(&mut self, now: u64) -> Vec<Message> {
        let mut evicted = Vec::new();
        if let Some(capacity) = self.limits.capacity {
            while self.len() > capacity {
                let Some((key, set)) = self.oldest_entry() else {
                    break;
                };
                let message = match set {
                    SetKind::Add => self.adds.remove(&key),
                    SetKind::Remove => self.removes.remove(&key),
                };
                if let Some(message) = message {
                    self.evicted
                        .record(key, message.timestamp(), message.hash20());
                    evicted.push(message);
                }
            }
        }
        if let Some(ttl) = self.limits.ttl_ms {
            for map in [&mut self.adds, &mut self.removes] {
                let expired: Vec<Vec<u8>> = map
                    .iter()
                    .filter(|(_, m)| time::age_ms(m.timestamp(), now) > ttl)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in expired {
                    if let Some(message) = map.remove(&key) {
                        evicted.push(message);
                    }
                }
            }
        }
        evicted
    }

    /// Discard every message for `fid` whose envelope signer is `signer`,
    /// from both sets, without leaving tombstones or eviction records.
    ///
    /// This is the cascade primitive: revoked state simply vanishes, and
    /// re-arrivals are kept out by the authorization check instead.
    pub fn revoke(&mut self, fid: u64, signer: &[u8]) -> Vec<Message> {
        let mut revoked = Vec::new();
        for map in [&mut self.adds, &mut self.removes] {
            let matching: Vec<Vec<u8>> = map
                .range(fid_bounds(fid))
                .filter(|(_, m)| m.signer == signer)
                .map(|(k, _)| k.clone())
                .collect();
            for key in matching {
                if let Some(message) = map.remove(&key) {
                    revoked.push(message);
                }
            }
        }
        revoked
    }

    /// The add-set message under a conflict key.
    pub fn get_add(&self, key: &[u8]) -> Option<&Message> {
        self.adds.get(key)
    }

    /// The remove-set message under a conflict key.
    pub fn get_remove(&self, key: &[u8]) -> Option<&Message> {
        self.removes.get(key)
    }

    /// All add-set messages for an fid.
    pub fn adds_by_fid(&self, fid: u64) -> impl Iterator<Item = &Message> {
        self.adds.range(fid_bounds(fid)).map(|(_, m)| m)
    }

    /// All remove-set messages for an fid.
    pub fn removes_by_fid(&self, fid: u64) -> impl Iterator<Item = &Message> {
        self.removes.range(fid_bounds(fid)).map(|(_, m)| m)
    }

    /// All messages in both sets.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.adds.values().chain(self.removes.values())
    }

    /// Find a message by fid and the 17-byte hash prefix embedded in a sync
    /// id suffix.
    pub fn find_by_hash_prefix(&self, fid: u64, hash_prefix: &[u8]) -> Option<&Message> {
        self.adds_by_fid(fid)
            .chain(self.removes_by_fid(fid))
            .find(|m| m.hash.starts_with(hash_prefix))
    }

    fn oldest_entry(&self) -> Option<(Vec<u8>, SetKind)> {
        let mut oldest: Option<(u32, Hash, Vec<u8>, SetKind)> = None;
        for (set, map) in [(SetKind::Add, &self.adds), (SetKind::Remove, &self.removes)] {
            for (key, message) in map.iter() {
                let candidate = (message.timestamp(), message.hash20());
                match &oldest {
                    Some((timestamp, hash, _, _)) if (*timestamp, *hash) <= candidate => {}
                    _ => oldest = Some((candidate.0, candidate.1, key.clone(), set)),
                }
            }
        }
        oldest.map(|(_, _, key, set)| (key, set))
    }

    fn tie_break(challenger: &Message, incumbent: &Message) -> bool {
        challenger_wins_with(challenger, incumbent, P::REMOVE_WINS_FIRST)
    }
}

fn challenger_wins_with(challenger: &Message, incumbent: &Message, remove_first: bool) -> bool {
    use std::cmp::Ordering;
    let by_remove = || {
        let challenger_removes = challenger.typ().map(|t| t.is_remove()).unwrap_or(false);
        let incumbent_removes = incumbent.typ().map(|t| t.is_remove()).unwrap_or(false);
        challenger_removes.cmp(&incumbent_removes)
    };
    let by_timestamp = || challenger.timestamp().cmp(&incumbent.timestamp());
    let by_hash = || challenger.hash20().cmp(&incumbent.hash20());

    let ordering = if remove_first {
        by_remove().then_with(by_timestamp).then_with(by_hash)
    } else {
        by_timestamp().then_with(by_remove).then_with(by_hash)
    };
    ordering == Ordering::Greater
}
