//! The merge engine.
//!
//! Owns all hub state: the fid registry, the five CRDT stores and the sync
//! trie. A merge validates the message, binds its signature to the fid's
//! authority (custody address for EIP-712, registered signer for Ed25519),
//! routes it to its store, and commits the trie update and the storage
//! batch in the same critical section, so the trie never exposes a message
//! the stores do not hold.
//!
//! Concurrency model: validation and signature checks run lock-free; the
//! mutation section takes a per-fid shard lock (merges for one fid are
//! linearizable) and the state write lock (readers see whole merges or
//! nothing). Fid transfers and signer revocations cascade inside that same
//! write section, so a trie root never reflects a partial cascade.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hub_core::keys::{EthAddress, Hash};
use hub_core::proto::{Body, FarcasterNetwork, Message, MessageType, SignatureScheme, UserDataType};
use hub_core::time;
use hub_core::validation::{self, ValidationError};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
#[cfg(feature = "metrics")]
use iroh_metrics::{inc, inc_by};

use crate::registry::{IdRegistry, IdRegistryEvent, RegistryError};
use crate::store::cast::CastPolicy;
use crate::store::kv::{self, Batch, Kv, KvError};
use crate::store::reaction::ReactionPolicy;
use crate::store::signer::{self, SignerPolicy};
use crate::store::user_data::UserDataPolicy;
use crate::store::verification::VerificationPolicy;
use crate::store::{MergeOutcome, MessageSet, SetLimits, StoreError, StorePolicy};
use crate::trie::{NodeMetadata, SyncId, SyncTrie, TrieSnapshot};

/// Default number of fid shards.
pub const DEFAULT_SHARDS: usize = 16;

/// Capacity and TTL bounds for every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StoreLimits {
    /// Signer store bounds.
    pub signers: SetLimits,
    /// User data store bounds.
    pub user_data: SetLimits,
    /// Cast store bounds.
    pub casts: SetLimits,
    /// Reaction store bounds.
    pub reactions: SetLimits,
    /// Verification store bounds.
    pub verifications: SetLimits,
}

impl Default for StoreLimits {
    fn default() -> Self {
        const DAY_MS: u64 = 24 * 60 * 60 * 1_000;
        StoreLimits {
            signers: SetLimits::capacity(100),
            user_data: SetLimits::unbounded(),
            casts: SetLimits {
                capacity: Some(10_000),
                ttl_ms: Some(365 * DAY_MS),
            },
            reactions: SetLimits {
                capacity: Some(5_000),
                ttl_ms: Some(90 * DAY_MS),
            },
            verifications: SetLimits::capacity(50),
        }
    }
}

/// Where the engine reads "now" from, in milliseconds since the Farcaster
/// epoch.
#[derive(Debug, Clone)]
pub enum Clock {
    /// The system clock.
    System,
    /// An externally driven clock, for tests and simulations.
    Manual(Arc<AtomicU64>),
}

impl Clock {
    /// A manual clock starting at `now`, with a handle to advance it.
    pub fn manual(now: u64) -> (Clock, Arc<AtomicU64>) {
        let handle = Arc::new(AtomicU64::new(now));
        (Clock::Manual(handle.clone()), handle)
    }

    /// The current time.
    pub fn now(&self) -> u64 {
        match self {
            Clock::System => time::now_ms(),
            Clock::Manual(ms) => ms.load(Ordering::SeqCst),
        }
    }
}

/// Resolution of fnames against the external fname registry.
pub trait FnameResolver: Send + Sync + std::fmt::Debug {
    /// Whether `name` resolves to the custody address of `fid`.
    fn owns(&self, fid: u64, custody: &EthAddress, name: &str) -> bool;
}

/// Resolver that accepts every fname. Default for nodes that do not sync
/// the fname registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFnames;

impl FnameResolver for AcceptAllFnames {
    fn owns(&self, _fid: u64, _custody: &EthAddress, _name: &str) -> bool {
        true
    }
}

/// State changes observable by outer layers.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A message merged, displacing `deleted`.
    MergeMessage {
        /// The merged message.
        message: Message,
        /// Conflict losers and bound evictions.
        deleted: Vec<Message>,
    },
    /// A message aged or overflowed out of its store.
    PruneMessage {
        /// The pruned message.
        message: Message,
    },
    /// A message was discarded by a revocation cascade.
    RevokeMessage {
        /// The revoked message.
        message: Message,
    },
    /// An on-chain registry event was applied.
    MergeIdRegistryEvent {
        /// The fid.
        fid: u64,
        /// The custody address now in force.
        custody: EthAddress,
    },
}

/// Errors from the merge pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The message is invalid; the sender is at fault.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The store refused the message.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The registry refused the chain event.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The persistence backend failed.
    #[error(transparent)]
    Storage(#[from] KvError),
    /// A previous storage fault halted the hub.
    #[error("hub is halted after a storage fault")]
    Halted,
}

impl EngineError {
    /// Whether the error blames the submitted message rather than the hub.
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::Validation(_) | EngineError::Store(_))
    }

    /// Whether this is an authorization failure that may succeed after the
    /// fid's signer set catches up.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(ValidationError::UnauthorizedSigner { .. })
                | EngineError::Validation(ValidationError::UnknownFid(_))
        )
    }
}

/// Outcome of a merge, for callers and log lines.
#[derive(Debug, Clone)]
pub struct MergeSummary {
    /// Hash of the submitted message.
    pub hash: Hash,
    /// False when the message was already present.
    pub merged: bool,
    /// Number of messages displaced by conflict or bounds.
    pub deleted: usize,
    /// Number of messages discarded by a cascade this merge triggered.
    pub revoked: usize,
}

/// Construction options for [`Engine`].
#[derive(Debug)]
pub struct EngineOptions {
    /// Number of fid shards for the per-fid merge locks.
    pub shards: usize,
    /// Fname registry resolution.
    pub fname: Box<dyn FnameResolver>,
    /// Capacity of the hub event channel.
    pub event_capacity: usize,
    /// Time source for validation and TTL enforcement.
    pub clock: Clock,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            shards: DEFAULT_SHARDS,
            fname: Box::new(AcceptAllFnames),
            event_capacity: 1024,
            clock: Clock::System,
        }
    }
}

#[derive(Debug)]
struct State {
    registry: IdRegistry,
    signers: MessageSet<SignerPolicy>,
    user_data: MessageSet<UserDataPolicy>,
    casts: MessageSet<CastPolicy>,
    reactions: MessageSet<ReactionPolicy>,
    verifications: MessageSet<VerificationPolicy>,
    trie: SyncTrie,
}

#[derive(Debug)]
struct Inner {
    network: FarcasterNetwork,
    state: RwLock<State>,
    shards: Vec<Mutex<()>>,
    kv: Box<dyn Kv>,
    halted: AtomicBool,
    is_synced: AtomicBool,
    events: broadcast::Sender<HubEvent>,
    fname: Box<dyn FnameResolver>,
    clock: Clock,
}

/// The hub's validation-and-merge engine.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// A new engine with default options.
    pub fn new(network: FarcasterNetwork, kv: impl Kv, limits: StoreLimits) -> Self {
        Self::with_options(network, kv, limits, EngineOptions::default())
    }

    /// A new engine with explicit options.
    pub fn with_options(
        network: FarcasterNetwork,
        kv: impl Kv,
        limits: StoreLimits,
        options: EngineOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let state = State {
            registry: IdRegistry::new(),
            signers: MessageSet::new(limits.signers),
            user_data: MessageSet::new(limits.user_data),
            casts: MessageSet::new(limits.casts),
            reactions: MessageSet::new(limits.reactions),
            verifications: MessageSet::new(limits.verifications),
            trie: SyncTrie::new(),
        };
        Engine {
            inner: Arc::new(Inner {
                network,
                state: RwLock::new(state),
                shards: (0..options.shards.max(1)).map(|_| Mutex::new(())).collect(),
                kv: Box::new(kv),
                halted: AtomicBool::new(false),
                is_synced: AtomicBool::new(false),
                events,
                fname: options.fname,
                clock: options.clock,
            }),
        }
    }

    /// The network this engine accepts messages for.
    pub fn network(&self) -> FarcasterNetwork {
        self.inner.network
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a storage fault has halted the hub.
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    /// Whether the last sync cycle saw no divergence.
    pub fn is_synced(&self) -> bool {
        self.inner.is_synced.load(Ordering::SeqCst)
    }

    pub(crate) fn set_synced(&self, synced: bool) {
        self.inner.is_synced.store(synced, Ordering::SeqCst);
    }

    /// Merge a message against the engine clock.
    pub fn merge_message(&self, message: Message) -> Result<MergeSummary, EngineError> {
        self.merge_message_at(message, self.inner.clock.now())
    }

    /// The engine's current time.
    pub fn now(&self) -> u64 {
        self.inner.clock.now()
    }

    /// Merge a canonical-encoded message, the gossip entry point.
    pub fn merge_encoded(&self, bytes: &[u8]) -> Result<MergeSummary, EngineError> {
        let message = Message::decode_canonical(bytes)
            .map_err(|_| ValidationError::MalformedBytes("undecodable message payload"))?;
        self.merge_message(message)
    }

    /// Merge a message against an explicit clock.
    pub fn merge_message_at(
        &self,
        message: Message,
        now: u64,
    ) -> Result<MergeSummary, EngineError> {
        self.ensure_live()?;
        let result = self.merge_inner(message, now);
        match &result {
            Ok(summary) => {
                trace!(hash = %summary.hash.fmt_short(), deleted = summary.deleted, "merged message");
                #[cfg(feature = "metrics")]
                {
                    inc!(Metrics, messages_merged);
                    inc_by!(Metrics, messages_deleted, summary.deleted as u64);
                    inc_by!(Metrics, messages_revoked, summary.revoked as u64);
                }
            }
            Err(err) if err.is_rejection() => {
                debug!(?err, "rejected message");
                #[cfg(feature = "metrics")]
                inc!(Metrics, messages_rejected);
            }
            Err(_) => {}
        }
        result
    }

    fn merge_inner(&self, message: Message, now: u64) -> Result<MergeSummary, EngineError> {
        let (fid, typ, scheme, fname) = {
            let data = validation::validate(&message, self.inner.network, now)?;
            let typ = data.typ().expect("validated type");
            let scheme =
                SignatureScheme::try_from(message.signature_scheme).expect("validated scheme");
            let fname = match &data.body {
                Some(Body::UserDataBody(body)) if body.r#type == UserDataType::Fname as i32 => {
                    Some(body.value.clone())
                }
                _ => None,
            };
            (data.fid, typ, scheme, fname)
        };

        let _shard = self.shard(fid).lock();

        // Authorization binding against current registry and signer state.
        {
            let state = self.inner.state.read();
            match scheme {
                SignatureScheme::Eip712 => {
                    let custody = state
                        .registry
                        .custody(fid)
                        .ok_or(ValidationError::UnknownFid(fid))?;
                    if custody.as_bytes()[..] != message.signer[..] {
                        return Err(ValidationError::UnauthorizedSigner { fid }.into());
                    }
                }
                SignatureScheme::Ed25519 => {
                    if !state.signers.is_active(fid, &message.signer) {
                        return Err(ValidationError::UnauthorizedSigner { fid }.into());
                    }
                }
                SignatureScheme::None => unreachable!("validated scheme"),
            }
            if let Some(name) = &fname {
                let custody = state
                    .registry
                    .custody(fid)
                    .ok_or(ValidationError::UnknownFid(fid))?;
                if !self.inner.fname.owns(fid, &custody, name) {
                    return Err(ValidationError::BodyConstraintViolated(
                        "fname does not resolve to the fid's custody address",
                    )
                    .into());
                }
            }
        }

        let hash = message.hash20();
        let mut state = self.inner.state.write();
        let State {
            signers,
            user_data,
            casts,
            reactions,
            verifications,
            trie,
            ..
        } = &mut *state;

        let mut batch = Batch::new();
        let delta = match typ {
            MessageType::SignerAdd | MessageType::SignerRemove => {
                apply_merge(signers, trie, &mut batch, &message, now)?
            }
            MessageType::UserDataAdd => apply_merge(user_data, trie, &mut batch, &message, now)?,
            MessageType::CastAdd | MessageType::CastRemove => {
                apply_merge(casts, trie, &mut batch, &message, now)?
            }
            MessageType::ReactionAdd | MessageType::ReactionRemove => {
                apply_merge(reactions, trie, &mut batch, &message, now)?
            }
            MessageType::VerificationAddEthAddress | MessageType::VerificationRemove => {
                apply_merge(verifications, trie, &mut batch, &message, now)?
            }
            MessageType::None => unreachable!("validated type"),
        };

        let Some(evicted) = delta else {
            return Ok(MergeSummary {
                hash,
                merged: false,
                deleted: 0,
                revoked: 0,
            });
        };

        // A SignerAdd leaving the add set revokes everything its key signed.
        // Capacity evictions can displace a SignerAdd of another fid, so the
        // cascade keys off the evicted message, not the merged one.
        let mut revoked = Vec::new();
        for loser in &evicted {
            if loser.typ() == Some(MessageType::SignerAdd) {
                if let Some(key) = signer::body_signer(loser) {
                    let key = key.to_vec();
                    revoked.extend(revoke_signer_messages(
                        user_data,
                        casts,
                        reactions,
                        verifications,
                        trie,
                        &mut batch,
                        loser.fid(),
                        &key,
                    ));
                }
            }
        }

        self.apply_batch(batch)?;
        drop(state);

        let summary = MergeSummary {
            hash,
            merged: true,
            deleted: evicted.len(),
            revoked: revoked.len(),
        };
        self.emit(HubEvent::MergeMessage {
            message,
            deleted: evicted,
        });
        for message in revoked {
            self.emit(HubEvent::RevokeMessage { message });
        }
        Ok(summary)
    }

    /// Apply an on-chain ID Registry event. A transfer cascades: every
    /// EIP-712 message signed by the previous custody address is discarded,
    /// and each discarded SignerAdd drags down the messages its key signed.
    pub fn merge_id_registry_event(
        &self,
        event: &IdRegistryEvent,
    ) -> Result<usize, EngineError> {
        self.ensure_live()?;
        let fid = event.fid();
        let _shard = self.shard(fid).lock();
        let mut state = self.inner.state.write();
        let applied = state.registry.apply(event)?;

        let State {
            signers,
            user_data,
            casts,
            reactions,
            verifications,
            trie,
            ..
        } = &mut *state;

        let mut batch = Batch::new();
        let mut value = applied.custody.as_bytes().to_vec();
        value.extend_from_slice(&event.block_number().to_be_bytes());
        batch.put(kv::fid_key(fid), value);

        let mut revoked = Vec::new();
        if let Some(previous) = applied.previous {
            let discarded = signers.revoke(fid, previous.as_bytes());
            for message in &discarded {
                remove_message::<SignerPolicy>(trie, &mut batch, message);
            }
            for message in &discarded {
                if message.typ() == Some(MessageType::SignerAdd) {
                    if let Some(key) = signer::body_signer(message) {
                        let key = key.to_vec();
                        revoked.extend(revoke_signer_messages(
                            user_data,
                            casts,
                            reactions,
                            verifications,
                            trie,
                            &mut batch,
                            fid,
                            &key,
                        ));
                    }
                }
            }
            revoked.extend(discarded);
        }

        self.apply_batch(batch)?;
        drop(state);

        debug!(fid, custody = %applied.custody, revoked = revoked.len(), "applied id registry event");
        #[cfg(feature = "metrics")]
        {
            inc!(Metrics, registry_events_merged);
            inc_by!(Metrics, messages_revoked, revoked.len() as u64);
        }
        let count = revoked.len();
        self.emit(HubEvent::MergeIdRegistryEvent {
            fid,
            custody: applied.custody,
        });
        for message in revoked {
            self.emit(HubEvent::RevokeMessage { message });
        }
        Ok(count)
    }

    /// Sweep TTL and capacity bounds across all stores.
    pub fn prune(&self, now: u64) -> Result<usize, EngineError> {
        self.ensure_live()?;
        let mut state = self.inner.state.write();
        let State {
            signers,
            user_data,
            casts,
            reactions,
            verifications,
            trie,
            ..
        } = &mut *state;

        let mut batch = Batch::new();
        let mut pruned = Vec::new();
        prune_store(signers, trie, &mut batch, now, &mut pruned);

        // A pruned SignerAdd leaves the add set like any other discard and
        // drags down the messages its key signed.
        let mut revoked = Vec::new();
        for message in &pruned {
            if message.typ() == Some(MessageType::SignerAdd) {
                if let Some(key) = signer::body_signer(message) {
                    let key = key.to_vec();
                    revoked.extend(revoke_signer_messages(
                        user_data,
                        casts,
                        reactions,
                        verifications,
                        trie,
                        &mut batch,
                        message.fid(),
                        &key,
                    ));
                }
            }
        }

        prune_store(user_data, trie, &mut batch, now, &mut pruned);
        prune_store(casts, trie, &mut batch, now, &mut pruned);
        prune_store(reactions, trie, &mut batch, now, &mut pruned);
        prune_store(verifications, trie, &mut batch, now, &mut pruned);

        self.apply_batch(batch)?;
        drop(state);

        #[cfg(feature = "metrics")]
        {
            inc_by!(Metrics, messages_pruned, pruned.len() as u64);
            inc_by!(Metrics, messages_revoked, revoked.len() as u64);
        }
        let count = pruned.len() + revoked.len();
        for message in pruned {
            self.emit(HubEvent::PruneMessage { message });
        }
        for message in revoked {
            self.emit(HubEvent::RevokeMessage { message });
        }
        Ok(count)
    }

    /// The root hash of the sync trie.
    pub fn root_hash(&self) -> Hash {
        self.inner.state.read().trie.root_hash()
    }

    /// Number of messages in the sync trie.
    pub fn num_messages(&self) -> usize {
        self.inner.state.read().trie.len()
    }

    /// Exclusion-set snapshot under a prefix.
    pub fn snapshot(&self, prefix: &[u8]) -> TrieSnapshot {
        self.inner.state.read().trie.snapshot(prefix)
    }

    /// Trie metadata under a prefix, with direct children.
    pub fn metadata(&self, prefix: &[u8]) -> Option<NodeMetadata> {
        self.inner.state.read().trie.metadata(prefix)
    }

    /// All sync ids under a prefix, chronological.
    pub fn sync_ids_by_prefix(&self, prefix: &[u8]) -> Vec<SyncId> {
        self.inner.state.read().trie.leaves_by_prefix(prefix)
    }

    /// The rightmost path below a prefix.
    pub fn rightmost_path(&self, prefix: &[u8]) -> Vec<u8> {
        self.inner.state.read().trie.rightmost_path(prefix)
    }

    /// Whether a sync id is present.
    pub fn contains_sync_id(&self, id: &SyncId) -> bool {
        self.inner.state.read().trie.contains(id)
    }

    /// Resolve sync ids back to messages. Unknown ids are skipped.
    pub fn messages_by_sync_ids(&self, ids: &[SyncId]) -> Vec<Message> {
        let state = self.inner.state.read();
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let found = match id.set_byte() {
                b if b == SignerPolicy::TRIE_SET as u8 => {
                    state.signers.find_by_hash_prefix(id.fid(), id.hash_prefix())
                }
                b if b == UserDataPolicy::TRIE_SET as u8 => state
                    .user_data
                    .find_by_hash_prefix(id.fid(), id.hash_prefix()),
                b if b == CastPolicy::TRIE_SET as u8 => {
                    state.casts.find_by_hash_prefix(id.fid(), id.hash_prefix())
                }
                b if b == ReactionPolicy::TRIE_SET as u8 => state
                    .reactions
                    .find_by_hash_prefix(id.fid(), id.hash_prefix()),
                b if b == VerificationPolicy::TRIE_SET as u8 => state
                    .verifications
                    .find_by_hash_prefix(id.fid(), id.hash_prefix()),
                _ => None,
            };
            match found {
                Some(message) => messages.push(message.clone()),
                None => warn!(sync_id = %id, "sync id not found in any store"),
            }
        }
        messages
    }

    /// The custody address of an fid.
    pub fn custody(&self, fid: u64) -> Option<EthAddress> {
        self.inner.state.read().registry.custody(fid)
    }

    /// Active signer keys for an fid.
    pub fn active_signers(&self, fid: u64) -> Vec<hub_core::keys::SignerId> {
        self.inner.state.read().signers.active_signers(fid)
    }

    /// Look up a cast by author and hash.
    pub fn get_cast(&self, fid: u64, hash: &Hash) -> Option<Message> {
        self.inner.state.read().casts.get_cast(fid, hash).cloned()
    }

    /// The current value of a user data field.
    pub fn get_user_data(&self, fid: u64, typ: UserDataType) -> Option<String> {
        self.inner
            .state
            .read()
            .user_data
            .get(fid, typ)
            .map(str::to_owned)
    }

    /// The current verification of an address by an fid.
    pub fn get_verification(&self, fid: u64, address: &EthAddress) -> Option<Message> {
        self.inner
            .state
            .read()
            .verifications
            .get_verification(fid, address)
            .cloned()
    }

    fn shard(&self, fid: u64) -> &Mutex<()> {
        let index = (fid as usize) % self.inner.shards.len();
        &self.inner.shards[index]
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.is_halted() {
            return Err(EngineError::Halted);
        }
        Ok(())
    }

    fn apply_batch(&self, batch: Batch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        match self.inner.kv.apply(batch) {
            Ok(()) => Ok(()),
            Err(err @ KvError::Corruption(_)) => {
                warn!(?err, "storage corruption, halting hub");
                self.inner.halted.store(true, Ordering::SeqCst);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn emit(&self, event: HubEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }
}

fn apply_merge<P: StorePolicy>(
    store: &mut MessageSet<P>,
    trie: &mut SyncTrie,
    batch: &mut Batch,
    message: &Message,
    now: u64,
) -> Result<Option<Vec<Message>>, StoreError> {
    match store.merge(message.clone(), now)? {
        MergeOutcome::Noop => Ok(None),
        MergeOutcome::Merged(merged) => {
            let sync_id = SyncId::of(message, P::TRIE_SET);
            trie.insert(sync_id);
            batch.put(kv::trie_key(sync_id.as_bytes()), Vec::new());
            let key = P::conflict_key(message).expect("merged message has a key");
            batch.put(
                kv::crdt_key(P::NAME, merged.set, &key),
                message.encode_canonical(),
            );
            for evicted in &merged.evicted {
                remove_message::<P>(trie, batch, evicted);
            }
            Ok(Some(merged.evicted))
        }
    }
}

fn remove_message<P: StorePolicy>(trie: &mut SyncTrie, batch: &mut Batch, message: &Message) {
    let sync_id = SyncId::of(message, P::TRIE_SET);
    trie.remove(&sync_id);
    batch.delete(kv::trie_key(sync_id.as_bytes()));
    if let (Some(key), Some(set)) = (
        P::conflict_key(message),
        message.typ().and_then(P::set_kind),
    ) {
        batch.delete(kv::crdt_key(P::NAME, set, &key));
    }
}

#[allow(clippy::too_many_arguments)]
fn revoke_signer_messages(
    user_data: &mut MessageSet<UserDataPolicy>,
    casts: &mut MessageSet<CastPolicy>,
    reactions: &mut MessageSet<ReactionPolicy>,
    verifications: &mut MessageSet<VerificationPolicy>,
    trie: &mut SyncTrie,
    batch: &mut Batch,
    fid: u64,
    signer_key: &[u8],
) -> Vec<Message> {
    let mut revoked = Vec::new();
    revoke_in(user_data, trie, batch, fid, signer_key, &mut revoked);
    revoke_in(casts, trie, batch, fid, signer_key, &mut revoked);
    revoke_in(reactions, trie, batch, fid, signer_key, &mut revoked);
    revoke_in(verifications, trie, batch, fid, signer_key, &mut revoked);
    revoked
}

fn revoke_in<P: StorePolicy>(
    store: &mut MessageSet<P>,
    trie: &mut SyncTrie,
    batch: &mut Batch,
    fid: u64,
    signer_key: &[u8],
    out: &mut Vec<Message>,
) {
    for message in store.revoke(fid, signer_key) {
        remove_message::<P>(trie, batch, &message);
        out.push(message);
    }
}

fn prune_store<P: StorePolicy>(
    store: &mut MessageSet<P>,
    trie: &mut SyncTrie,
    batch: &mut Batch,
    now: u64,
    out: &mut Vec<Message>,
) {
    for message in store.enforce_bounds(now) {
        remove_message::<P>(trie, batch, &message);
        out.push(message);
    }
}
