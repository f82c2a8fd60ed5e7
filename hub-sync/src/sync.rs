//! The diff sync protocol.
//!
//! Reconciles this hub's message set with a peer's in time proportional to
//! the divergence, not the set size. A cycle walks the exclusion-set
//! snapshots down the newest path to a divergence prefix, diffs the
//! subtrees below it via depth-1 metadata, fetches the sync ids this hub
//! is missing, and feeds the messages through the merge pipeline with
//! signer messages first.
//!
//! Every RPC runs under its own deadline and a bounded, jittered retry
//! budget; the protocol is idempotent, so anything abandoned here is
//! picked up by the next cycle. A peer whose responses are internally
//! inconsistent is quarantined for the rest of the session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::keys::Hash;
use hub_core::proto::{Message, MessageType};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
#[cfg(feature = "metrics")]
use iroh_metrics::{inc, inc_by};

use crate::engine::{Engine, EngineError};
use crate::rpc::{
    HubInfoResponse, MessagesResponse, SyncIdsResponse, TrieNodeMetadataResponse,
    TrieSnapshotResponse,
};
use crate::trie::{SyncId, SyncTrie, TrieSet, SYNC_ID_LENGTH};

/// Transient errors talking to a peer. Retried with backoff inside the
/// sync driver; surfaced only after the retry budget is spent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The call did not complete within its deadline.
    #[error("rpc deadline exceeded")]
    Timeout,
    /// The peer could not be reached.
    #[error("peer unavailable: {0}")]
    Unavailable(String),
}

/// Errors ending a diff sync cycle.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The peer was marked faulty earlier in this session.
    #[error("peer is quarantined for this session")]
    FaultyPeer,
    /// A transient error survived the whole retry budget.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The peer's leaves do not hash to its advertised digest.
    #[error("peer trie does not match its advertised digest")]
    TrieRootMismatch,
    /// The peer did not return all requested sync ids.
    #[error("peer did not return all requested sync ids")]
    SyncIdNotFound,
    /// A fetched message does not correspond to a requested sync id.
    #[error("fetched message does not match its sync id")]
    MessageRootMismatch,
    /// The peer's response could not be interpreted.
    #[error("malformed peer response: {0}")]
    BadResponse(&'static str),
    /// The cycle was cancelled.
    #[error("sync cancelled")]
    Cancelled,
    /// The local engine failed for a non-rejection reason.
    #[error(transparent)]
    Engine(EngineError),
}

impl SyncError {
    /// Whether the peer misbehaved: these quarantine it for the session.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            SyncError::TrieRootMismatch
                | SyncError::SyncIdNotFound
                | SyncError::MessageRootMismatch
                | SyncError::BadResponse(_)
        )
    }
}

/// Client side of the sync RPCs, implemented by the transport binding.
#[async_trait]
pub trait PeerClient: Send + Sync + std::fmt::Debug {
    /// Stable identifier of the peer, for quarantine bookkeeping and logs.
    fn peer_id(&self) -> String;

    /// `GetInfo`.
    async fn get_info(&self) -> Result<HubInfoResponse, RpcError>;

    /// `GetAllSyncIdsByPrefix`.
    async fn get_all_sync_ids_by_prefix(&self, prefix: &[u8])
        -> Result<SyncIdsResponse, RpcError>;

    /// `GetAllMessagesBySyncIds`.
    async fn get_all_messages_by_sync_ids(
        &self,
        sync_ids: &[SyncId],
    ) -> Result<MessagesResponse, RpcError>;

    /// `GetSyncMetadataByPrefix`.
    async fn get_sync_metadata_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Option<TrieNodeMetadataResponse>, RpcError>;

    /// `GetSyncSnapshotByPrefix`.
    async fn get_sync_snapshot_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<TrieSnapshotResponse, RpcError>;
}

/// Tuning knobs for the sync driver.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Deadline for each RPC.
    pub rpc_deadline: Duration,
    /// Retries per RPC after the first attempt.
    pub rpc_retries: u32,
    /// Base backoff between retries, doubled per attempt plus jitter.
    pub rpc_backoff: Duration,
    /// Subtrees at most this big are fetched whole instead of recursed.
    pub fetch_threshold: usize,
    /// Messages requested per `GetAllMessagesBySyncIds` call.
    pub max_fetch_batch: usize,
    /// Rounds of re-queueing messages that failed authorization.
    pub max_requeue_rounds: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            rpc_deadline: Duration::from_secs(15),
            rpc_retries: 3,
            rpc_backoff: Duration::from_millis(500),
            fetch_threshold: 1024,
            max_fetch_batch: 256,
            max_requeue_rounds: 3,
        }
    }
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Prefix below which the tries diverged; empty when already in sync.
    pub divergence_prefix: Vec<u8>,
    /// Sync ids the peer had and this hub did not.
    pub num_missing: usize,
    /// Messages merged.
    pub num_merged: usize,
    /// Messages rejected by validation or conflict.
    pub num_rejected: usize,
    /// Messages still unauthorized after all re-queue rounds.
    pub num_deferred: usize,
}

/// The diff sync driver.
#[derive(Debug)]
pub struct DiffSync {
    engine: Engine,
    config: SyncConfig,
    faulty: Mutex<HashSet<String>>,
}

impl DiffSync {
    /// A new driver over an engine.
    pub fn new(engine: Engine, config: SyncConfig) -> Self {
        DiffSync {
            engine,
            config,
            faulty: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a peer is quarantined for this session.
    pub fn is_faulty(&self, peer_id: &str) -> bool {
        self.faulty.lock().contains(peer_id)
    }

    /// Run one sync cycle against a peer.
    pub async fn sync_with(
        &self,
        peer: &dyn PeerClient,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        if self.is_faulty(&peer.peer_id()) {
            return Err(SyncError::FaultyPeer);
        }
        #[cfg(feature = "metrics")]
        inc!(Metrics, sync_attempts);

        let result = self.sync_inner(peer, cancel).await;
        match &result {
            Ok(outcome) => {
                #[cfg(feature = "metrics")]
                inc!(Metrics, sync_success);
                debug!(
                    peer = %peer.peer_id(),
                    missing = outcome.num_missing,
                    merged = outcome.num_merged,
                    "sync cycle done"
                );
            }
            Err(err) => {
                #[cfg(feature = "metrics")]
                inc!(Metrics, sync_failure);
                if err.is_integrity() {
                    warn!(peer = %peer.peer_id(), ?err, "quarantining faulty peer");
                    self.faulty.lock().insert(peer.peer_id());
                }
            }
        }
        result
    }

    async fn sync_inner(
        &self,
        peer: &dyn PeerClient,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let info = self.call(cancel, || peer.get_info()).await?;
        if info.root_hash == self.engine.root_hash().to_hex() {
            self.engine.set_synced(true);
            return Ok(SyncOutcome::default());
        }
        self.engine.set_synced(false);

        let divergence_prefix = self.find_divergence_prefix(peer, cancel).await?;
        debug!(
            peer = %peer.peer_id(),
            prefix = %hex::encode(&divergence_prefix),
            "found divergence prefix"
        );

        let missing = self
            .collect_missing(peer, cancel, divergence_prefix.clone())
            .await?;
        let mut outcome = SyncOutcome {
            divergence_prefix,
            num_missing: missing.len(),
            ..Default::default()
        };
        if missing.is_empty() {
            // The peer is behind us; it will pull on its own cycle.
            return Ok(outcome);
        }

        let messages = self.fetch_messages(peer, cancel, &missing).await?;
        #[cfg(feature = "metrics")]
        inc_by!(Metrics, sync_messages_fetched, messages.len() as u64);

        self.merge_in_dependency_order(messages, &mut outcome)?;
        if outcome.num_deferred == 0 {
            self.engine.set_synced(true);
        }
        Ok(outcome)
    }

    /// Walk the exclusion sets down the newest path until the snapshots
    /// disagree on a level, then stop at the divergent node.
    async fn find_divergence_prefix(
        &self,
        peer: &dyn PeerClient,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SyncError> {
        let mut prefix = Vec::new();
        while prefix.len() < SYNC_ID_LENGTH {
            let local = self.engine.snapshot(&prefix);
            let remote = {
                let prefix = prefix.clone();
                self.call(cancel, || peer.get_sync_snapshot_by_prefix(&prefix))
                    .await?
            };
            let remote_hashes = parse_hashes(&remote.excluded_hashes)?;

            let limit = local.excluded_hashes.len().min(remote_hashes.len());
            let divergent = (0..limit)
                .find(|i| local.excluded_hashes[*i] != remote_hashes[*i])
                .unwrap_or(limit);
            let rightmost = self.engine.rightmost_path(&prefix);
            if divergent == 0 || rightmost.is_empty() {
                break;
            }
            if divergent == limit && local.excluded_hashes == remote_hashes {
                // Every level agrees on its siblings, so the difference is
                // confined to the rightmost edge. Descend one level.
                prefix.push(rightmost[0]);
                continue;
            }
            prefix.extend_from_slice(&rightmost[..divergent.min(rightmost.len())]);
            break;
        }
        Ok(prefix)
    }

    /// Diff the subtrees below the divergence prefix and return the sync
    /// ids the peer has that this hub does not.
    async fn collect_missing(
        &self,
        peer: &dyn PeerClient,
        cancel: &CancellationToken,
        divergence_prefix: Vec<u8>,
    ) -> Result<Vec<SyncId>, SyncError> {
        let mut missing = Vec::new();
        let mut queue = vec![divergence_prefix];
        while let Some(prefix) = queue.pop() {
            let remote = {
                let prefix = prefix.clone();
                self.call(cancel, || peer.get_sync_metadata_by_prefix(&prefix))
                    .await?
            };
            let Some(remote) = remote else {
                continue;
            };
            let local = self.engine.metadata(&prefix);
            if let Some(local) = &local {
                if local.hash.to_hex() == remote.hash {
                    continue;
                }
            }
            if remote.num_messages as usize <= self.config.fetch_threshold
                || remote.children.is_empty()
            {
                let ids = {
                    let prefix = prefix.clone();
                    self.call(cancel, || peer.get_all_sync_ids_by_prefix(&prefix))
                        .await?
                        .sync_ids
                };
                verify_subtree(&prefix, &ids, &remote)?;
                missing.extend(
                    ids.into_iter()
                        .filter(|id| !self.engine.contains_sync_id(id)),
                );
                continue;
            }
            let local_children: HashMap<Vec<u8>, Hash> = local
                .map(|l| l.children.into_iter().map(|c| (c.prefix, c.hash)).collect())
                .unwrap_or_default();
            for child in remote.children {
                match local_children.get(&child.prefix) {
                    Some(hash) if hash.to_hex() == child.hash => {}
                    _ => queue.push(child.prefix),
                }
            }
        }
        missing.sort();
        missing.dedup();
        Ok(missing)
    }

    async fn fetch_messages(
        &self,
        peer: &dyn PeerClient,
        cancel: &CancellationToken,
        missing: &[SyncId],
    ) -> Result<Vec<Message>, SyncError> {
        let requested: HashSet<SyncId> = missing.iter().copied().collect();
        let mut messages = Vec::with_capacity(missing.len());
        for chunk in missing.chunks(self.config.max_fetch_batch.max(1)) {
            let response = {
                let chunk = chunk.to_vec();
                self.call(cancel, || peer.get_all_messages_by_sync_ids(&chunk))
                    .await?
            };
            if response.messages.len() < chunk.len() {
                return Err(SyncError::SyncIdNotFound);
            }
            for bytes in response.messages {
                let message = Message::decode_canonical(&bytes)
                    .map_err(|_| SyncError::BadResponse("undecodable message"))?;
                let set = message
                    .typ()
                    .map(trie_set_of)
                    .ok_or(SyncError::BadResponse("unknown message type"))?;
                if !requested.contains(&SyncId::of(&message, set)) {
                    return Err(SyncError::MessageRootMismatch);
                }
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Merge fetched messages, signer messages first, re-queueing
    /// authorization failures for a bounded number of rounds.
    fn merge_in_dependency_order(
        &self,
        messages: Vec<Message>,
        outcome: &mut SyncOutcome,
    ) -> Result<(), SyncError> {
        let (signers, others): (Vec<_>, Vec<_>) = messages.into_iter().partition(|m| {
            matches!(
                m.typ(),
                Some(MessageType::SignerAdd) | Some(MessageType::SignerRemove)
            )
        });
        let mut queue: Vec<Message> = signers.into_iter().chain(others).collect();
        let mut rounds = 0;
        loop {
            let mut deferred = Vec::new();
            for message in queue {
                match self.engine.merge_message(message.clone()) {
                    Ok(summary) => {
                        if summary.merged {
                            outcome.num_merged += 1;
                        }
                    }
                    Err(err) if err.is_unauthorized() => deferred.push(message),
                    Err(err) if err.is_rejection() => {
                        debug!(hash = %message.hash20().fmt_short(), ?err, "peer message rejected");
                        outcome.num_rejected += 1;
                    }
                    Err(err) => return Err(SyncError::Engine(err)),
                }
            }
            if deferred.is_empty() || rounds >= self.config.max_requeue_rounds {
                #[cfg(feature = "metrics")]
                inc_by!(Metrics, sync_messages_deferred, deferred.len() as u64);
                outcome.num_deferred = deferred.len();
                return Ok(());
            }
            rounds += 1;
            queue = deferred;
        }
    }

    /// Periodically sync against a random peer until cancelled. The first
    /// cycle runs immediately, covering the startup trigger.
    pub async fn run(
        &self,
        peers: Vec<Arc<dyn PeerClient>>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let candidates: Vec<_> = {
                let faulty = self.faulty.lock();
                peers
                    .iter()
                    .filter(|p| !faulty.contains(&p.peer_id()))
                    .cloned()
                    .collect()
            };
            let Some(peer) = candidates.choose(&mut rand::thread_rng()).cloned() else {
                continue;
            };
            match self.sync_with(peer.as_ref(), &cancel).await {
                Ok(outcome) if outcome.num_missing > 0 => {
                    info!(
                        peer = %peer.peer_id(),
                        merged = outcome.num_merged,
                        "diff sync imported messages"
                    );
                }
                Ok(_) => {}
                Err(SyncError::Cancelled) => break,
                Err(err) => {
                    warn!(peer = %peer.peer_id(), ?err, "diff sync cycle failed");
                }
            }
        }
    }

    async fn call<T, Fut>(
        &self,
        cancel: &CancellationToken,
        mut f: impl FnMut() -> Fut,
    ) -> Result<T, SyncError>
    where
        Fut: std::future::Future<Output = Result<T, RpcError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                result = tokio::time::timeout(self.config.rpc_deadline, f()) => {
                    result.unwrap_or(Err(RpcError::Timeout))
                }
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.config.rpc_retries {
                        return Err(err.into());
                    }
                    let jitter = rand::thread_rng().gen_range(0..100);
                    let backoff = self.config.rpc_backoff * 2u32.saturating_pow(attempt)
                        + Duration::from_millis(jitter);
                    debug!(?err, attempt, "rpc failed, backing off");
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}

/// The sync trie set a message type indexes into.
pub fn trie_set_of(typ: MessageType) -> TrieSet {
    match typ {
        MessageType::SignerAdd | MessageType::SignerRemove => TrieSet::Signer,
        MessageType::UserDataAdd => TrieSet::UserData,
        MessageType::CastAdd | MessageType::CastRemove => TrieSet::Cast,
        MessageType::ReactionAdd | MessageType::ReactionRemove => TrieSet::Reaction,
        MessageType::VerificationAddEthAddress | MessageType::VerificationRemove => {
            TrieSet::Verification
        }
        MessageType::None => TrieSet::Cast,
    }
}

fn parse_hashes(hex_hashes: &[String]) -> Result<Vec<Hash>, SyncError> {
    hex_hashes
        .iter()
        .map(|h| {
            h.parse()
                .map_err(|_| SyncError::BadResponse("unparsable digest"))
        })
        .collect()
}

/// Rebuild the peer's subtree from its leaves and require the digest it
/// advertised.
fn verify_subtree(
    prefix: &[u8],
    ids: &[SyncId],
    remote: &TrieNodeMetadataResponse,
) -> Result<(), SyncError> {
    if ids.iter().any(|id| !id.as_bytes().starts_with(prefix)) {
        return Err(SyncError::BadResponse("sync id outside requested prefix"));
    }
    let mut trie = SyncTrie::new();
    for id in ids {
        trie.insert(*id);
    }
    let subtree_hash = match trie.metadata(prefix) {
        Some(meta) => meta.hash,
        None => Hash::zero(),
    };
    if subtree_hash.to_hex() != remote.hash {
        return Err(SyncError::TrieRootMismatch);
    }
    Ok(())
}
