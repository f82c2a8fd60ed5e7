//! Request and response types for the sync RPCs, and their handlers.
//!
//! The transport binding (gRPC) lives outside this crate; these types are
//! the wire-agnostic surface it maps onto. Hashes in responses are
//! lowercase hex strings, prefixes and sync ids are raw bytes, and
//! messages travel as their canonical encoding.

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::trie::{NodeMetadata, SyncId, TrieSnapshot};

/// Hub identity and sync status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubInfoResponse {
    /// Semantic version of the hub.
    pub version: String,
    /// Whether the last diff sync cycle saw no divergence.
    pub is_synced: bool,
    /// Operator-chosen nickname.
    pub nickname: String,
    /// Root hash of the sync trie, lowercase hex.
    pub root_hash: String,
}

/// Sync ids under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIdsResponse {
    /// The ids, chronological.
    pub sync_ids: Vec<SyncId>,
}

/// Canonical-encoded messages for requested sync ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Canonical message encodings, in request order; unknown ids are
    /// omitted.
    pub messages: Vec<Vec<u8>>,
}

/// Trie node metadata, recursive to depth 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNodeMetadataResponse {
    /// Path from the root, raw bytes.
    pub prefix: Vec<u8>,
    /// Number of messages below the node.
    pub num_messages: u64,
    /// Aggregated node digest, lowercase hex.
    pub hash: String,
    /// Direct children, without grandchildren.
    pub children: Vec<TrieNodeMetadataResponse>,
}

impl From<NodeMetadata> for TrieNodeMetadataResponse {
    fn from(meta: NodeMetadata) -> Self {
        TrieNodeMetadataResponse {
            prefix: meta.prefix,
            num_messages: meta.num_messages as u64,
            hash: meta.hash.to_hex(),
            children: meta.children.into_iter().map(Into::into).collect(),
        }
    }
}

/// Exclusion-set snapshot under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieSnapshotResponse {
    /// The requested prefix, raw bytes.
    pub prefix: Vec<u8>,
    /// Combined non-rightmost sibling digests per level, lowercase hex.
    pub excluded_hashes: Vec<String>,
    /// Number of messages below the prefix.
    pub num_messages: u64,
    /// Root hash of the whole trie, lowercase hex.
    pub root_hash: String,
}

impl From<TrieSnapshot> for TrieSnapshotResponse {
    fn from(snapshot: TrieSnapshot) -> Self {
        TrieSnapshotResponse {
            prefix: snapshot.prefix,
            excluded_hashes: snapshot
                .excluded_hashes
                .iter()
                .map(|h| h.to_hex())
                .collect(),
            num_messages: snapshot.num_messages as u64,
            root_hash: snapshot.root_hash.to_hex(),
        }
    }
}

/// Server-side handlers for the sync RPCs.
#[derive(Debug, Clone)]
pub struct HubService {
    engine: Engine,
    nickname: String,
}

impl HubService {
    /// A service over an engine.
    pub fn new(engine: Engine, nickname: impl Into<String>) -> Self {
        HubService {
            engine,
            nickname: nickname.into(),
        }
    }

    /// The engine behind this service.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// `GetInfo`.
    pub fn get_info(&self) -> HubInfoResponse {
        HubInfoResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            is_synced: self.engine.is_synced(),
            nickname: self.nickname.clone(),
            root_hash: self.engine.root_hash().to_hex(),
        }
    }

    /// `GetAllSyncIdsByPrefix`.
    pub fn get_all_sync_ids_by_prefix(&self, prefix: &[u8]) -> SyncIdsResponse {
        SyncIdsResponse {
            sync_ids: self.engine.sync_ids_by_prefix(prefix),
        }
    }

    /// `GetAllMessagesBySyncIds`.
    pub fn get_all_messages_by_sync_ids(&self, sync_ids: &[SyncId]) -> MessagesResponse {
        MessagesResponse {
            messages: self
                .engine
                .messages_by_sync_ids(sync_ids)
                .iter()
                .map(|m| m.encode_canonical())
                .collect(),
        }
    }

    /// `GetSyncMetadataByPrefix`.
    pub fn get_sync_metadata_by_prefix(&self, prefix: &[u8]) -> Option<TrieNodeMetadataResponse> {
        self.engine.metadata(prefix).map(Into::into)
    }

    /// `GetSyncSnapshotByPrefix`.
    pub fn get_sync_snapshot_by_prefix(&self, prefix: &[u8]) -> TrieSnapshotResponse {
        self.engine.snapshot(prefix).into()
    }
}
