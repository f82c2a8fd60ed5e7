//! The hub's stateful core: CRDT message stores with per-type conflict
//! resolution, the chronologically ordered sync trie, and the diff sync
//! protocol that reconciles two hubs in time proportional to their
//! divergence.
//!
//! The [`engine::Engine`] is the single entry point for mutations: it
//! validates, authorizes and merges messages, applies on-chain registry
//! events, runs revocation cascades, and keeps the sync trie in lockstep
//! with the stores. [`actor::HubHandle`] runs merges on a pool of fid
//! shard workers; [`sync::DiffSync`] drives reconciliation against peers
//! over the RPC surface in [`rpc`].
//!
//! Transports are external: gossip hands payloads to
//! [`actor::HubHandle::merge_encoded`], and a gRPC binding maps onto
//! [`rpc::HubService`] and the [`sync::PeerClient`] trait.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod actor;
pub mod config;
pub mod engine;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod registry;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod trie;

/// Gossip topic on which hubs advertise their connection info.
pub const GOSSIP_TOPIC_CONTACT: &str = "contact";

/// Gossip topic carrying canonical-encoded messages.
pub const GOSSIP_TOPIC_MESSAGES: &str = "messages";

pub use self::engine::{Engine, EngineError, HubEvent};
pub use self::registry::{IdRegistry, IdRegistryEvent};
pub use self::sync::{DiffSync, PeerClient, SyncConfig, SyncOutcome};
pub use self::trie::{SyncId, SyncTrie};
