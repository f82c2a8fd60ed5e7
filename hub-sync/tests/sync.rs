use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use hub_core::proto::FarcasterNetwork;
use hub_sync::engine::{Clock, Engine, EngineOptions, StoreLimits};
use hub_sync::registry::IdRegistryEvent;
use hub_sync::rpc::{
    HubInfoResponse, HubService, MessagesResponse, SyncIdsResponse, TrieNodeMetadataResponse,
    TrieSnapshotResponse,
};
use hub_sync::store::kv::MemKv;
use hub_sync::sync::{DiffSync, PeerClient, RpcError, SyncConfig, SyncError};
use hub_sync::trie::SyncId;
use hub_test::factory;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

const NOW: u64 = 2_000_000_000;

fn spawn_hub(nickname: &str) -> (Engine, HubService) {
    let (clock, _) = Clock::manual(NOW);
    let engine = Engine::with_options(
        FarcasterNetwork::Devnet,
        MemKv::new(),
        StoreLimits::default(),
        EngineOptions {
            clock,
            ..Default::default()
        },
    );
    let service = HubService::new(engine.clone(), nickname);
    (engine, service)
}

/// In-process transport: serves another hub's RPC surface directly.
#[derive(Debug, Clone)]
struct LocalClient {
    id: String,
    service: HubService,
}

impl LocalClient {
    fn new(id: &str, service: HubService) -> Self {
        LocalClient {
            id: id.to_string(),
            service,
        }
    }
}

#[async_trait]
impl PeerClient for LocalClient {
    fn peer_id(&self) -> String {
        self.id.clone()
    }

    async fn get_info(&self) -> Result<HubInfoResponse, RpcError> {
        Ok(self.service.get_info())
    }

    async fn get_all_sync_ids_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<SyncIdsResponse, RpcError> {
        Ok(self.service.get_all_sync_ids_by_prefix(prefix))
    }

    async fn get_all_messages_by_sync_ids(
        &self,
        sync_ids: &[SyncId],
    ) -> Result<MessagesResponse, RpcError> {
        Ok(self.service.get_all_messages_by_sync_ids(sync_ids))
    }

    async fn get_sync_metadata_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Option<TrieNodeMetadataResponse>, RpcError> {
        Ok(self.service.get_sync_metadata_by_prefix(prefix))
    }

    async fn get_sync_snapshot_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<TrieSnapshotResponse, RpcError> {
        Ok(self.service.get_sync_snapshot_by_prefix(prefix))
    }
}

fn quick_config() -> SyncConfig {
    SyncConfig {
        rpc_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

struct Account {
    custody: k256::ecdsa::SigningKey,
    signer: SigningKey,
}

fn provision(engines: &[&Engine], fid: u64, block: u64) -> Account {
    let account = Account {
        custody: factory::custody(),
        signer: factory::signer(),
    };
    for engine in engines {
        engine
            .merge_id_registry_event(&IdRegistryEvent::Register {
                fid,
                to: factory::custody_address(&account.custody),
                block_number: block,
            })
            .unwrap();
        engine
            .merge_message(factory::signer_add(
                fid,
                factory::signer_id(&account.signer),
                1_000,
                &account.custody,
            ))
            .unwrap();
    }
    account
}

#[tokio::test]
async fn sync_identical_hubs_is_a_noop() {
    let (engine_a, _) = spawn_hub("a");
    let (engine_b, service_b) = spawn_hub("b");
    let account = provision(&[&engine_a, &engine_b], 1, 1);
    for engine in [&engine_a, &engine_b] {
        engine
            .merge_message(factory::cast_add(1, "same", 2_000, &account.signer))
            .unwrap();
    }
    assert_eq!(engine_a.root_hash(), engine_b.root_hash());

    let syncer = DiffSync::new(engine_a.clone(), quick_config());
    let client = LocalClient::new("b", service_b);
    let outcome = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.num_missing, 0);
    assert!(engine_a.is_synced());
}

#[tokio::test]
async fn sync_imports_missing_messages() {
    let _guard = hub_test::logging::setup();
    let (engine_a, _) = spawn_hub("a");
    let (engine_b, service_b) = spawn_hub("b");
    let account = provision(&[&engine_a, &engine_b], 1, 1);

    // Some shared history, then B runs ahead.
    for i in 0..5u32 {
        let cast = factory::cast_add(1, &format!("shared {i}"), 2_000 + i, &account.signer);
        engine_a.merge_message(cast.clone()).unwrap();
        engine_b.merge_message(cast).unwrap();
    }
    for i in 0..30u32 {
        engine_b
            .merge_message(factory::cast_add(
                1,
                &format!("b only {i}"),
                3_000 + i,
                &account.signer,
            ))
            .unwrap();
    }
    assert_ne!(engine_a.root_hash(), engine_b.root_hash());

    let syncer = DiffSync::new(engine_a.clone(), quick_config());
    let client = LocalClient::new("b", service_b);
    let outcome = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.num_missing, 30);
    assert_eq!(outcome.num_merged, 30);
    assert_eq!(outcome.num_rejected, 0);
    assert_eq!(engine_a.root_hash(), engine_b.root_hash());
    assert!(engine_a.is_synced());
}

#[tokio::test]
async fn sync_pulls_signers_before_dependent_messages() {
    let (engine_a, _) = spawn_hub("a");
    let (engine_b, service_b) = spawn_hub("b");

    // A knows the fid but nothing else; B has the signer and its casts.
    let account = Account {
        custody: factory::custody(),
        signer: factory::signer(),
    };
    for engine in [&engine_a, &engine_b] {
        engine
            .merge_id_registry_event(&IdRegistryEvent::Register {
                fid: 1,
                to: factory::custody_address(&account.custody),
                block_number: 1,
            })
            .unwrap();
    }
    engine_b
        .merge_message(factory::signer_add(
            1,
            factory::signer_id(&account.signer),
            1_000,
            &account.custody,
        ))
        .unwrap();
    for i in 0..10u32 {
        engine_b
            .merge_message(factory::cast_add(
                1,
                &format!("cast {i}"),
                2_000 + i,
                &account.signer,
            ))
            .unwrap();
    }

    let syncer = DiffSync::new(engine_a.clone(), quick_config());
    let client = LocalClient::new("b", service_b);
    let outcome = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.num_merged, 11);
    assert_eq!(outcome.num_deferred, 0);
    assert_eq!(engine_a.root_hash(), engine_b.root_hash());
}

#[tokio::test]
async fn divergence_prefix_is_deep_for_close_tries() {
    let _guard = hub_test::logging::setup();
    let (engine_a, _) = spawn_hub("a");
    let (engine_b, service_b) = spawn_hub("b");
    let account = provision(&[&engine_a, &engine_b], 1, 1);

    // Timestamps sharing their first three decimal digits keep the tries
    // identical down to the third trie level.
    for i in 0..10u32 {
        let cast = factory::cast_add(1, &format!("shared {i}"), 1_230_000_000 + i, &account.signer);
        engine_a.merge_message(cast.clone()).unwrap();
        engine_b.merge_message(cast).unwrap();
    }
    engine_b
        .merge_message(factory::cast_add(
            1,
            "b only",
            1_239_999_999,
            &account.signer,
        ))
        .unwrap();

    let syncer = DiffSync::new(engine_a.clone(), quick_config());
    let client = LocalClient::new("b", service_b);
    let outcome = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap();
    // The walk got past the shared prefix before diffing subtrees, and
    // only the single missing message crossed the wire.
    assert!(outcome.divergence_prefix.starts_with(b"123"));
    assert_eq!(outcome.num_missing, 1);
    assert_eq!(outcome.num_merged, 1);
    assert_eq!(engine_a.root_hash(), engine_b.root_hash());
}

/// A peer that serves a consistent trie but invents sync ids on fetch.
#[derive(Debug, Clone)]
struct LyingClient {
    inner: LocalClient,
}

#[async_trait]
impl PeerClient for LyingClient {
    fn peer_id(&self) -> String {
        "liar".to_string()
    }

    async fn get_info(&self) -> Result<HubInfoResponse, RpcError> {
        self.inner.get_info().await
    }

    async fn get_all_sync_ids_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<SyncIdsResponse, RpcError> {
        // Claim an extra leaf that the advertised digests do not cover.
        let mut response = self.inner.get_all_sync_ids_by_prefix(prefix).await?;
        if let Some(id) = response.sync_ids.first().copied() {
            let mut bytes = *id.as_bytes();
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;
            response.sync_ids.push(SyncId::from_slice(&bytes).unwrap());
        }
        Ok(response)
    }

    async fn get_all_messages_by_sync_ids(
        &self,
        sync_ids: &[SyncId],
    ) -> Result<MessagesResponse, RpcError> {
        self.inner.get_all_messages_by_sync_ids(sync_ids).await
    }

    async fn get_sync_metadata_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Option<TrieNodeMetadataResponse>, RpcError> {
        self.inner.get_sync_metadata_by_prefix(prefix).await
    }

    async fn get_sync_snapshot_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<TrieSnapshotResponse, RpcError> {
        self.inner.get_sync_snapshot_by_prefix(prefix).await
    }
}

#[tokio::test]
async fn inconsistent_peer_is_quarantined() {
    let (engine_a, _) = spawn_hub("a");
    let (engine_b, service_b) = spawn_hub("b");
    let account = provision(&[&engine_b], 1, 1);
    engine_b
        .merge_message(factory::cast_add(1, "bait", 2_000, &account.signer))
        .unwrap();

    let syncer = DiffSync::new(engine_a.clone(), quick_config());
    let client = LyingClient {
        inner: LocalClient::new("liar", service_b),
    };
    let err = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_integrity(), "got {err:?}");
    assert!(syncer.is_faulty("liar"));

    // The session refuses further contact.
    let err = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::FaultyPeer));
}

/// A peer that fails a fixed number of calls before recovering.
#[derive(Debug)]
struct FlakyClient {
    inner: LocalClient,
    failures_left: Arc<Mutex<u32>>,
}

#[async_trait]
impl PeerClient for FlakyClient {
    fn peer_id(&self) -> String {
        "flaky".to_string()
    }

    async fn get_info(&self) -> Result<HubInfoResponse, RpcError> {
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(RpcError::Unavailable("connection refused".into()));
            }
        }
        self.inner.get_info().await
    }

    async fn get_all_sync_ids_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<SyncIdsResponse, RpcError> {
        self.inner.get_all_sync_ids_by_prefix(prefix).await
    }

    async fn get_all_messages_by_sync_ids(
        &self,
        sync_ids: &[SyncId],
    ) -> Result<MessagesResponse, RpcError> {
        self.inner.get_all_messages_by_sync_ids(sync_ids).await
    }

    async fn get_sync_metadata_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Option<TrieNodeMetadataResponse>, RpcError> {
        self.inner.get_sync_metadata_by_prefix(prefix).await
    }

    async fn get_sync_snapshot_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<TrieSnapshotResponse, RpcError> {
        self.inner.get_sync_snapshot_by_prefix(prefix).await
    }
}

#[tokio::test]
async fn transient_rpc_failures_are_retried() {
    let (engine_a, _) = spawn_hub("a");
    let (engine_b, service_b) = spawn_hub("b");
    let account = provision(&[&engine_a, &engine_b], 1, 1);
    engine_b
        .merge_message(factory::cast_add(1, "late", 2_000, &account.signer))
        .unwrap();

    let syncer = DiffSync::new(engine_a.clone(), quick_config());
    let client = FlakyClient {
        inner: LocalClient::new("flaky", service_b),
        failures_left: Arc::new(Mutex::new(2)),
    };
    let outcome = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.num_merged, 1);
    assert_eq!(engine_a.root_hash(), engine_b.root_hash());
}

#[tokio::test]
async fn exhausted_retries_surface_the_rpc_error() {
    let (engine_a, _) = spawn_hub("a");
    let (_, service_b) = spawn_hub("b");

    let syncer = DiffSync::new(engine_a, quick_config());
    let client = FlakyClient {
        inner: LocalClient::new("flaky", service_b),
        failures_left: Arc::new(Mutex::new(u32::MAX)),
    };
    let err = syncer
        .sync_with(&client, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Rpc(RpcError::Unavailable(_))));
    // Transient failure does not quarantine.
    assert!(!syncer.is_faulty("flaky"));
}

#[tokio::test]
async fn cancellation_ends_the_cycle() {
    let (engine_a, _) = spawn_hub("a");
    let (_, service_b) = spawn_hub("b");

    let syncer = DiffSync::new(engine_a, quick_config());
    let client = LocalClient::new("b", service_b);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = syncer.sync_with(&client, &cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
}
