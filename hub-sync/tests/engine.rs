use ed25519_dalek::SigningKey;
use hub_core::keys::Hash;
use hub_core::proto::{FarcasterNetwork, UserDataType};
use hub_core::validation::ValidationError;
use hub_sync::engine::{Clock, Engine, EngineError, EngineOptions, HubEvent, StoreLimits};
use hub_sync::registry::IdRegistryEvent;
use hub_sync::store::kv::{Batch, Kv, KvError, MemKv};
use hub_sync::store::{SetLimits, StoreError};
use hub_test::factory;

const NOW: u64 = 10_000_000;

fn test_engine(limits: StoreLimits) -> Engine {
    let (clock, _) = Clock::manual(NOW);
    Engine::with_options(
        FarcasterNetwork::Devnet,
        MemKv::new(),
        limits,
        EngineOptions {
            clock,
            ..Default::default()
        },
    )
}

fn register(engine: &Engine, fid: u64, custody: &k256::ecdsa::SigningKey, block: u64) {
    engine
        .merge_id_registry_event(&IdRegistryEvent::Register {
            fid,
            to: factory::custody_address(custody),
            block_number: block,
        })
        .unwrap();
}

fn authorize(engine: &Engine, fid: u64, signer: &SigningKey, custody: &k256::ecdsa::SigningKey) {
    engine
        .merge_message(factory::signer_add(
            fid,
            factory::signer_id(signer),
            1_000,
            custody,
        ))
        .unwrap();
}

#[test]
fn signer_authorization_loop() {
    let engine = test_engine(StoreLimits::default());
    let custody = factory::custody();
    let signer = factory::signer();
    let mut events = engine.subscribe();
    register(&engine, 1, &custody, 1);

    let root0 = engine.root_hash();
    engine
        .merge_message(factory::signer_add(
            1,
            factory::signer_id(&signer),
            1_000,
            &custody,
        ))
        .unwrap();
    let root1 = engine.root_hash();
    assert_ne!(root0, root1);

    let cast = factory::cast_add(1, "hi", 1_100, &signer);
    let cast_hash = cast.hash20();
    engine.merge_message(cast).unwrap();
    let root2 = engine.root_hash();
    assert_ne!(root1, root2);
    assert!(engine.get_cast(1, &cast_hash).is_some());
    assert_eq!(engine.num_messages(), 2);

    // Removing the signer tombstones the add and discards the cast.
    let summary = engine
        .merge_message(factory::signer_remove(
            1,
            factory::signer_id(&signer),
            1_200,
            &custody,
        ))
        .unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.revoked, 1);
    assert!(engine.active_signers(1).is_empty());
    assert!(engine.get_cast(1, &cast_hash).is_none());
    // Only the SignerRemove tombstone is left in the trie.
    assert_eq!(engine.num_messages(), 1);
    assert_ne!(engine.root_hash(), root2);

    // The cast went out as a revocation, not a prune or conflict.
    let mut saw_revoke = false;
    while let Ok(event) = events.try_recv() {
        if let HubEvent::RevokeMessage { message } = event {
            assert_eq!(message.hash20(), cast_hash);
            saw_revoke = true;
        }
    }
    assert!(saw_revoke);

    // New messages from the removed signer are unauthorized.
    let err = engine
        .merge_message(factory::cast_add(1, "again", 1_300, &signer))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnauthorizedSigner { fid: 1 })
    ));
}

#[test]
fn cast_remove_beats_later_readd() {
    let engine = test_engine(StoreLimits::default());
    let custody = factory::custody();
    let signer = factory::signer();
    register(&engine, 1, &custody, 1);
    authorize(&engine, 1, &signer, &custody);

    let add = factory::cast_add(1, "doomed", 2_000, &signer);
    let add_hash = add.hash20();
    engine.merge_message(add.clone()).unwrap();

    // The remove is older than the add and still wins.
    engine
        .merge_message(factory::cast_remove(1, add_hash, 1_500, &signer))
        .unwrap();
    assert!(engine.get_cast(1, &add_hash).is_none());

    let err = engine.merge_message(add).unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Conflict)));
}

#[test]
fn fid_transfer_cascade() {
    let engine = test_engine(StoreLimits::default());
    let custody_a = factory::custody();
    let custody_b = factory::custody();
    let signer = factory::signer();
    register(&engine, 1, &custody_a, 1);
    authorize(&engine, 1, &signer, &custody_a);
    engine
        .merge_message(factory::cast_add(1, "pre-transfer", 1_100, &signer))
        .unwrap();
    engine
        .merge_message(factory::user_data(
            1,
            UserDataType::Bio,
            "bio",
            1_200,
            &signer,
        ))
        .unwrap();
    assert_eq!(engine.num_messages(), 3);

    let revoked = engine
        .merge_id_registry_event(&IdRegistryEvent::Transfer {
            fid: 1,
            to: factory::custody_address(&custody_b),
            block_number: 2,
        })
        .unwrap();
    // The SignerAdd and, transitively, both Ed25519 messages are gone.
    assert_eq!(revoked, 3);
    assert!(engine.active_signers(1).is_empty());
    assert_eq!(engine.num_messages(), 0);
    assert_eq!(engine.root_hash(), Hash::zero());

    // The old custody can no longer authorize signers, the new one can.
    let err = engine
        .merge_message(factory::signer_add(
            1,
            factory::signer_id(&signer),
            2_000,
            &custody_a,
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnauthorizedSigner { fid: 1 })
    ));
    engine
        .merge_message(factory::signer_add(
            1,
            factory::signer_id(&signer),
            2_000,
            &custody_b,
        ))
        .unwrap();
}

#[test]
fn capacity_overflow_eviction_is_permanent() {
    let limits = StoreLimits {
        signers: SetLimits::capacity(3),
        ..Default::default()
    };
    let engine = test_engine(limits);
    let custody = factory::custody();
    register(&engine, 1, &custody, 1);

    let mut adds = Vec::new();
    for i in 0..4u32 {
        let signer = factory::signer();
        let add = factory::signer_add(1, factory::signer_id(&signer), 100 * (i + 1), &custody);
        adds.push(add.clone());
        engine.merge_message(add).unwrap();
    }
    assert_eq!(engine.num_messages(), 3);

    let err = engine.merge_message(adds[0].clone()).unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Evicted)));
}

#[test]
fn unauthorized_and_unknown_fid() {
    let engine = test_engine(StoreLimits::default());
    let custody = factory::custody();
    let signer = factory::signer();

    // No registry entry yet: EIP-712 messages cannot bind.
    let err = engine
        .merge_message(factory::signer_add(
            1,
            factory::signer_id(&signer),
            1_000,
            &custody,
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnknownFid(1))
    ));

    // No signer yet: Ed25519 messages cannot bind.
    register(&engine, 1, &custody, 1);
    let err = engine
        .merge_message(factory::cast_add(1, "early", 1_000, &signer))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnauthorizedSigner { fid: 1 })
    ));
}

#[test]
fn merge_is_idempotent_and_order_insensitive() {
    let custody = factory::custody();
    let signer = factory::signer();
    let cast_a = factory::cast_add(1, "first", 1_100, &signer);
    let cast_b = factory::cast_add(1, "second", 1_200, &signer);

    let mut roots = Vec::new();
    for order in [
        [cast_a.clone(), cast_b.clone()],
        [cast_b.clone(), cast_a.clone()],
    ] {
        let engine = test_engine(StoreLimits::default());
        register(&engine, 1, &custody, 1);
        authorize(&engine, 1, &signer, &custody);
        for message in order {
            engine.merge_message(message).unwrap();
        }
        // Replaying is a no-op.
        let replay = engine.merge_message(cast_a.clone()).unwrap();
        assert!(!replay.merged);
        roots.push(engine.root_hash());
    }
    assert_eq!(roots[0], roots[1]);
}

#[test]
fn trie_leaves_match_store_contents() {
    let engine = test_engine(StoreLimits::default());
    let custody = factory::custody();
    let signer = factory::signer();
    register(&engine, 1, &custody, 1);
    authorize(&engine, 1, &signer, &custody);

    for i in 0..10u32 {
        engine
            .merge_message(factory::cast_add(1, &format!("cast {i}"), 2_000 + i, &signer))
            .unwrap();
    }
    let ids = engine.sync_ids_by_prefix(&[]);
    assert_eq!(ids.len(), engine.num_messages());
    // Every sync id resolves back to a stored message.
    let messages = engine.messages_by_sync_ids(&ids);
    assert_eq!(messages.len(), ids.len());
    // Chronological walk.
    let timestamps: Vec<u32> = ids.iter().map(|id| id.timestamp()).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);
}

#[test]
fn expired_messages_are_rejected() {
    // A clock past the 90-day reaction TTL relative to early timestamps.
    let late = 8_000_000_000;
    let (clock, _) = Clock::manual(late);
    let engine = Engine::with_options(
        FarcasterNetwork::Devnet,
        MemKv::new(),
        StoreLimits::default(),
        EngineOptions {
            clock,
            ..Default::default()
        },
    );
    let custody = factory::custody();
    let signer = factory::signer();
    register(&engine, 1, &custody, 1);
    authorize(&engine, 1, &signer, &custody);

    let stale = factory::reaction(
        hub_core::proto::MessageType::ReactionAdd,
        1,
        hub_core::proto::ReactionType::Like,
        (2, Hash::new(b"target")),
        1,
        &signer,
    );
    let err = engine.merge_message(stale).unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Expired)));
}

#[derive(Debug, Clone, Default)]
struct BrokenKv;

impl Kv for BrokenKv {
    fn apply(&self, _batch: Batch) -> Result<(), KvError> {
        Err(KvError::Corruption("checksum mismatch".into()))
    }
    fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(None)
    }
    fn len(&self) -> Result<usize, KvError> {
        Ok(0)
    }
}

#[test]
fn storage_corruption_halts_the_hub() {
    let (clock, _) = Clock::manual(NOW);
    let engine = Engine::with_options(
        FarcasterNetwork::Devnet,
        BrokenKv,
        StoreLimits::default(),
        EngineOptions {
            clock,
            ..Default::default()
        },
    );
    let custody = factory::custody();

    let err = engine
        .merge_id_registry_event(&IdRegistryEvent::Register {
            fid: 1,
            to: factory::custody_address(&custody),
            block_number: 1,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::Storage(KvError::Corruption(_))));
    assert!(engine.is_halted());

    // Everything after the fault fails fast.
    let err = engine
        .merge_id_registry_event(&IdRegistryEvent::Register {
            fid: 2,
            to: factory::custody_address(&custody),
            block_number: 2,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::Halted));
}
