//! Worker pool driving the merge engine.
//!
//! Merge work is CPU-bound and runs on dedicated threads, one per fid
//! shard, each draining its own inbox. Messages route to the shard of
//! their fid, so merges for one fid are processed in arrival order;
//! on-chain registry events all route through shard zero, preserving
//! block order, and are drained ahead of messages queued behind them.

use hub_core::keys::Hash;
use hub_core::proto::Message;
use tokio::sync::oneshot;
use tracing::{debug, error_span, trace, warn};

use crate::engine::{Engine, EngineError, MergeSummary};
use crate::registry::IdRegistryEvent;

#[derive(derive_more::Debug, derive_more::Display)]
enum Action {
    #[display("MergeMessage")]
    MergeMessage {
        message: Message,
        #[debug("reply")]
        reply: oneshot::Sender<Result<MergeSummary, EngineError>>,
    },
    #[display("MergeEncoded")]
    MergeEncoded {
        bytes: bytes::Bytes,
        #[debug("reply")]
        reply: oneshot::Sender<Result<MergeSummary, EngineError>>,
    },
    #[display("MergeIdRegistryEvent")]
    MergeIdRegistryEvent {
        event: IdRegistryEvent,
        #[debug("reply")]
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    #[display("Prune")]
    Prune {
        now: u64,
        #[debug("reply")]
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    #[display("Shutdown")]
    Shutdown,
}

/// Errors talking to the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// The pool already shut down.
    #[error("hub workers are gone")]
    Closed,
    /// The engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Handle to the worker pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HubHandle {
    shards: Vec<flume::Sender<Action>>,
    engine: Engine,
}

impl HubHandle {
    /// Spawn `num_shards` worker threads over the engine.
    pub fn spawn(engine: Engine, num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        let mut shards = Vec::with_capacity(num_shards);
        for shard in 0..num_shards {
            let (tx, rx) = flume::bounded(1024);
            let engine = engine.clone();
            std::thread::Builder::new()
                .name(format!("hub-shard-{shard}"))
                .spawn(move || {
                    let span = error_span!("hub-shard", shard);
                    let _enter = span.enter();
                    run_worker(engine, rx);
                })
                .expect("failed to spawn worker thread");
            shards.push(tx);
        }
        HubHandle { shards, engine }
    }

    /// The engine behind the pool, for read-side queries.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Merge a message on its fid's shard.
    pub async fn merge_message(&self, message: Message) -> Result<MergeSummary, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send_to_shard(message.fid(), Action::MergeMessage { message, reply })
            .await?;
        rx.await.map_err(|_| ActorError::Closed)?.map_err(Into::into)
    }

    /// Merge a canonical-encoded message from gossip.
    ///
    /// Routing needs the fid, so the envelope is peeked before the shard
    /// hop; undecodable payloads are rejected here.
    pub async fn merge_encoded(&self, bytes: bytes::Bytes) -> Result<MergeSummary, ActorError> {
        let fid = Message::decode_canonical(&bytes)
            .map_err(|_| {
                EngineError::from(hub_core::validation::ValidationError::MalformedBytes(
                    "undecodable message payload",
                ))
            })?
            .fid();
        let (reply, rx) = oneshot::channel();
        self.send_to_shard(fid, Action::MergeEncoded { bytes, reply })
            .await?;
        rx.await.map_err(|_| ActorError::Closed)?.map_err(Into::into)
    }

    /// Apply an on-chain registry event. All events run on shard zero so
    /// block order is preserved.
    pub async fn merge_id_registry_event(
        &self,
        event: IdRegistryEvent,
    ) -> Result<usize, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(0, Action::MergeIdRegistryEvent { event, reply })
            .await?;
        rx.await.map_err(|_| ActorError::Closed)?.map_err(Into::into)
    }

    /// Run a TTL and capacity sweep.
    pub async fn prune(&self, now: u64) -> Result<usize, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(0, Action::Prune { now, reply }).await?;
        rx.await.map_err(|_| ActorError::Closed)?.map_err(Into::into)
    }

    /// The current trie root hash.
    pub fn root_hash(&self) -> Hash {
        self.engine.root_hash()
    }

    /// Stop all workers after their queues drain.
    pub async fn shutdown(&self) {
        for shard in &self.shards {
            let _ = shard.send_async(Action::Shutdown).await;
        }
    }

    async fn send_to_shard(&self, fid: u64, action: Action) -> Result<(), ActorError> {
        let shard = (fid as usize) % self.shards.len();
        self.send(shard, action).await
    }

    async fn send(&self, shard: usize, action: Action) -> Result<(), ActorError> {
        trace!(shard, %action, "queueing action");
        self.shards[shard]
            .send_async(action)
            .await
            .map_err(|_| ActorError::Closed)
    }
}

fn run_worker(engine: Engine, rx: flume::Receiver<Action>) {
    while let Ok(action) = rx.recv() {
        match action {
            Action::MergeMessage { message, reply } => {
                send_reply(reply, engine.merge_message(message));
            }
            Action::MergeEncoded { bytes, reply } => {
                send_reply(reply, engine.merge_encoded(&bytes));
            }
            Action::MergeIdRegistryEvent { event, reply } => {
                send_reply(reply, engine.merge_id_registry_event(&event));
            }
            Action::Prune { now, reply } => {
                send_reply(reply, engine.prune(now));
            }
            Action::Shutdown => {
                debug!("worker shutting down");
                break;
            }
        }
    }
}

fn send_reply<T: std::fmt::Debug>(sender: oneshot::Sender<T>, value: T) {
    if let Err(value) = sender.send(value) {
        warn!(?value, "reply dropped, caller went away");
    }
}

#[cfg(test)]
mod tests {
    use hub_core::proto::FarcasterNetwork;
    use hub_test::factory;

    use super::*;
    use crate::engine::{Clock, EngineOptions, StoreLimits};
    use crate::registry::IdRegistryEvent;
    use crate::store::kv::MemKv;

    fn test_engine() -> Engine {
        let (clock, _) = Clock::manual(1_000_000);
        Engine::with_options(
            FarcasterNetwork::Devnet,
            MemKv::new(),
            StoreLimits::default(),
            EngineOptions {
                clock,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_merge_via_workers() {
        let handle = HubHandle::spawn(test_engine(), 4);
        let custody = factory::custody();
        let signer = factory::signer();

        handle
            .merge_id_registry_event(IdRegistryEvent::Register {
                fid: 1,
                to: factory::custody_address(&custody),
                block_number: 1,
            })
            .await
            .unwrap();
        handle
            .merge_message(factory::signer_add(
                1,
                factory::signer_id(&signer),
                1_000,
                &custody,
            ))
            .await
            .unwrap();
        let summary = handle
            .merge_message(factory::cast_add(1, "hi", 1_100, &signer))
            .await
            .unwrap();
        assert!(summary.merged);
        assert_eq!(handle.engine().num_messages(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_encoded_roundtrip_via_workers() {
        let handle = HubHandle::spawn(test_engine(), 2);
        let custody = factory::custody();
        let signer = factory::signer();

        handle
            .merge_id_registry_event(IdRegistryEvent::Register {
                fid: 7,
                to: factory::custody_address(&custody),
                block_number: 1,
            })
            .await
            .unwrap();
        let add = factory::signer_add(7, factory::signer_id(&signer), 500, &custody);
        let bytes = bytes::Bytes::from(add.encode_canonical());
        handle.merge_encoded(bytes).await.unwrap();
        assert!(handle
            .engine()
            .active_signers(7)
            .contains(&factory::signer_id(&signer)));

        // Garbage payloads are rejections, not crashes.
        let err = handle
            .merge_encoded(bytes::Bytes::from_static(b"not a message"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActorError::Engine(e) if e.is_rejection()));

        handle.shutdown().await;
    }
}
