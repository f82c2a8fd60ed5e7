//! The signer store.
//!
//! Two-phase set over `SignerAdd` / `SignerRemove`, keyed by
//! `(fid, signer key)`. This store gates every Ed25519 message: a signer
//! must be in the add set for its messages to be authorized, and a signer
//! leaving the add set cascades into the other stores.

use hub_core::keys::SignerId;
use hub_core::proto::{Body, Message, MessageType};

use super::{fid_prefix, MessageSet, SetKind, StorePolicy};
use crate::trie::TrieSet;

/// Policy for the signer CRDT.
#[derive(Debug, Clone, Copy)]
pub struct SignerPolicy;

impl StorePolicy for SignerPolicy {
    const NAME: &'static str = "signers";
    const TRIE_SET: TrieSet = TrieSet::Signer;

    fn set_kind(typ: MessageType) -> Option<SetKind> {
        match typ {
            MessageType::SignerAdd => Some(SetKind::Add),
            MessageType::SignerRemove => Some(SetKind::Remove),
            _ => None,
        }
    }

    fn conflict_key(message: &Message) -> Option<Vec<u8>> {
        let data = message.data.as_ref()?;
        let Some(Body::SignerBody(body)) = &data.body else {
            return None;
        };
        Some(conflict_key(data.fid, &body.signer))
    }
}

/// Conflict key for a signer entry.
pub fn conflict_key(fid: u64, signer: &[u8]) -> Vec<u8> {
    let mut key = fid_prefix(fid).to_vec();
    key.extend_from_slice(signer);
    key
}

/// The signer CRDT.
pub type SignerStore = MessageSet<SignerPolicy>;

impl SignerStore {
    /// Whether `signer` is in the add set for `fid`.
    pub fn is_active(&self, fid: u64, signer: &[u8]) -> bool {
        self.get_add(&conflict_key(fid, signer)).is_some()
    }

    /// All active signer keys for an fid.
    pub fn active_signers(&self, fid: u64) -> Vec<SignerId> {
        self.adds_by_fid(fid)
            .filter_map(|message| match &message.data.as_ref()?.body {
                Some(Body::SignerBody(body)) => SignerId::from_slice(&body.signer).ok(),
                _ => None,
            })
            .collect()
    }
}

/// The signer key authorized or revoked by a signer message.
pub fn body_signer(message: &Message) -> Option<&[u8]> {
    match &message.data.as_ref()?.body {
        Some(Body::SignerBody(body)) => Some(&body.signer),
        _ => None,
    }
}
