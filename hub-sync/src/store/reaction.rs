//! The reaction store.
//!
//! Two-phase set over `ReactionAdd` / `ReactionRemove`, keyed by
//! `(fid, reaction type, target cast)`. Last writer wins, ties favoring
//! the remove, then the higher hash.

use hub_core::proto::{Body, CastId, Message, MessageType, ReactionType};

use super::{fid_prefix, MessageSet, SetKind, StorePolicy};
use crate::trie::TrieSet;

/// Policy for the reaction CRDT.
#[derive(Debug, Clone, Copy)]
pub struct ReactionPolicy;

impl StorePolicy for ReactionPolicy {
    const NAME: &'static str = "reactions";
    const TRIE_SET: TrieSet = TrieSet::Reaction;

    fn set_kind(typ: MessageType) -> Option<SetKind> {
        match typ {
            MessageType::ReactionAdd => Some(SetKind::Add),
            MessageType::ReactionRemove => Some(SetKind::Remove),
            _ => None,
        }
    }

    fn conflict_key(message: &Message) -> Option<Vec<u8>> {
        let data = message.data.as_ref()?;
        let Some(Body::ReactionBody(body)) = &data.body else {
            return None;
        };
        let target = body.target_cast_id.as_ref()?;
        Some(conflict_key(data.fid, body.r#type as u8, target))
    }
}

/// Conflict key for a reaction entry.
pub fn conflict_key(fid: u64, reaction_type: u8, target: &CastId) -> Vec<u8> {
    let mut key = fid_prefix(fid).to_vec();
    key.push(reaction_type);
    key.extend_from_slice(&target.fid.to_be_bytes());
    key.extend_from_slice(&target.hash);
    key
}

/// The reaction CRDT.
pub type ReactionStore = MessageSet<ReactionPolicy>;

impl ReactionStore {
    /// Whether the fid currently has the given reaction on the target.
    pub fn has_reaction(&self, fid: u64, reaction_type: ReactionType, target: &CastId) -> bool {
        self.get_add(&conflict_key(fid, reaction_type as u8, target))
            .is_some()
    }
}
