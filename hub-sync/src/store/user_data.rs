//! The user data store.
//!
//! Grow-only set over `UserDataAdd`, keyed by `(fid, data type)`: setting a
//! field again replaces the previous value when newer, ties broken by hash.
//! There is no remove set and no bound; an fid can hold at most one value
//! per data type.

use hub_core::proto::{Body, Message, MessageType, UserDataType};

use super::{fid_prefix, MessageSet, SetKind, StorePolicy};
use crate::trie::TrieSet;

/// Policy for the user data CRDT.
#[derive(Debug, Clone, Copy)]
pub struct UserDataPolicy;

impl StorePolicy for UserDataPolicy {
    const NAME: &'static str = "user_data";
    const TRIE_SET: TrieSet = TrieSet::UserData;

    fn set_kind(typ: MessageType) -> Option<SetKind> {
        match typ {
            MessageType::UserDataAdd => Some(SetKind::Add),
            _ => None,
        }
    }

    fn conflict_key(message: &Message) -> Option<Vec<u8>> {
        let data = message.data.as_ref()?;
        let Some(Body::UserDataBody(body)) = &data.body else {
            return None;
        };
        Some(conflict_key(data.fid, body.r#type as u8))
    }
}

/// Conflict key for a user data entry.
pub fn conflict_key(fid: u64, data_type: u8) -> Vec<u8> {
    let mut key = fid_prefix(fid).to_vec();
    key.push(data_type);
    key
}

/// The user data CRDT.
pub type UserDataStore = MessageSet<UserDataPolicy>;

impl UserDataStore {
    /// The current value of one metadata field, if set.
    pub fn get(&self, fid: u64, data_type: UserDataType) -> Option<&str> {
        let message = self.get_add(&conflict_key(fid, data_type as u8))?;
        match &message.data.as_ref()?.body {
            Some(Body::UserDataBody(body)) => Some(&body.value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use hub_test::factory;

    use super::*;
    use crate::store::{SetLimits, StoreError};

    const NOW: u64 = 1_000_000;

    #[test]
    fn test_newer_value_replaces() {
        let signer = factory::signer();
        let mut store = UserDataStore::new(SetLimits::unbounded());

        store
            .merge(
                factory::user_data(1, UserDataType::Bio, "old bio", 1_000, &signer),
                NOW,
            )
            .unwrap();
        store
            .merge(
                factory::user_data(1, UserDataType::Bio, "new bio", 2_000, &signer),
                NOW,
            )
            .unwrap();
        assert_eq!(store.get(1, UserDataType::Bio), Some("new bio"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_timestamp_tie_breaks_on_hash() {
        let signer = factory::signer();
        let mut store = UserDataStore::new(SetLimits::unbounded());

        let a = factory::user_data(1, UserDataType::Bio, "aaa", 1_000, &signer);
        let b = factory::user_data(1, UserDataType::Bio, "bbb", 1_000, &signer);
        let (winner, loser) = if a.hash20() > b.hash20() {
            (a, b)
        } else {
            (b, a)
        };

        store.merge(loser.clone(), NOW).unwrap();
        store.merge(winner.clone(), NOW).unwrap();
        assert!(matches!(store.merge(loser, NOW), Err(StoreError::Conflict)));

        let kept = store.get_add(&conflict_key(1, UserDataType::Bio as u8)).unwrap();
        assert_eq!(kept.hash, winner.hash);
    }

    #[test]
    fn test_fields_are_independent() {
        let signer = factory::signer();
        let mut store = UserDataStore::new(SetLimits::unbounded());

        store
            .merge(
                factory::user_data(1, UserDataType::Display, "name", 1_000, &signer),
                NOW,
            )
            .unwrap();
        store
            .merge(
                factory::user_data(1, UserDataType::Url, "https://x", 1_000, &signer),
                NOW,
            )
            .unwrap();
        assert_eq!(store.get(1, UserDataType::Display), Some("name"));
        assert_eq!(store.get(1, UserDataType::Url), Some("https://x"));
        assert_eq!(store.get(2, UserDataType::Display), None);
    }
}
