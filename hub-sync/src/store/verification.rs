//! The verification store.
//!
//! Two-phase set over `VerificationAddEthAddress` / `VerificationRemove`,
//! keyed by `(fid, claimed address)`.

use hub_core::keys::EthAddress;
use hub_core::proto::{Body, Message, MessageType};

use super::{fid_prefix, MessageSet, SetKind, StorePolicy};
use crate::trie::TrieSet;

/// Policy for the verification CRDT.
#[derive(Debug, Clone, Copy)]
pub struct VerificationPolicy;

impl StorePolicy for VerificationPolicy {
    const NAME: &'static str = "verifications";
    const TRIE_SET: TrieSet = TrieSet::Verification;

    fn set_kind(typ: MessageType) -> Option<SetKind> {
        match typ {
            MessageType::VerificationAddEthAddress => Some(SetKind::Add),
            MessageType::VerificationRemove => Some(SetKind::Remove),
            _ => None,
        }
    }

    fn conflict_key(message: &Message) -> Option<Vec<u8>> {
        let data = message.data.as_ref()?;
        let address = match &data.body {
            Some(Body::VerificationAddEthAddressBody(body)) => &body.address,
            Some(Body::VerificationRemoveBody(body)) => &body.address,
            _ => return None,
        };
        Some(conflict_key(data.fid, address))
    }
}

/// Conflict key for a verification entry.
pub fn conflict_key(fid: u64, address: &[u8]) -> Vec<u8> {
    let mut key = fid_prefix(fid).to_vec();
    key.extend_from_slice(address);
    key
}

/// The verification CRDT.
pub type VerificationStore = MessageSet<VerificationPolicy>;

impl VerificationStore {
    /// The current verification of an address by an fid, if any.
    pub fn get_verification(&self, fid: u64, address: &EthAddress) -> Option<&Message> {
        self.get_add(&conflict_key(fid, address.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use hub_test::factory;

    use super::*;
    use crate::store::{SetLimits, StoreError};

    const NOW: u64 = 1_000_000;

    #[test]
    fn test_add_remove_lifecycle() {
        let signer = factory::signer();
        let eth = factory::custody();
        let address = factory::custody_address(&eth);
        let mut store = VerificationStore::new(SetLimits::capacity(50));

        let add = factory::verification_add(1, &eth, [1u8; 32], 1_000, &signer);
        store.merge(add.clone(), NOW).unwrap();
        assert!(store.get_verification(1, &address).is_some());

        let remove = factory::verification_remove(1, address, 2_000, &signer);
        store.merge(remove, NOW).unwrap();
        assert!(store.get_verification(1, &address).is_none());

        // The older add cannot come back.
        assert!(matches!(store.merge(add, NOW), Err(StoreError::Conflict)));
    }

    #[test]
    fn test_higher_timestamp_wins_over_remove() {
        let signer = factory::signer();
        let eth = factory::custody();
        let address = factory::custody_address(&eth);
        let mut store = VerificationStore::new(SetLimits::capacity(50));

        store
            .merge(factory::verification_remove(1, address, 1_000, &signer), NOW)
            .unwrap();
        let add = factory::verification_add(1, &eth, [1u8; 32], 2_000, &signer);
        store.merge(add, NOW).unwrap();
        assert!(store.get_verification(1, &address).is_some());
    }

    #[test]
    fn test_same_address_other_fid_is_distinct() {
        let signer = factory::signer();
        let eth = factory::custody();
        let mut store = VerificationStore::new(SetLimits::capacity(50));

        store
            .merge(factory::verification_add(1, &eth, [1u8; 32], 1_000, &signer), NOW)
            .unwrap();
        store
            .merge(factory::verification_add(2, &eth, [1u8; 32], 1_000, &signer), NOW)
            .unwrap();
        assert_eq!(store.len(), 2);
    }
}
