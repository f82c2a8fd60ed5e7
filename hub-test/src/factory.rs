//! Factories producing correctly signed messages for tests.

use ed25519_dalek::{Signer as _, SigningKey};
use hub_core::eip712;
use hub_core::keys::{EthAddress, Hash, SignerId};
use hub_core::proto::{
    Body, CastAddBody, CastId, CastRemoveBody, FarcasterNetwork, HashScheme, Message, MessageData,
    MessageType, ReactionBody, ReactionType, SignatureScheme, SignerBody, UserDataBody,
    UserDataType, VerificationAddEthAddressBody, VerificationRemoveBody,
};

/// Network all factory messages target.
pub const TEST_NETWORK: FarcasterNetwork = FarcasterNetwork::Devnet;

/// A random Ed25519 signer keypair.
pub fn signer() -> SigningKey {
    SigningKey::from_bytes(&rand::random())
}

/// The signer id of a keypair.
pub fn signer_id(secret: &SigningKey) -> SignerId {
    SignerId::from(secret.verifying_key())
}

/// A random secp256k1 custody keypair.
pub fn custody() -> k256::ecdsa::SigningKey {
    loop {
        if let Ok(key) = k256::ecdsa::SigningKey::from_slice(&rand::random::<[u8; 32]>()) {
            return key;
        }
    }
}

/// The Ethereum address of a custody keypair.
pub fn custody_address(secret: &k256::ecdsa::SigningKey) -> EthAddress {
    eip712::address_of(secret.verifying_key())
}

fn data(typ: MessageType, fid: u64, timestamp: u32, body: Body) -> MessageData {
    MessageData {
        r#type: typ as i32,
        fid,
        timestamp,
        network: TEST_NETWORK as i32,
        body: Some(body),
    }
}

/// Seal a payload with an Ed25519 signer key.
pub fn seal_ed25519(data: MessageData, secret: &SigningKey) -> Message {
    let hash = data.canonical_hash();
    let signature = secret.sign(hash.as_bytes());
    Message {
        data: Some(data),
        hash: hash.as_bytes().to_vec(),
        hash_scheme: HashScheme::Blake3 as i32,
        signature: signature.to_bytes().to_vec(),
        signature_scheme: SignatureScheme::Ed25519 as i32,
        signer: secret.verifying_key().to_bytes().to_vec(),
    }
}

/// Seal a payload with an EIP-712 custody signature.
pub fn seal_eip712(data: MessageData, secret: &k256::ecdsa::SigningKey) -> Message {
    let hash = data.canonical_hash();
    let signature = eip712::sign_message_hash(secret, &hash);
    Message {
        data: Some(data),
        hash: hash.as_bytes().to_vec(),
        hash_scheme: HashScheme::Blake3 as i32,
        signature: signature.to_vec(),
        signature_scheme: SignatureScheme::Eip712 as i32,
        signer: eip712::address_of(secret.verifying_key()).as_bytes().to_vec(),
    }
}

/// A `SignerAdd` authorizing `signer` for `fid`, signed by the custody key.
pub fn signer_add(
    fid: u64,
    signer: SignerId,
    timestamp: u32,
    custody: &k256::ecdsa::SigningKey,
) -> Message {
    let body = Body::SignerBody(SignerBody {
        signer: signer.as_bytes().to_vec(),
        name: None,
    });
    seal_eip712(data(MessageType::SignerAdd, fid, timestamp, body), custody)
}

/// A `SignerRemove` revoking `signer` for `fid`, signed by the custody key.
pub fn signer_remove(
    fid: u64,
    signer: SignerId,
    timestamp: u32,
    custody: &k256::ecdsa::SigningKey,
) -> Message {
    let body = Body::SignerBody(SignerBody {
        signer: signer.as_bytes().to_vec(),
        name: None,
    });
    seal_eip712(data(MessageType::SignerRemove, fid, timestamp, body), custody)
}

/// A `CastAdd` with the given text.
pub fn cast_add(fid: u64, text: &str, timestamp: u32, secret: &SigningKey) -> Message {
    let body = Body::CastAddBody(CastAddBody {
        text: text.to_string(),
        ..Default::default()
    });
    seal_ed25519(data(MessageType::CastAdd, fid, timestamp, body), secret)
}

/// A `CastRemove` targeting the cast with the given hash.
pub fn cast_remove(fid: u64, target: Hash, timestamp: u32, secret: &SigningKey) -> Message {
    let body = Body::CastRemoveBody(CastRemoveBody {
        target_hash: target.as_bytes().to_vec(),
    });
    seal_ed25519(data(MessageType::CastRemove, fid, timestamp, body), secret)
}

/// A `ReactionAdd` or `ReactionRemove` for a target cast.
pub fn reaction(
    typ: MessageType,
    fid: u64,
    reaction_type: ReactionType,
    target: (u64, Hash),
    timestamp: u32,
    secret: &SigningKey,
) -> Message {
    debug_assert!(matches!(
        typ,
        MessageType::ReactionAdd | MessageType::ReactionRemove
    ));
    let body = Body::ReactionBody(ReactionBody {
        r#type: reaction_type as i32,
        target_cast_id: Some(CastId {
            fid: target.0,
            hash: target.1.as_bytes().to_vec(),
        }),
    });
    seal_ed25519(data(typ, fid, timestamp, body), secret)
}

/// A `UserDataAdd` setting one metadata field.
pub fn user_data(
    fid: u64,
    typ: UserDataType,
    value: &str,
    timestamp: u32,
    secret: &SigningKey,
) -> Message {
    let body = Body::UserDataBody(UserDataBody {
        r#type: typ as i32,
        value: value.to_string(),
    });
    seal_ed25519(data(MessageType::UserDataAdd, fid, timestamp, body), secret)
}

/// A `VerificationAddEthAddress` with a correctly signed claim.
pub fn verification_add(
    fid: u64,
    eth_secret: &k256::ecdsa::SigningKey,
    block_hash: [u8; 32],
    timestamp: u32,
    secret: &SigningKey,
) -> Message {
    let address = eip712::address_of(eth_secret.verifying_key());
    let claim = eip712::VerificationClaim {
        fid,
        address,
        block_hash,
        network: TEST_NETWORK,
    };
    let eth_signature = eip712::sign_verification_claim(eth_secret, &claim);
    let body = Body::VerificationAddEthAddressBody(VerificationAddEthAddressBody {
        address: address.as_bytes().to_vec(),
        eth_signature: eth_signature.to_vec(),
        block_hash: block_hash.to_vec(),
    });
    seal_ed25519(
        data(MessageType::VerificationAddEthAddress, fid, timestamp, body),
        secret,
    )
}

/// A `VerificationRemove` for an address.
pub fn verification_remove(
    fid: u64,
    address: EthAddress,
    timestamp: u32,
    secret: &SigningKey,
) -> Message {
    let body = Body::VerificationRemoveBody(VerificationRemoveBody {
        address: address.as_bytes().to_vec(),
    });
    seal_ed25519(
        data(MessageType::VerificationRemove, fid, timestamp, body),
        secret,
    )
}
