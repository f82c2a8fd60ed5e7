//! Message validation.
//!
//! [`validate`] runs the stateless checks in order: structure, canonical
//! hash, signature, then semantics. Authorization binding (custody address
//! and registered-signer lookups) happens in the engine, which owns that
//! state; the corresponding error variants live here so the whole rejection
//! vocabulary is in one place.

use crate::eip712;
use crate::keys::{EthAddress, SignerId, ADDRESS_LENGTH, HASH_LENGTH, SIGNER_LENGTH};
use crate::proto::{
    body_matches, Body, CastAddBody, CastId, FarcasterNetwork, HashScheme, Message, MessageData,
    MessageType, ReactionType, SignatureScheme, UserDataType,
};

/// Future-timestamp tolerance, in milliseconds.
pub const MAX_FUTURE_MS: u64 = 600_000;

/// Maximum cast text length, in bytes.
pub const MAX_CAST_TEXT_BYTES: usize = 320;

/// Maximum number of embeds per cast.
pub const MAX_EMBEDS: usize = 2;

/// Maximum embed length, in bytes.
pub const MAX_EMBED_BYTES: usize = 256;

/// Maximum number of mentions per cast.
pub const MAX_MENTIONS: usize = 10;

/// Maximum signer name length, in bytes.
pub const MAX_SIGNER_NAME_BYTES: usize = 32;

/// Why a message was rejected. All of these mean the sender is at fault;
/// none are retryable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// A required field is missing or has the wrong length for its scheme.
    #[error("malformed message: {0}")]
    MalformedBytes(&'static str),
    /// The hash does not match the canonical encoding of the data.
    #[error("hash does not match canonical encoding")]
    HashMismatch,
    /// The signature does not verify over the hash under the signer.
    #[error("signature verification failed")]
    BadSignature,
    /// The signer is not authorized for the fid.
    #[error("unauthorized signer for fid {fid}")]
    UnauthorizedSigner {
        /// Fid the message claims.
        fid: u64,
    },
    /// A type-specific body constraint does not hold.
    #[error("body constraint violated: {0}")]
    BodyConstraintViolated(&'static str),
    /// The fid has no custody address on record.
    #[error("unknown fid {0}")]
    UnknownFid(u64),
    /// The timestamp is too far ahead of this node's clock.
    #[error("timestamp is in the future")]
    FutureTimestamp,
    /// The message targets a different network than this node.
    #[error("wrong network")]
    WrongNetwork,
}

impl ValidationError {
    /// Stable snake_case label, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::MalformedBytes(_) => "malformed_bytes",
            ValidationError::HashMismatch => "hash_mismatch",
            ValidationError::BadSignature => "bad_signature",
            ValidationError::UnauthorizedSigner { .. } => "unauthorized_signer",
            ValidationError::BodyConstraintViolated(_) => "body_constraint_violated",
            ValidationError::UnknownFid(_) => "unknown_fid",
            ValidationError::FutureTimestamp => "future_timestamp",
            ValidationError::WrongNetwork => "wrong_network",
        }
    }
}

/// The signature scheme a message type must use.
pub fn required_scheme(typ: MessageType) -> SignatureScheme {
    match typ {
        MessageType::SignerAdd | MessageType::SignerRemove => SignatureScheme::Eip712,
        _ => SignatureScheme::Ed25519,
    }
}

/// Validate a message against everything that can be checked without hub
/// state. Returns the payload on success.
pub fn validate(
    message: &Message,
    network: FarcasterNetwork,
    now: u64,
) -> Result<&MessageData, ValidationError> {
    let data = validate_structure(message)?;
    validate_hash(message, data)?;
    validate_signature(message)?;
    validate_semantics(data, network, now)?;
    Ok(data)
}

fn validate_structure(message: &Message) -> Result<&MessageData, ValidationError> {
    let data = message
        .data
        .as_ref()
        .ok_or(ValidationError::MalformedBytes("data is missing"))?;
    let typ = data
        .typ()
        .filter(|t| *t != MessageType::None)
        .ok_or(ValidationError::MalformedBytes("unknown message type"))?;
    let body = data
        .body
        .as_ref()
        .ok_or(ValidationError::MalformedBytes("body is missing"))?;
    if !body_matches(typ, body) {
        return Err(ValidationError::MalformedBytes(
            "body does not match message type",
        ));
    }
    if message.hash_scheme != HashScheme::Blake3 as i32 {
        return Err(ValidationError::MalformedBytes("unsupported hash scheme"));
    }
    if message.hash.len() != HASH_LENGTH {
        return Err(ValidationError::MalformedBytes("hash must be 20 bytes"));
    }
    let scheme = SignatureScheme::try_from(message.signature_scheme)
        .map_err(|_| ValidationError::MalformedBytes("unknown signature scheme"))?;
    if scheme != required_scheme(typ) {
        return Err(ValidationError::MalformedBytes(
            "signature scheme does not match message type",
        ));
    }
    match scheme {
        SignatureScheme::Ed25519 => {
            if message.signer.len() != SIGNER_LENGTH {
                return Err(ValidationError::MalformedBytes("signer must be 32 bytes"));
            }
            if message.signature.len() != 64 {
                return Err(ValidationError::MalformedBytes(
                    "signature must be 64 bytes",
                ));
            }
        }
        SignatureScheme::Eip712 => {
            if message.signer.len() != ADDRESS_LENGTH {
                return Err(ValidationError::MalformedBytes("signer must be 20 bytes"));
            }
            if message.signature.len() != eip712::SIGNATURE_LENGTH {
                return Err(ValidationError::MalformedBytes(
                    "signature must be 65 bytes",
                ));
            }
        }
        SignatureScheme::None => {
            return Err(ValidationError::MalformedBytes("unknown signature scheme"))
        }
    }
    Ok(data)
}

fn validate_hash(message: &Message, data: &MessageData) -> Result<(), ValidationError> {
    if data.canonical_hash().as_bytes()[..] != message.hash[..] {
        return Err(ValidationError::HashMismatch);
    }
    Ok(())
}

fn validate_signature(message: &Message) -> Result<(), ValidationError> {
    match SignatureScheme::try_from(message.signature_scheme) {
        Ok(SignatureScheme::Ed25519) => {
            let signer = SignerId::from_slice(&message.signer)
                .map_err(|_| ValidationError::BadSignature)?;
            let key = signer
                .verifying_key()
                .map_err(|_| ValidationError::BadSignature)?;
            let signature = ed25519_dalek::Signature::from_slice(&message.signature)
                .map_err(|_| ValidationError::BadSignature)?;
            key.verify_strict(&message.hash, &signature)
                .map_err(|_| ValidationError::BadSignature)
        }
        Ok(SignatureScheme::Eip712) => {
            let expected = EthAddress::from_slice(&message.signer)
                .map_err(|_| ValidationError::BadSignature)?;
            eip712::verify_message_signature(&message.hash20(), &message.signature, &expected)
                .map_err(|_| ValidationError::BadSignature)
        }
        _ => Err(ValidationError::BadSignature),
    }
}

fn validate_semantics(
    data: &MessageData,
    network: FarcasterNetwork,
    now: u64,
) -> Result<(), ValidationError> {
    match FarcasterNetwork::try_from(data.network) {
        Ok(FarcasterNetwork::Mainnet)
        | Ok(FarcasterNetwork::Testnet)
        | Ok(FarcasterNetwork::Devnet) => {}
        _ => return Err(ValidationError::WrongNetwork),
    }
    if data.network != network as i32 {
        return Err(ValidationError::WrongNetwork);
    }
    if data.timestamp as u64 > now + MAX_FUTURE_MS {
        return Err(ValidationError::FutureTimestamp);
    }
    validate_body(data)
}

fn validate_body(data: &MessageData) -> Result<(), ValidationError> {
    let body = data.body.as_ref().expect("checked in structure");
    match body {
        Body::CastAddBody(body) => validate_cast_add(body),
        Body::CastRemoveBody(body) => {
            if body.target_hash.len() != HASH_LENGTH {
                return Err(ValidationError::BodyConstraintViolated(
                    "target hash must be 20 bytes",
                ));
            }
            Ok(())
        }
        Body::ReactionBody(body) => {
            match ReactionType::try_from(body.r#type) {
                Ok(ReactionType::Like) | Ok(ReactionType::Recast) => {}
                _ => {
                    return Err(ValidationError::BodyConstraintViolated(
                        "unknown reaction type",
                    ))
                }
            }
            let target = body.target_cast_id.as_ref().ok_or(
                ValidationError::BodyConstraintViolated("reaction target is missing"),
            )?;
            validate_cast_id(target)
        }
        Body::VerificationAddEthAddressBody(body) => {
            let address = EthAddress::from_slice(&body.address).map_err(|_| {
                ValidationError::BodyConstraintViolated("address must be 20 bytes")
            })?;
            let block_hash: [u8; 32] = body.block_hash.as_slice().try_into().map_err(|_| {
                ValidationError::BodyConstraintViolated("block hash must be 32 bytes")
            })?;
            let network = FarcasterNetwork::try_from(data.network)
                .map_err(|_| ValidationError::WrongNetwork)?;
            let claim = eip712::VerificationClaim {
                fid: data.fid,
                address,
                block_hash,
                network,
            };
            eip712::verify_verification_claim(&claim, &body.eth_signature).map_err(|_| {
                ValidationError::BodyConstraintViolated("eth signature does not verify claim")
            })
        }
        Body::VerificationRemoveBody(body) => {
            if body.address.len() != ADDRESS_LENGTH {
                return Err(ValidationError::BodyConstraintViolated(
                    "address must be 20 bytes",
                ));
            }
            Ok(())
        }
        Body::SignerBody(body) => {
            if body.signer.len() != SIGNER_LENGTH {
                return Err(ValidationError::BodyConstraintViolated(
                    "signer key must be 32 bytes",
                ));
            }
            if let Some(name) = &body.name {
                if name.len() > MAX_SIGNER_NAME_BYTES {
                    return Err(ValidationError::BodyConstraintViolated(
                        "signer name exceeds 32 bytes",
                    ));
                }
            }
            Ok(())
        }
        Body::UserDataBody(body) => {
            let limit = match UserDataType::try_from(body.r#type) {
                Ok(UserDataType::Pfp) => Some(256),
                Ok(UserDataType::Display) => Some(32),
                Ok(UserDataType::Bio) => Some(256),
                Ok(UserDataType::Url) => Some(256),
                // Fname values are bounded by the external registry.
                Ok(UserDataType::Fname) => None,
                _ => {
                    return Err(ValidationError::BodyConstraintViolated(
                        "unknown user data type",
                    ))
                }
            };
            if let Some(limit) = limit {
                if body.value.len() > limit {
                    return Err(ValidationError::BodyConstraintViolated(
                        "user data value exceeds limit",
                    ));
                }
            }
            Ok(())
        }
    }
}

fn validate_cast_add(body: &CastAddBody) -> Result<(), ValidationError> {
    if body.text.len() > MAX_CAST_TEXT_BYTES {
        return Err(ValidationError::BodyConstraintViolated(
            "cast text exceeds 320 bytes",
        ));
    }
    if body.embeds.len() > MAX_EMBEDS {
        return Err(ValidationError::BodyConstraintViolated("too many embeds"));
    }
    for embed in &body.embeds {
        if embed.is_empty() || embed.len() > MAX_EMBED_BYTES {
            return Err(ValidationError::BodyConstraintViolated(
                "embed must be 1..=256 bytes",
            ));
        }
    }
    if body.mentions.len() > MAX_MENTIONS {
        return Err(ValidationError::BodyConstraintViolated("too many mentions"));
    }
    if body.mentions_positions.len() != body.mentions.len() {
        return Err(ValidationError::BodyConstraintViolated(
            "mentions and positions must have the same length",
        ));
    }
    let mut previous: Option<u32> = None;
    for &position in &body.mentions_positions {
        if position as usize > body.text.len() {
            return Err(ValidationError::BodyConstraintViolated(
                "mention position outside text",
            ));
        }
        if let Some(previous) = previous {
            if position <= previous {
                return Err(ValidationError::BodyConstraintViolated(
                    "mention positions must be strictly ascending",
                ));
            }
        }
        previous = Some(position);
    }
    if let Some(parent) = &body.parent_cast_id {
        validate_cast_id(parent)?;
    }
    Ok(())
}

fn validate_cast_id(cast_id: &CastId) -> Result<(), ValidationError> {
    if cast_id.fid == 0 {
        return Err(ValidationError::BodyConstraintViolated(
            "cast id fid must be non-zero",
        ));
    }
    if cast_id.hash.len() != HASH_LENGTH {
        return Err(ValidationError::BodyConstraintViolated(
            "cast id hash must be 20 bytes",
        ));
    }
    Ok(())
}
