//! EIP-712 typed signatures.
//!
//! Two typed structs are signed under the hub's domain: the message hash
//! (for signer add/remove envelopes signed by a custody address) and the
//! [`VerificationClaim`] (for Ethereum address verifications). Signatures
//! are 65 bytes, `r || s || v`, with `v` accepted as 0/1 or 27/28.

use alloy_primitives::{keccak256, B256, U256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::keys::{EthAddress, Hash};
use crate::proto::FarcasterNetwork;

/// Length of an EIP-712 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 65;

const DOMAIN_NAME: &str = "Farcaster Verify Ethereum Address";
const DOMAIN_VERSION: &str = "2.0.0";
const DOMAIN_SALT: [u8; 32] = [
    0xf2, 0xd8, 0x57, 0xf4, 0xa3, 0xed, 0xcb, 0x9b, 0x78, 0xb4, 0xd5, 0x03, 0xbf, 0xe7, 0x33,
    0xdb, 0x1e, 0x3f, 0x6c, 0xdc, 0x2b, 0x79, 0x71, 0xee, 0x73, 0x96, 0x26, 0xc9, 0x7e, 0x86,
    0xa5, 0x58,
];

const DOMAIN_TYPE: &str = "EIP712Domain(string name,string version,bytes32 salt)";
const MESSAGE_DATA_TYPE: &str = "MessageData(bytes hash)";
const VERIFICATION_CLAIM_TYPE: &str =
    "VerificationClaim(uint256 fid,address address,bytes32 blockHash,uint8 network)";

/// Errors verifying or recovering an EIP-712 signature.
#[derive(Debug, thiserror::Error)]
pub enum Eip712Error {
    /// The signature is not 65 bytes.
    #[error("invalid signature length: {0}")]
    InvalidLength(usize),
    /// The recovery byte is not one of 0, 1, 27, 28.
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    /// The r/s components do not form a valid signature.
    #[error("malformed signature")]
    Malformed(#[source] k256::ecdsa::Error),
    /// No public key could be recovered from the signature.
    #[error("recovery failed")]
    RecoveryFailed(#[source] k256::ecdsa::Error),
    /// The recovered address does not match the expected one.
    #[error("recovered address mismatch")]
    AddressMismatch,
}

/// The claim signed by an Ethereum address to verify ownership for an fid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationClaim {
    /// Fid claiming the address.
    pub fid: u64,
    /// Address being claimed.
    pub address: EthAddress,
    /// Block hash anchoring the claim.
    pub block_hash: [u8; 32],
    /// Network the claim is valid on.
    pub network: FarcasterNetwork,
}

fn domain_separator() -> B256 {
    let mut encoded = Vec::with_capacity(4 * 32);
    encoded.extend_from_slice(keccak256(DOMAIN_TYPE.as_bytes()).as_slice());
    encoded.extend_from_slice(keccak256(DOMAIN_NAME.as_bytes()).as_slice());
    encoded.extend_from_slice(keccak256(DOMAIN_VERSION.as_bytes()).as_slice());
    encoded.extend_from_slice(&DOMAIN_SALT);
    keccak256(&encoded)
}

fn typed_digest(struct_hash: B256) -> B256 {
    let mut encoded = Vec::with_capacity(2 + 2 * 32);
    encoded.extend_from_slice(&[0x19, 0x01]);
    encoded.extend_from_slice(domain_separator().as_slice());
    encoded.extend_from_slice(struct_hash.as_slice());
    keccak256(&encoded)
}

/// EIP-712 digest for a message hash signed by a custody address.
pub fn message_digest(hash: &Hash) -> B256 {
    let mut encoded = Vec::with_capacity(2 * 32);
    encoded.extend_from_slice(keccak256(MESSAGE_DATA_TYPE.as_bytes()).as_slice());
    encoded.extend_from_slice(keccak256(hash.as_bytes()).as_slice());
    typed_digest(keccak256(&encoded))
}

/// EIP-712 digest for a [`VerificationClaim`].
pub fn verification_claim_digest(claim: &VerificationClaim) -> B256 {
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(keccak256(VERIFICATION_CLAIM_TYPE.as_bytes()).as_slice());
    encoded.extend_from_slice(&U256::from(claim.fid).to_be_bytes::<32>());
    let mut address_word = [0u8; 32];
    address_word[12..].copy_from_slice(claim.address.as_bytes());
    encoded.extend_from_slice(&address_word);
    encoded.extend_from_slice(&claim.block_hash);
    encoded.extend_from_slice(&U256::from(claim.network as u8).to_be_bytes::<32>());
    typed_digest(keccak256(&encoded))
}

/// Recover the signing address from a 65-byte signature over a digest.
pub fn recover_address(digest: B256, signature: &[u8]) -> Result<EthAddress, Eip712Error> {
    let signature: &[u8; SIGNATURE_LENGTH] = signature
        .try_into()
        .map_err(|_| Eip712Error::InvalidLength(signature.len()))?;
    let recovery_id = match signature[64] {
        v @ (0 | 1) => RecoveryId::try_from(v).expect("v < 2"),
        v @ (27 | 28) => RecoveryId::try_from(v - 27).expect("v < 2"),
        v => return Err(Eip712Error::InvalidRecoveryId(v)),
    };
    let signature =
        EcdsaSignature::from_slice(&signature[..64]).map_err(Eip712Error::Malformed)?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
        .map_err(Eip712Error::RecoveryFailed)?;
    Ok(address_of(&key))
}

/// Verify a custody signature over a message hash.
pub fn verify_message_signature(
    hash: &Hash,
    signature: &[u8],
    expected: &EthAddress,
) -> Result<(), Eip712Error> {
    let recovered = recover_address(message_digest(hash), signature)?;
    if recovered != *expected {
        return Err(Eip712Error::AddressMismatch);
    }
    Ok(())
}

/// Verify the embedded signature of a [`VerificationClaim`] against the
/// claimed address.
pub fn verify_verification_claim(
    claim: &VerificationClaim,
    signature: &[u8],
) -> Result<(), Eip712Error> {
    let recovered = recover_address(verification_claim_digest(claim), signature)?;
    if recovered != claim.address {
        return Err(Eip712Error::AddressMismatch);
    }
    Ok(())
}

/// Sign a message hash with a custody key. Returns `r || s || v`.
pub fn sign_message_hash(secret: &SigningKey, hash: &Hash) -> [u8; SIGNATURE_LENGTH] {
    sign_digest(secret, message_digest(hash))
}

/// Sign a [`VerificationClaim`] with the claimed address's key.
pub fn sign_verification_claim(
    secret: &SigningKey,
    claim: &VerificationClaim,
) -> [u8; SIGNATURE_LENGTH] {
    sign_digest(secret, verification_claim_digest(claim))
}

/// The Ethereum address of a secp256k1 verifying key.
pub fn address_of(key: &VerifyingKey) -> EthAddress {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    EthAddress::from_slice(&digest[12..]).expect("keccak tail is 20 bytes")
}

fn sign_digest(secret: &SigningKey, digest: B256) -> [u8; SIGNATURE_LENGTH] {
    let (signature, recovery_id) = secret
        .sign_prehash_recoverable(digest.as_slice())
        .expect("prehash is 32 bytes");
    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte();
    out
}
