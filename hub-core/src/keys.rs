//! Digest and key types shared across the hub.

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use ed25519_dalek::{SignatureError, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Length of a message digest in bytes.
pub const HASH_LENGTH: usize = 20;

/// Length of an Ed25519 signer key in bytes.
pub const SIGNER_LENGTH: usize = 32;

/// Length of an Ethereum address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// The byte slice did not have the length the type requires.
#[derive(Debug, thiserror::Error)]
#[error("invalid length: expected {expected} bytes, got {actual}")]
pub struct InvalidLength {
    /// Expected number of bytes.
    pub expected: usize,
    /// Number of bytes received.
    pub actual: usize,
}

/// A 20-byte truncated BLAKE3 digest.
///
/// Message identity is this digest over the canonical encoding of the
/// message data. The derived `Ord` is the unsigned byte-wise order the
/// conflict tie-breaks rely on.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// Hash the given bytes with BLAKE3, truncated to 20 bytes.
    pub fn new(data: impl AsRef<[u8]>) -> Self {
        let digest = blake3::hash(data.as_ref());
        let mut out = [0u8; HASH_LENGTH];
        out.copy_from_slice(&digest.as_bytes()[..HASH_LENGTH]);
        Hash(out)
    }

    /// The all-zero digest, used as the hash of an empty set.
    pub const fn zero() -> Self {
        Hash([0u8; HASH_LENGTH])
    }

    /// Byte representation.
    pub const fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Create from a fixed-size byte array.
    pub const fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Hash(bytes)
    }

    /// Create from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidLength> {
        let bytes: [u8; HASH_LENGTH] = bytes.try_into().map_err(|_| InvalidLength {
            expected: HASH_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Hash(bytes))
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Shortened hex, for logging.
    pub fn fmt_short(&self) -> String {
        hex::encode(&self.0[..5])
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(value: [u8; HASH_LENGTH]) -> Self {
        Hash(value)
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; HASH_LENGTH] = hex::decode(s)?
            .try_into()
            .map_err(|_| anyhow::anyhow!("failed to parse: invalid digest length"))?;
        Ok(Hash(bytes))
    }
}

/// The public key of an Ed25519 signer authorized by a custody address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignerId([u8; SIGNER_LENGTH]);

impl SignerId {
    /// Create from a fixed-size byte array.
    pub const fn from_bytes(bytes: [u8; SIGNER_LENGTH]) -> Self {
        SignerId(bytes)
    }

    /// Create from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidLength> {
        let bytes: [u8; SIGNER_LENGTH] = bytes.try_into().map_err(|_| InvalidLength {
            expected: SIGNER_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(SignerId(bytes))
    }

    /// Byte representation.
    pub const fn as_bytes(&self) -> &[u8; SIGNER_LENGTH] {
        &self.0
    }

    /// Interpret the bytes as an Ed25519 verifying key.
    ///
    /// Fails if the bytes are not a valid curve point.
    pub fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::from_bytes(&self.0)
    }

    /// Shortened hex, for logging.
    pub fn fmt_short(&self) -> String {
        hex::encode(&self.0[..5])
    }
}

impl From<VerifyingKey> for SignerId {
    fn from(key: VerifyingKey) -> Self {
        SignerId(key.to_bytes())
    }
}

impl AsRef<[u8]> for SignerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerId({})", hex::encode(self.0))
    }
}

/// An Ethereum address, as reported by the ID Registry or recovered from an
/// EIP-712 signature.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EthAddress([u8; ADDRESS_LENGTH]);

impl EthAddress {
    /// Create from a fixed-size byte array.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        EthAddress(bytes)
    }

    /// Create from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidLength> {
        let bytes: [u8; ADDRESS_LENGTH] = bytes.try_into().map_err(|_| InvalidLength {
            expected: ADDRESS_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(EthAddress(bytes))
    }

    /// Byte representation.
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl AsRef<[u8]> for EthAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthAddress(0x{})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_truncated_blake3() {
        let hash = Hash::new(b"hello");
        let full = blake3::hash(b"hello");
        assert_eq!(hash.as_bytes()[..], full.as_bytes()[..HASH_LENGTH]);
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = Hash::new(b"roundtrip");
        let parsed: Hash = hash.to_hex().parse().unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_hash_order_is_bytewise() {
        let lo = Hash::from_bytes([0x01; HASH_LENGTH]);
        let hi = Hash::from_bytes([0x02; HASH_LENGTH]);
        assert!(lo < hi);
    }

    #[test]
    fn test_from_slice_rejects_bad_length() {
        assert!(Hash::from_slice(&[0u8; 19]).is_err());
        assert!(SignerId::from_slice(&[0u8; 20]).is_err());
        assert!(EthAddress::from_slice(&[0u8; 32]).is_err());
    }
}
