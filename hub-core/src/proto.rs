//! Wire types for hub messages.
//!
//! The structs here are hand-annotated [`prost`] messages. Field order in
//! every struct matches ascending tag order, so `encode_to_vec` produces the
//! canonical deterministic encoding: fields emitted in ascending tag order,
//! default-valued scalars omitted, numeric repeateds packed, and only the
//! active `oneof` arm on the wire. The message hash is the truncated BLAKE3
//! digest of exactly these bytes, so two conformant encoders must agree
//! byte-for-byte.

use prost::Message as _;

use crate::keys::Hash;

/// The nine supported message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    /// Unset.
    None = 0,
    /// Add a new cast.
    CastAdd = 1,
    /// Remove an existing cast.
    CastRemove = 2,
    /// Add a reaction to a cast.
    ReactionAdd = 3,
    /// Remove a reaction from a cast.
    ReactionRemove = 4,
    /// Attest ownership of an Ethereum address.
    VerificationAddEthAddress = 5,
    /// Remove a verification.
    VerificationRemove = 6,
    /// Authorize a new signer key for an fid.
    SignerAdd = 7,
    /// Revoke a signer key.
    SignerRemove = 8,
    /// Set a piece of user metadata.
    UserDataAdd = 9,
}

impl MessageType {
    /// Whether this type belongs to the remove set of its CRDT.
    pub fn is_remove(&self) -> bool {
        matches!(
            self,
            MessageType::CastRemove
                | MessageType::ReactionRemove
                | MessageType::VerificationRemove
                | MessageType::SignerRemove
        )
    }
}

/// Farcaster networks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum FarcasterNetwork {
    /// Unset.
    None = 0,
    /// Public primary network.
    Mainnet = 1,
    /// Public test network.
    Testnet = 2,
    /// Private test network.
    Devnet = 3,
}

/// Supported message hash schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum HashScheme {
    /// Unset.
    None = 0,
    /// BLAKE3 truncated to 20 bytes.
    Blake3 = 1,
}

/// Supported message signature schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum SignatureScheme {
    /// Unset.
    None = 0,
    /// Ed25519 over the message hash, keyed by a registered signer.
    Ed25519 = 1,
    /// EIP-712 typed signature over the message hash, keyed by the fid's
    /// custody address.
    Eip712 = 2,
}

/// Kinds of user metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum UserDataType {
    /// Unset.
    None = 0,
    /// Profile picture URL.
    Pfp = 1,
    /// Display name.
    Display = 2,
    /// Profile bio.
    Bio = 3,
    /// Profile URL.
    Url = 4,
    /// Farcaster name, resolved against the external fname registry.
    Fname = 5,
}

/// Kinds of reactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ReactionType {
    /// Unset.
    None = 0,
    /// A like.
    Like = 1,
    /// A recast.
    Recast = 2,
}

/// Reference to a cast by author and message hash.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Message)]
pub struct CastId {
    /// Fid of the cast's author.
    #[prost(uint64, tag = "1")]
    pub fid: u64,
    /// Message hash of the `CastAdd`.
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

/// Body of a `CastAdd` message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CastAddBody {
    /// Embedded URLs, at most two.
    #[prost(string, repeated, tag = "1")]
    pub embeds: Vec<String>,
    /// Fids mentioned in the text.
    #[prost(uint64, repeated, tag = "2")]
    pub mentions: Vec<u64>,
    /// Parent cast, when this is a reply.
    #[prost(message, optional, tag = "3")]
    pub parent_cast_id: Option<CastId>,
    /// Cast text.
    #[prost(string, tag = "4")]
    pub text: String,
    /// Byte offsets into `text` for each mention, strictly ascending.
    #[prost(uint32, repeated, tag = "5")]
    pub mentions_positions: Vec<u32>,
}

/// Body of a `CastRemove` message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CastRemoveBody {
    /// Hash of the `CastAdd` being removed.
    #[prost(bytes = "vec", tag = "1")]
    pub target_hash: Vec<u8>,
}

/// Body of `ReactionAdd` and `ReactionRemove` messages.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReactionBody {
    /// Kind of reaction.
    #[prost(enumeration = "ReactionType", tag = "1")]
    pub r#type: i32,
    /// The cast being reacted to.
    #[prost(message, optional, tag = "2")]
    pub target_cast_id: Option<CastId>,
}

/// Body of a `VerificationAddEthAddress` message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VerificationAddEthAddressBody {
    /// Ethereum address being claimed.
    #[prost(bytes = "vec", tag = "1")]
    pub address: Vec<u8>,
    /// EIP-712 signature over the `VerificationClaim` by `address`.
    #[prost(bytes = "vec", tag = "2")]
    pub eth_signature: Vec<u8>,
    /// Block hash anchoring the claim.
    #[prost(bytes = "vec", tag = "3")]
    pub block_hash: Vec<u8>,
}

/// Body of a `VerificationRemove` message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VerificationRemoveBody {
    /// Ethereum address whose verification is removed.
    #[prost(bytes = "vec", tag = "1")]
    pub address: Vec<u8>,
}

/// Body of `SignerAdd` and `SignerRemove` messages.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignerBody {
    /// Ed25519 public key of the signer.
    #[prost(bytes = "vec", tag = "1")]
    pub signer: Vec<u8>,
    /// Optional human-readable label, only meaningful on adds.
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
}

/// Body of a `UserDataAdd` message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UserDataBody {
    /// Which piece of metadata is being set.
    #[prost(enumeration = "UserDataType", tag = "1")]
    pub r#type: i32,
    /// The value.
    #[prost(string, tag = "2")]
    pub value: String,
}

/// The type-tagged body variant.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Body {
    /// Body for [`MessageType::CastAdd`].
    #[prost(message, tag = "5")]
    CastAddBody(CastAddBody),
    /// Body for [`MessageType::CastRemove`].
    #[prost(message, tag = "6")]
    CastRemoveBody(CastRemoveBody),
    /// Body for [`MessageType::ReactionAdd`] and [`MessageType::ReactionRemove`].
    #[prost(message, tag = "7")]
    ReactionBody(ReactionBody),
    /// Body for [`MessageType::VerificationAddEthAddress`].
    #[prost(message, tag = "8")]
    VerificationAddEthAddressBody(VerificationAddEthAddressBody),
    /// Body for [`MessageType::VerificationRemove`].
    #[prost(message, tag = "9")]
    VerificationRemoveBody(VerificationRemoveBody),
    /// Body for [`MessageType::SignerAdd`] and [`MessageType::SignerRemove`].
    #[prost(message, tag = "10")]
    SignerBody(SignerBody),
    /// Body for [`MessageType::UserDataAdd`].
    #[prost(message, tag = "11")]
    UserDataBody(UserDataBody),
}

/// The signed-over payload of a message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageData {
    /// Message type, determines the expected body arm.
    #[prost(enumeration = "MessageType", tag = "1")]
    pub r#type: i32,
    /// Fid of the author.
    #[prost(uint64, tag = "2")]
    pub fid: u64,
    /// Milliseconds since the Farcaster epoch.
    #[prost(uint32, tag = "3")]
    pub timestamp: u32,
    /// Network the message is valid on.
    #[prost(enumeration = "FarcasterNetwork", tag = "4")]
    pub network: i32,
    /// Type-specific body.
    #[prost(oneof = "Body", tags = "5, 6, 7, 8, 9, 10, 11")]
    pub body: Option<Body>,
}

impl MessageData {
    /// Canonical deterministic encoding of the data.
    pub fn encode_canonical(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Hash of the canonical encoding, i.e. the message identity.
    pub fn canonical_hash(&self) -> Hash {
        Hash::new(self.encode_canonical())
    }

    /// The message type, or `None` for an unknown discriminant.
    pub fn typ(&self) -> Option<MessageType> {
        MessageType::try_from(self.r#type).ok()
    }
}

/// A signed, immutable hub message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    /// The signed-over payload.
    #[prost(message, optional, tag = "1")]
    pub data: Option<MessageData>,
    /// Digest of the canonical encoding of `data`.
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
    /// Scheme of `hash`.
    #[prost(enumeration = "HashScheme", tag = "3")]
    pub hash_scheme: i32,
    /// Signature over `hash`.
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
    /// Scheme of `signature`.
    #[prost(enumeration = "SignatureScheme", tag = "5")]
    pub signature_scheme: i32,
    /// Public key or address that produced `signature`.
    #[prost(bytes = "vec", tag = "6")]
    pub signer: Vec<u8>,
}

impl Message {
    /// The payload, or an error when absent.
    pub fn data(&self) -> Result<&MessageData, MissingData> {
        self.data.as_ref().ok_or(MissingData)
    }

    /// Fid of the author, zero when the payload is absent.
    pub fn fid(&self) -> u64 {
        self.data.as_ref().map(|d| d.fid).unwrap_or_default()
    }

    /// Timestamp, zero when the payload is absent.
    pub fn timestamp(&self) -> u32 {
        self.data.as_ref().map(|d| d.timestamp).unwrap_or_default()
    }

    /// Message type, if present and known.
    pub fn typ(&self) -> Option<MessageType> {
        self.data.as_ref().and_then(|d| d.typ())
    }

    /// The message hash as a typed digest.
    ///
    /// Only valid after structural validation; falls back to the zero digest
    /// for malformed lengths.
    pub fn hash20(&self) -> Hash {
        Hash::from_slice(&self.hash).unwrap_or_default()
    }

    /// Canonical encoding of the full envelope, used for gossip payloads and
    /// sync transfers.
    pub fn encode_canonical(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode an envelope from canonical bytes.
    pub fn decode_canonical(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Message::decode(bytes)
    }
}

/// A message envelope without a payload.
#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("message has no data")]
pub struct MissingData;

/// The body arm a message type must carry.
pub fn body_matches(typ: MessageType, body: &Body) -> bool {
    matches!(
        (typ, body),
        (MessageType::CastAdd, Body::CastAddBody(_))
            | (MessageType::CastRemove, Body::CastRemoveBody(_))
            | (MessageType::ReactionAdd, Body::ReactionBody(_))
            | (MessageType::ReactionRemove, Body::ReactionBody(_))
            | (
                MessageType::VerificationAddEthAddress,
                Body::VerificationAddEthAddressBody(_)
            )
            | (MessageType::VerificationRemove, Body::VerificationRemoveBody(_))
            | (MessageType::SignerAdd, Body::SignerBody(_))
            | (MessageType::SignerRemove, Body::SignerBody(_))
            | (MessageType::UserDataAdd, Body::UserDataBody(_))
    )
}
