//! Core building blocks for the hub: message wire types with a canonical
//! deterministic encoding, the 20-byte BLAKE3 message digest, EIP-712 typed
//! signatures, and stateless message validation.
//!
//! Everything in this crate is pure. Stateful concerns, the CRDT stores, the
//! sync trie and the reconciliation protocol, live in `hub-sync`.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod eip712;
pub mod keys;
pub mod proto;
pub mod time;
pub mod validation;

pub use self::keys::{EthAddress, Hash, SignerId};
pub use self::proto::{FarcasterNetwork, Message, MessageData, MessageType};
pub use self::validation::{validate, ValidationError};
