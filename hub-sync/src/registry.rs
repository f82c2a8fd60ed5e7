//! The fid ownership registry.
//!
//! Tracks the custody address of every fid, fed exclusively by on-chain ID
//! Registry events applied in block order. A transfer hands back the
//! previous custody address so the engine can cascade revocations.

use std::collections::BTreeMap;

use hub_core::keys::EthAddress;

/// An event from the on-chain ID Registry contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRegistryEvent {
    /// An fid was registered to a custody address.
    Register {
        /// The fid.
        fid: u64,
        /// The initial custody address.
        to: EthAddress,
        /// Block the event was mined in.
        block_number: u64,
    },
    /// An fid moved to a new custody address.
    Transfer {
        /// The fid.
        fid: u64,
        /// The new custody address.
        to: EthAddress,
        /// Block the event was mined in.
        block_number: u64,
    },
}

impl IdRegistryEvent {
    /// The fid the event concerns.
    pub fn fid(&self) -> u64 {
        match self {
            IdRegistryEvent::Register { fid, .. } => *fid,
            IdRegistryEvent::Transfer { fid, .. } => *fid,
        }
    }

    /// The block the event was mined in.
    pub fn block_number(&self) -> u64 {
        match self {
            IdRegistryEvent::Register { block_number, .. } => *block_number,
            IdRegistryEvent::Transfer { block_number, .. } => *block_number,
        }
    }
}

/// Errors applying a registry event.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The event is older than the latest applied block for the fid.
    #[error("event for fid {fid} at block {block_number} is behind block {latest}")]
    StaleEvent {
        /// The fid.
        fid: u64,
        /// Block of the rejected event.
        block_number: u64,
        /// Latest applied block for the fid.
        latest: u64,
    },
    /// A transfer arrived for an fid that was never registered.
    #[error("transfer for unregistered fid {0}")]
    UnknownFid(u64),
    /// A second register arrived for an already registered fid.
    #[error("fid {0} is already registered")]
    AlreadyRegistered(u64),
}

/// Result of applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// The fid.
    pub fid: u64,
    /// The custody address now in force.
    pub custody: EthAddress,
    /// The custody address replaced by a transfer, if any.
    pub previous: Option<EthAddress>,
}

#[derive(Debug, Clone, Copy)]
struct FidEntry {
    custody: EthAddress,
    block_number: u64,
}

/// Mapping fid → (custody address, latest block).
#[derive(Debug, Clone, Default)]
pub struct IdRegistry {
    fids: BTreeMap<u64, FidEntry>,
}

impl IdRegistry {
    /// A new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an on-chain event. Events must arrive in block order per fid.
    pub fn apply(&mut self, event: &IdRegistryEvent) -> Result<Applied, RegistryError> {
        let fid = event.fid();
        let block_number = event.block_number();
        if let Some(entry) = self.fids.get(&fid) {
            if block_number < entry.block_number {
                return Err(RegistryError::StaleEvent {
                    fid,
                    block_number,
                    latest: entry.block_number,
                });
            }
        }
        match event {
            IdRegistryEvent::Register { to, .. } => {
                if self.fids.contains_key(&fid) {
                    return Err(RegistryError::AlreadyRegistered(fid));
                }
                self.fids.insert(
                    fid,
                    FidEntry {
                        custody: *to,
                        block_number,
                    },
                );
                Ok(Applied {
                    fid,
                    custody: *to,
                    previous: None,
                })
            }
            IdRegistryEvent::Transfer { to, .. } => {
                let entry = self
                    .fids
                    .get_mut(&fid)
                    .ok_or(RegistryError::UnknownFid(fid))?;
                let previous = entry.custody;
                entry.custody = *to;
                entry.block_number = block_number;
                Ok(Applied {
                    fid,
                    custody: *to,
                    previous: Some(previous),
                })
            }
        }
    }

    /// The current custody address of an fid.
    pub fn custody(&self, fid: u64) -> Option<EthAddress> {
        self.fids.get(&fid).map(|e| e.custody)
    }

    /// Number of registered fids.
    pub fn len(&self) -> usize {
        self.fids.len()
    }

    /// Whether no fid is registered.
    pub fn is_empty(&self) -> bool {
        self.fids.is_empty()
    }
}
