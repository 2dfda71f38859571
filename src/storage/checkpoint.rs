//! Checkpoint System
//!
//! Trusted (hash, target) pairs for a dense prefix of the chain, starting at
//! height 0. Heights inside the table skip difficulty recomputation and use
//! the checkpointed hash as ground truth.

use crate::core::block::BlockHash;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

// =============================================================================
// Checkpoint Entry
// =============================================================================

/// A checkpoint representing a known-good header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Header hash at this height
    pub hash: BlockHash,
    /// Full target required at this height
    pub target: U256,
}

impl Checkpoint {
    pub fn new(hash: BlockHash, target: U256) -> Self {
        Self { hash, target }
    }
}

// =============================================================================
// Checkpoint Table
// =============================================================================

/// Height-indexed table; entry `i` belongs to height `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointTable {
    entries: Vec<Checkpoint>,
}

impl CheckpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Checkpoint>) -> Self {
        Self { entries }
    }

    /// Checkpoint at height, if the height is inside the trusted prefix
    pub fn lookup(&self, height: u64) -> Option<&Checkpoint> {
        usize::try_from(height)
            .ok()
            .and_then(|index| self.entries.get(index))
    }

    /// Whether the height is covered by the table
    pub fn covers(&self, height: u64) -> bool {
        self.lookup(height).is_some()
    }

    /// Number of trusted heights
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.entries.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================
