//! Network parameters and protocol constants
//!
//! Trusted inputs accepted from configuration: the genesis identity, the
//! relaxed (test network) flag and the checkpoint table.

use crate::core::block::BlockHash;
use crate::storage::CheckpointTable;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Proof-of-work limit, `~uint256(0) >> 20`
pub const MAX_TARGET: U256 = U256([
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x0000_0fff_ffff_ffff,
]);

/// Proof-of-stake limit, `~uint256(0) >> 24`
pub const MAX_TARGET_STAKE: U256 = U256([
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x0000_00ff_ffff_ffff,
]);

/// Early proof-of-stake hard limit, `~uint256(0) >> 30`
pub const HARD_MAX_TARGET_STAKE: U256 = U256([
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x0000_0003_ffff_ffff,
]);

/// Every block above this height is proof-of-stake
pub const CUTOFF_POW_BLOCK: u64 = 465_000;

/// Above this height (next block) PoS uses the hard stake limit
pub const HARD_STAKE_LIMIT_HEIGHT: u64 = 14_060;

/// Above this height (next block) PoS uses the regular stake limit
pub const STAKE_LIMIT_HEIGHT: u64 = 15_000;

/// Retarget timespan: 0.16 days, in seconds
pub const TARGET_TIMESPAN: i64 = 13_824;

/// Target spacing between stake blocks, in seconds
pub const STAKE_TARGET_SPACING: i64 = 30;

/// Upper bound on the work block spacing, in seconds
pub const TARGET_SPACING_WORK_MAX: i64 = 12 * STAKE_TARGET_SPACING;

/// Consensus parameters of the network being followed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Hash of the block at height 0
    pub genesis_hash: BlockHash,
    /// Relaxed mode: skip target and proof-of-work checks
    #[serde(default)]
    pub testnet: bool,
    /// Trusted prefix of (hash, target) pairs
    #[serde(default)]
    pub checkpoints: CheckpointTable,
}

impl NetworkParams {
    pub fn new(genesis_hash: BlockHash) -> Self {
        Self {
            genesis_hash,
            testnet: false,
            checkpoints: CheckpointTable::new(),
        }
    }

    /// Parameters with target and work checks disabled
    pub fn relaxed(genesis_hash: BlockHash) -> Self {
        Self {
            testnet: true,
            ..Self::new(genesis_hash)
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointTable) -> Self {
        self.checkpoints = checkpoints;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_match_shifted_max() {
        assert_eq!(MAX_TARGET, U256::MAX >> 20);
        assert_eq!(MAX_TARGET_STAKE, U256::MAX >> 24);
        assert_eq!(HARD_MAX_TARGET_STAKE, U256::MAX >> 30);
    }

    #[test]
    fn test_params_json_defaults() {
        let json = format!("{{\"genesis_hash\":\"{}\"}}", "11".repeat(32));
        let params: NetworkParams = serde_json::from_str(&json).unwrap();
        assert!(!params.testnet);
        assert!(params.checkpoints.is_empty());
    }
}
