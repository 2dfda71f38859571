//! Core header chain components
//!
//! This module contains the fundamental building blocks:
//! - Block headers (80-byte codec, double SHA-256 identity)
//! - Difficulty (compact targets, stake/work retargeting)
//! - Blockchain (per-segment view, header and chunk verification)
//! - Chain state (segment registry, forks, swaps, bootstrap)

pub mod block;
pub mod blockchain;
pub mod chain_state;
pub mod difficulty;
pub mod error;
pub mod params;

pub use block::{hash_header, BlockHash, BlockHeader, BLOCK_HEADER_SIZE, HASH_SIZE};
pub use blockchain::{verify_header, Blockchain, ChainSegment, TipState};
pub use chain_state::{ChainForest, ChainSummary, HeaderChains, SegmentId};
pub use difficulty::{
    bits_to_target, get_target, is_proof_of_stake, target_to_bits, HeaderSource, Target,
};
pub use error::{ChainError, ChainResult};
pub use params::{
    NetworkParams, CUTOFF_POW_BLOCK, HARD_MAX_TARGET_STAKE, MAX_TARGET, MAX_TARGET_STAKE,
};

#[cfg(test)]
pub(crate) mod testing {
    //! Header fixtures shared by the chain tests

    use super::*;
    use std::path::Path;

    pub fn build_header(
        prev_hash: BlockHash,
        height: u64,
        timestamp: u32,
        bits: u32,
        nonce: u32,
    ) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: BlockHash::from_bytes([height as u8; HASH_SIZE]),
            timestamp,
            bits,
            nonce,
            height,
        }
    }

    /// `count` linked work headers starting at `start`. Different `nonce`
    /// values give different branches.
    pub fn header_chain(prev_hash: BlockHash, start: u64, count: u64, nonce: u32) -> Vec<BlockHeader> {
        let mut prev = prev_hash;
        (start..start + count)
            .map(|height| {
                let header = build_header(prev, height, 1_000 + 60 * height as u32, 0x1e0fffff, nonce);
                prev = header.hash();
                header
            })
            .collect()
    }

    pub fn to_chunk(headers: &[BlockHeader]) -> Vec<u8> {
        headers.iter().flat_map(|h| h.serialize()).collect()
    }

    /// Forest on a relaxed network whose genesis is `genesis`
    pub fn relaxed_forest(dir: &Path, genesis: &BlockHeader) -> ChainForest {
        ChainForest::read_blockchains(dir, NetworkParams::relaxed(genesis.hash())).unwrap()
    }
}
