//! Target and difficulty engine
//!
//! Converts between compact ("bits") and full targets, classifies blocks as
//! proof-of-work or proof-of-stake, and computes the target the next block of
//! a given kind must carry.

use crate::core::block::BlockHeader;
use crate::core::error::{ChainError, ChainResult};
use crate::core::params::{
    NetworkParams, CUTOFF_POW_BLOCK, HARD_MAX_TARGET_STAKE, HARD_STAKE_LIMIT_HEIGHT, MAX_TARGET,
    MAX_TARGET_STAKE, STAKE_LIMIT_HEIGHT, STAKE_TARGET_SPACING, TARGET_SPACING_WORK_MAX,
    TARGET_TIMESPAN,
};
use log::debug;
use primitive_types::{U256, U512};

/// Full-precision difficulty target
pub type Target = U256;

/// Smallest mantissa a compact target may carry
const MIN_MANTISSA: u32 = 0x8000;

/// Largest mantissa a compact target may carry
const MAX_MANTISSA: u32 = 0x7f_ffff;

// =============================================================================
// Compact encoding
// =============================================================================

/// Expand a compact target into its full value
pub fn bits_to_target(bits: u32) -> ChainResult<Target> {
    let exponent = bits >> 24;
    let mantissa = bits & 0xff_ffff;
    if !(MIN_MANTISSA..=MAX_MANTISSA).contains(&mantissa) {
        return Err(ChainError::MalformedTarget(bits));
    }

    let mantissa_bits = (32 - mantissa.leading_zeros()) as usize;
    let mantissa = U256::from(mantissa);
    if exponent <= 3 {
        return Ok(mantissa >> (8 * (3 - exponent) as usize));
    }

    let shift = 8 * (exponent - 3) as usize;
    if shift + mantissa_bits > 256 {
        return Err(ChainError::MalformedTarget(bits));
    }
    Ok(mantissa << shift)
}

/// Compress a full target. Lossy: only the top three bytes survive.
pub fn target_to_bits(target: Target) -> u32 {
    let mut bytes = [0u8; 32];
    target.to_big_endian(&mut bytes);

    let mut significant: &[u8] = &bytes;
    while significant.len() > 3 && significant[0] == 0 {
        significant = &significant[1..];
    }

    let mut exponent = significant.len() as u32;
    let mut mantissa = u32::from_be_bytes([0, significant[0], significant[1], significant[2]]);
    // Keep the sign bit of the mantissa clear
    if mantissa >= 0x80_0000 {
        exponent += 1;
        mantissa >>= 8;
    }
    exponent << 24 | mantissa
}

// =============================================================================
// Block kind
// =============================================================================

/// Read access to the headers of one chain, as seen by the engine.
pub trait HeaderSource {
    /// Persisted header at `height` on this chain
    fn read_header(&self, height: u64) -> ChainResult<Option<BlockHeader>>;

    /// In-memory header under verification at `height`, if any
    fn current_header(&self, height: u64) -> Option<BlockHeader>;

    /// Persisted header, falling back to the header under verification
    fn header_or_current(&self, height: u64) -> ChainResult<Option<BlockHeader>> {
        match self.read_header(height)? {
            Some(header) => Ok(Some(header)),
            None => Ok(self.current_header(height)),
        }
    }
}

/// A header is proof-of-stake if its nonce is zero or it sits past the cutoff.
/// An absent header counts as proof-of-work.
pub fn is_proof_of_stake_header(header: Option<&BlockHeader>) -> bool {
    match header {
        Some(header) => header.nonce == 0 || header.height > CUTOFF_POW_BLOCK,
        None => false,
    }
}

/// Classify the block at `index` on the chain behind `source`
pub fn is_proof_of_stake<S: HeaderSource + ?Sized>(source: &S, index: u64) -> ChainResult<bool> {
    if index > CUTOFF_POW_BLOCK {
        return Ok(true);
    }
    let header = source.header_or_current(index)?;
    Ok(is_proof_of_stake_header(header.as_ref()))
}

/// Walk back from `index` to the nearest block of the requested kind.
/// Never walks below height 1.
pub fn get_last_block_index<S: HeaderSource + ?Sized>(
    source: &S,
    index: u64,
    is_pos: bool,
) -> ChainResult<u64> {
    let mut pindex = index;
    while pindex > 1 && is_proof_of_stake(source, pindex)? != is_pos {
        pindex -= 1;
    }
    Ok(pindex)
}

// =============================================================================
// Retargeting
// =============================================================================

/// Ceiling for a block of the given kind at `index`
pub fn max_target(index: u64, is_pos: bool) -> Target {
    if !is_pos {
        return MAX_TARGET;
    }
    if index + 1 > STAKE_LIMIT_HEIGHT {
        MAX_TARGET_STAKE
    } else if index + 1 > HARD_STAKE_LIMIT_HEIGHT {
        HARD_MAX_TARGET_STAKE
    } else {
        MAX_TARGET
    }
}

/// `target(bits) * numerator / denominator`, floored, at 512-bit width.
/// A non-positive numerator yields a zero target.
pub fn scale_target(bits: u32, numerator: i64, denominator: i64) -> ChainResult<U512> {
    let base = U512::from(bits_to_target(bits)?);
    if numerator <= 0 {
        return Ok(U512::zero());
    }
    let scaled = base * U512::from(numerator as u64);
    if denominator > 0 {
        Ok(scaled / U512::from(denominator as u64))
    } else {
        Ok(scaled)
    }
}

fn narrow(value: U512) -> Target {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}

/// Target required for the block at `index` of the given kind.
///
/// Returns `None` on a relaxed network, meaning no target check applies.
pub fn get_target<S: HeaderSource + ?Sized>(
    source: &S,
    params: &NetworkParams,
    index: u64,
    is_pos: bool,
) -> ChainResult<Option<Target>> {
    if params.testnet {
        return Ok(None);
    }

    let ceiling = max_target(index, is_pos);
    if index <= 2 {
        debug!("Returning max target for block index {}", index);
        return Ok(Some(ceiling));
    }
    if let Some(checkpoint) = params.checkpoints.lookup(index) {
        debug!("Target for block index {} taken from checkpoints", index);
        return Ok(Some(checkpoint.target));
    }

    let prev_index = get_last_block_index(source, index - 1, is_pos)?;
    let prev_prev_index = get_last_block_index(source, prev_index - 1, is_pos)?;

    let prev = source
        .header_or_current(prev_index)?
        .ok_or(ChainError::MissingHeader(prev_index))?;
    let prev_prev = source
        .header_or_current(prev_prev_index)?
        .ok_or(ChainError::MissingHeader(prev_prev_index))?;

    let actual_spacing = i64::from(prev.timestamp) - i64::from(prev_prev.timestamp);
    let target_spacing = if is_pos {
        STAKE_TARGET_SPACING
    } else {
        TARGET_SPACING_WORK_MAX.min(STAKE_TARGET_SPACING * (index - prev_index) as i64)
    };
    let interval = TARGET_TIMESPAN / target_spacing;

    let numerator = (interval - 1) * target_spacing + actual_spacing + actual_spacing;
    let denominator = (interval + 1) * target_spacing;
    let new_target = scale_target(prev.bits, numerator, denominator)?;

    if new_target > U512::from(ceiling) {
        debug!(
            "New target exceeds the ceiling for block index {}, using {:#x}",
            index, ceiling
        );
        return Ok(Some(ceiling));
    }
    Ok(Some(narrow(new_target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::BlockHash;
    use crate::storage::{Checkpoint, CheckpointTable};
    use std::collections::HashMap;

    /// In-memory chain keyed by height
    #[derive(Default)]
    struct MemoryChain {
        headers: HashMap<u64, BlockHeader>,
        current: Option<BlockHeader>,
    }

    impl MemoryChain {
        fn push(&mut self, height: u64, timestamp: u32, bits: u32, nonce: u32) {
            self.headers.insert(
                height,
                BlockHeader {
                    version: 1,
                    prev_hash: BlockHash::zero(),
                    merkle_root: BlockHash::zero(),
                    timestamp,
                    bits,
                    nonce,
                    height,
                },
            );
        }
    }

    impl HeaderSource for MemoryChain {
        fn read_header(&self, height: u64) -> ChainResult<Option<BlockHeader>> {
            Ok(self.headers.get(&height).cloned())
        }

        fn current_header(&self, height: u64) -> Option<BlockHeader> {
            self.current.clone().filter(|h| h.height == height)
        }
    }

    fn params() -> NetworkParams {
        NetworkParams::new(BlockHash::zero())
    }

    #[test]
    fn test_bits_to_target() {
        assert_eq!(
            bits_to_target(0x1d00ffff).unwrap(),
            U256::from(0xffffu64) << (8 * 26)
        );
        assert_eq!(bits_to_target(0x03123456).unwrap(), U256::from(0x123456u64));
    }

    #[test]
    fn test_bits_to_target_rejects_mantissa() {
        assert!(matches!(
            bits_to_target(0x1d007fff),
            Err(ChainError::MalformedTarget(0x1d007fff))
        ));
        assert!(bits_to_target(0x1d800000).is_err());
        assert!(bits_to_target(0).is_err());
    }

    #[test]
    fn test_target_to_bits() {
        assert_eq!(target_to_bits(MAX_TARGET), 0x1e0fffff);
        assert_eq!(target_to_bits(MAX_TARGET_STAKE), 0x1e00ffff);
        assert_eq!(target_to_bits(HARD_MAX_TARGET_STAKE), 0x1d03ffff);
        assert_eq!(target_to_bits(U256::zero()), 0x03000000);
    }

    #[test]
    fn test_compact_roundtrip_on_compact_domain() {
        for bits in [0x1d00ffffu32, 0x1e0fffff, 0x1b0404cb, 0x1d03ffff, 0x1c7fffff, 0x04008000] {
            let target = bits_to_target(bits).unwrap();
            assert_eq!(bits_to_target(target_to_bits(target)).unwrap(), target);
        }
    }

    #[test]
    fn test_compact_is_lossy() {
        let target = U256::from(0x1234_5678u64);
        let approx = bits_to_target(target_to_bits(target)).unwrap();
        assert_eq!(approx, U256::from(0x1234_5600u64));
    }

    #[test]
    fn test_proof_of_stake_classification() {
        let mut chain = MemoryChain::default();
        chain.push(10, 0, 0x1e0fffff, 0);
        chain.push(11, 0, 0x1e0fffff, 42);
        assert!(is_proof_of_stake(&chain, 10).unwrap());
        assert!(!is_proof_of_stake(&chain, 11).unwrap());
        // unknown header counts as work until the cutoff
        assert!(!is_proof_of_stake(&chain, 12).unwrap());
        assert!(is_proof_of_stake(&chain, CUTOFF_POW_BLOCK + 1).unwrap());
    }

    #[test]
    fn test_current_header_visible_to_classification() {
        let mut chain = MemoryChain::default();
        let mut header = BlockHeader {
            version: 1,
            prev_hash: BlockHash::zero(),
            merkle_root: BlockHash::zero(),
            timestamp: 0,
            bits: 0,
            nonce: 0,
            height: 20,
        };
        chain.current = Some(header.clone());
        assert!(is_proof_of_stake(&chain, 20).unwrap());
        header.nonce = 9;
        chain.current = Some(header);
        assert!(!is_proof_of_stake(&chain, 20).unwrap());
    }

    #[test]
    fn test_max_target_thresholds() {
        assert_eq!(max_target(20_000, false), MAX_TARGET);
        assert_eq!(max_target(14_059, true), MAX_TARGET);
        assert_eq!(max_target(14_060, true), HARD_MAX_TARGET_STAKE);
        assert_eq!(max_target(14_999, true), HARD_MAX_TARGET_STAKE);
        assert_eq!(max_target(15_000, true), MAX_TARGET_STAKE);
    }

    #[test]
    fn test_bootstrap_heights_use_ceiling() {
        let chain = MemoryChain::default();
        for index in 0..=2 {
            assert_eq!(
                get_target(&chain, &params(), index, false).unwrap(),
                Some(MAX_TARGET)
            );
        }
    }

    #[test]
    fn test_relaxed_network_skips_targets() {
        let chain = MemoryChain::default();
        let params = NetworkParams::relaxed(BlockHash::zero());
        assert_eq!(get_target(&chain, &params, 500, true).unwrap(), None);
    }

    #[test]
    fn test_checkpointed_heights_return_checkpoint_target() {
        let chain = MemoryChain::default();
        let entries = (0..10u64)
            .map(|i| Checkpoint::new(BlockHash::from_bytes([i as u8; 32]), U256::from(1000 + i)))
            .collect();
        let params = params().with_checkpoints(CheckpointTable::from_entries(entries));
        for index in 3..10u64 {
            assert_eq!(
                get_target(&chain, &params, index, false).unwrap(),
                Some(U256::from(1000 + index))
            );
        }
    }

    #[test]
    fn test_stake_retarget_on_schedule_keeps_target() {
        let mut chain = MemoryChain::default();
        for height in 1..=100u64 {
            chain.push(height, 1_000 + 30 * height as u32, 0x1d00ffff, 0);
        }
        let target = get_target(&chain, &params(), 101, true).unwrap().unwrap();
        // numerator == denominator when blocks arrive exactly on spacing
        assert_eq!(target_to_bits(target), 0x1d00ffff);
    }

    #[test]
    fn test_stake_retarget_fast_blocks_tighten() {
        let mut chain = MemoryChain::default();
        for height in 1..=100u64 {
            chain.push(height, 1_000 + 10 * height as u32, 0x1d00ffff, 0);
        }
        let target = get_target(&chain, &params(), 101, true).unwrap().unwrap();
        let prev = bits_to_target(0x1d00ffff).unwrap();
        // interval 460: (459*30 + 20) / (461*30)
        let expected = prev * U256::from(459u64 * 30 + 20) / U256::from(461u64 * 30);
        assert_eq!(target, expected);
        assert!(target < prev);
    }

    #[test]
    fn test_work_retarget_skips_stake_blocks() {
        let mut chain = MemoryChain::default();
        // work blocks at 96 and 98, stake blocks in between and after
        chain.push(95, 900, 0x1d00ffff, 0);
        chain.push(96, 1_000, 0x1d00ffff, 7);
        chain.push(97, 1_030, 0x1d00ffff, 0);
        chain.push(98, 1_120, 0x1c7fffff, 7);
        chain.push(99, 1_150, 0x1d00ffff, 0);
        chain.push(100, 1_180, 0x1d00ffff, 0);

        let target = get_target(&chain, &params(), 101, false).unwrap().unwrap();
        // prev work block 98, before that 96; spacing min(360, 30*3) = 90
        let spacing = 90i64;
        let interval = TARGET_TIMESPAN / spacing;
        let numerator = (interval - 1) * spacing + 2 * 120;
        let denominator = (interval + 1) * spacing;
        let expected = bits_to_target(0x1c7fffff).unwrap() * U256::from(numerator as u64)
            / U256::from(denominator as u64);
        assert_eq!(target, expected);
    }

    #[test]
    fn test_retarget_clamps_to_ceiling() {
        let mut chain = MemoryChain::default();
        for height in 1..=10u64 {
            chain.push(height, 100_000 * height as u32, 0x1e0fffff, 5);
        }
        let target = get_target(&chain, &params(), 11, false).unwrap().unwrap();
        assert_eq!(target, MAX_TARGET);
    }

    #[test]
    fn test_retarget_missing_history() {
        let chain = MemoryChain::default();
        assert!(matches!(
            get_target(&chain, &params(), 50, true),
            Err(ChainError::MissingHeader(_))
        ));
    }

    #[test]
    fn test_scale_target_negative_numerator() {
        assert_eq!(scale_target(0x1d00ffff, -5, 100).unwrap(), U512::zero());
    }
}
