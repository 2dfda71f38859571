//! Chain segments and header verification
//!
//! A [`ChainSegment`] is one contiguous run of stored headers. A
//! [`Blockchain`] is a read view of a segment inside its forest: reads below
//! the segment's checkpoint fall through to the parent, so every height on the
//! segment's effective chain can be queried without knowing the fork point.

use crate::core::block::{BlockHash, BlockHeader, BLOCK_HEADER_SIZE};
use crate::core::chain_state::{ChainForest, SegmentId};
use crate::core::difficulty::{self, HeaderSource, Target};
use crate::core::error::{ChainError, ChainResult};
use crate::core::params::NetworkParams;
use crate::storage::SegmentFile;
use log::{debug, warn};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// Segment state
// =============================================================================

/// In-memory tip of a segment.
///
/// `Verifying` holds a header that is being checked but is not durable yet.
/// It goes back to `Idle` once the header is persisted or rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TipState {
    #[default]
    Idle,
    Verifying(BlockHeader),
}

/// One stored run of headers starting at `checkpoint`
#[derive(Debug)]
pub struct ChainSegment {
    pub(crate) id: SegmentId,
    pub(crate) checkpoint: u64,
    pub(crate) parent: Option<SegmentId>,
    pub(crate) store: SegmentFile,
    tip: Mutex<TipState>,
}

impl ChainSegment {
    pub(crate) fn new(
        id: SegmentId,
        checkpoint: u64,
        parent: Option<SegmentId>,
        store: SegmentFile,
    ) -> Self {
        Self {
            id,
            checkpoint,
            parent,
            store,
            tip: Mutex::new(TipState::Idle),
        }
    }

    fn tip(&self) -> MutexGuard<'_, TipState> {
        self.tip.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tip_state(&self) -> TipState {
        self.tip().clone()
    }

    pub(crate) fn set_current_header(&self, header: BlockHeader) {
        debug!("Setting current header at height {}", header.height);
        *self.tip() = TipState::Verifying(header);
    }

    pub(crate) fn clear_current_header(&self) {
        *self.tip() = TipState::Idle;
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Check one header against its expected parent hash and target.
///
/// `target == None` means no target applies. Proof-of-stake headers are
/// exempt from the hash-versus-target inequality.
pub fn verify_header(
    params: &NetworkParams,
    header: &BlockHeader,
    prev_hash: Option<&BlockHash>,
    target: Option<Target>,
) -> ChainResult<()> {
    if prev_hash != Some(&header.prev_hash) {
        return Err(ChainError::LinkageMismatch {
            expected: prev_hash.map_or_else(|| "none".to_string(), BlockHash::to_string),
            got: header.prev_hash,
        });
    }
    if params.testnet {
        return Ok(());
    }
    let Some(target) = target else {
        return Ok(());
    };

    let bits = difficulty::target_to_bits(target);
    if bits != header.bits {
        return Err(ChainError::DifficultyMismatch {
            expected: bits,
            got: header.bits,
        });
    }
    if !difficulty::is_proof_of_stake_header(Some(header)) {
        let hash = header.hash();
        if hash.to_u256() > target {
            return Err(ChainError::InsufficientWork { hash, target });
        }
    }
    Ok(())
}

// =============================================================================
// Blockchain view
// =============================================================================

/// Read view of one segment within its forest
#[derive(Clone, Copy)]
pub struct Blockchain<'a> {
    forest: &'a ChainForest,
    segment: &'a ChainSegment,
}

impl<'a> Blockchain<'a> {
    pub(crate) fn new(forest: &'a ChainForest, segment: &'a ChainSegment) -> Self {
        Self { forest, segment }
    }

    pub fn id(&self) -> SegmentId {
        self.segment.id
    }

    /// First height stored by this segment
    pub fn checkpoint(&self) -> u64 {
        self.segment.checkpoint
    }

    pub fn parent(&self) -> Option<Blockchain<'a>> {
        self.segment.parent.map(|id| self.forest.chain(id))
    }

    /// Checkpoint of the parent segment, `None` for the root
    pub fn parent_checkpoint(&self) -> Option<u64> {
        self.parent().map(|p| p.checkpoint())
    }

    pub fn params(&self) -> &'a NetworkParams {
        self.forest.params()
    }

    pub(crate) fn segment(&self) -> &'a ChainSegment {
        self.segment
    }

    /// Number of stored headers
    pub fn size(&self) -> u64 {
        self.segment.store.size()
    }

    /// Height the next appended header must have
    pub fn next_height(&self) -> u64 {
        self.checkpoint() + self.size()
    }

    /// Height of the last stored header; `None` while empty
    pub fn height(&self) -> Option<u64> {
        self.next_height().checked_sub(1)
    }

    /// Highest checkpoint among the segments forked from this one
    pub fn get_max_child(&self) -> Option<u64> {
        self.forest
            .chains()
            .filter(|c| c.segment.parent == Some(self.id()))
            .map(|c| c.checkpoint())
            .max()
    }

    /// Start of the part of this segment no child shares
    pub fn get_checkpoint(&self) -> u64 {
        self.get_max_child().unwrap_or_else(|| self.checkpoint())
    }

    pub fn get_branch_size(&self) -> u64 {
        self.next_height().saturating_sub(self.get_checkpoint())
    }

    /// Short display name: the leading significant digits of the branch hash
    pub fn get_name(&self) -> ChainResult<String> {
        let hash = self.get_hash(self.get_checkpoint())?.unwrap_or_default();
        Ok(hash.to_string().trim_start_matches('0').chars().take(10).collect())
    }

    pub fn current_header_state(&self) -> TipState {
        self.segment.tip_state()
    }

    /// Header at `height` on this segment's chain
    pub fn read_header(&self, height: u64) -> ChainResult<Option<BlockHeader>> {
        if self.segment.parent == Some(self.id()) {
            return Err(ChainError::AssertionFailed(format!(
                "segment {} is its own parent",
                self.checkpoint()
            )));
        }
        if height < self.checkpoint() {
            return match self.parent() {
                Some(parent) => parent.read_header(height),
                None => Ok(None),
            };
        }
        let delta = height - self.checkpoint();
        let record = self.segment.store.read_record(delta)?;
        Ok(record.map(|raw| BlockHeader::deserialize(&raw, height)))
    }

    /// Hash at `height`: the genesis identity at 0, the checkpointed hash
    /// inside the trusted prefix, otherwise the stored header's hash.
    pub fn get_hash(&self, height: u64) -> ChainResult<Option<BlockHash>> {
        let params = self.params();
        if height == 0 {
            return Ok(Some(params.genesis_hash));
        }
        if let Some(checkpoint) = params.checkpoints.lookup(height) {
            return Ok(Some(checkpoint.hash));
        }
        Ok(self.read_header(height)?.map(|h| h.hash()))
    }

    /// Hash the header at `height` must reference. The genesis block links to
    /// the all-zero hash.
    pub fn prev_hash(&self, height: u64) -> ChainResult<Option<BlockHash>> {
        match height.checked_sub(1) {
            Some(prev) => self.get_hash(prev),
            None => Ok(Some(BlockHash::zero())),
        }
    }

    /// Whether this chain already stores `header` at its height
    pub fn check_header(&self, header: &BlockHeader) -> ChainResult<bool> {
        Ok(self.get_hash(header.height)? == Some(header.hash()))
    }

    pub fn is_proof_of_stake(&self, index: u64) -> ChainResult<bool> {
        difficulty::is_proof_of_stake(self, index)
    }

    pub fn get_target(&self, index: u64, is_pos: bool) -> ChainResult<Option<Target>> {
        difficulty::get_target(self, self.params(), index, is_pos)
    }

    pub fn verify_header(
        &self,
        header: &BlockHeader,
        prev_hash: Option<&BlockHash>,
        target: Option<Target>,
    ) -> ChainResult<()> {
        verify_header(self.params(), header, prev_hash, target)
    }

    /// Verify consecutive 80-byte records starting at height `index`.
    /// The first failure rejects the whole chunk.
    pub(crate) fn verify_chunk(&self, index: u64, data: &[u8]) -> ChainResult<()> {
        if data.len() % BLOCK_HEADER_SIZE != 0 {
            return Err(ChainError::MalformedChunk(data.len()));
        }

        let mut pending = PendingChunk {
            chain: *self,
            start: index,
            verified: Vec::with_capacity(data.len() / BLOCK_HEADER_SIZE),
        };
        let mut prev_hash = self.prev_hash(index)?;

        for (i, raw) in data.chunks_exact(BLOCK_HEADER_SIZE).enumerate() {
            let height = index + i as u64;
            let raw: &[u8; BLOCK_HEADER_SIZE] = raw
                .try_into()
                .map_err(|_| ChainError::MalformedChunk(data.len()))?;
            let header = BlockHeader::deserialize(raw, height);
            self.segment.set_current_header(header.clone());

            let is_pos = difficulty::is_proof_of_stake(&pending, height)?;
            let target = difficulty::get_target(&pending, self.params(), height, is_pos)?;
            self.verify_header(&header, prev_hash.as_ref(), target)?;

            prev_hash = Some(header.hash());
            pending.verified.push(header);
        }
        Ok(())
    }

    /// Whether `header` links onto this chain and carries valid work.
    ///
    /// With `check_height`, the header must sit exactly one past the stored
    /// tip. Verification failures answer `false`; storage failures are
    /// returned as errors.
    pub fn can_connect(&self, header: &BlockHeader, check_height: bool) -> ChainResult<bool> {
        let height = header.height;
        if check_height && self.next_height() != height {
            debug!(
                "Height mismatch: header at {} does not follow {:?}",
                height,
                self.height()
            );
            return Ok(false);
        }
        if height == 0 {
            let hash = header.hash();
            if hash != self.params().genesis_hash {
                warn!(
                    "Hash at height 0 does not match genesis. Expected: {}, got: {}",
                    self.params().genesis_hash,
                    hash
                );
                return Ok(false);
            }
            return Ok(true);
        }

        let prev_hash = self.prev_hash(height)?;
        if prev_hash != Some(header.prev_hash) {
            debug!(
                "Unexpected prev hash for height {}: expected {:?}, got {}",
                height - 1,
                prev_hash,
                header.prev_hash
            );
            return Ok(false);
        }

        let is_pos = difficulty::is_proof_of_stake_header(Some(header));
        let checked = self
            .get_target(height, is_pos)
            .and_then(|target| self.verify_header(header, prev_hash.as_ref(), target));
        match checked {
            Ok(()) => Ok(true),
            Err(e) if e.is_rejection() => {
                warn!("Failed to verify header of block {}: {}", height, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl HeaderSource for Blockchain<'_> {
    fn read_header(&self, height: u64) -> ChainResult<Option<BlockHeader>> {
        Blockchain::read_header(self, height)
    }

    fn current_header(&self, height: u64) -> Option<BlockHeader> {
        match self.segment.tip_state() {
            TipState::Verifying(header) if header.height == height => Some(header),
            _ => None,
        }
    }
}

/// Headers of a chunk that passed verification but are not stored yet.
/// They shadow whatever the segment holds at the same heights.
struct PendingChunk<'a> {
    chain: Blockchain<'a>,
    start: u64,
    verified: Vec<BlockHeader>,
}

impl HeaderSource for PendingChunk<'_> {
    fn read_header(&self, height: u64) -> ChainResult<Option<BlockHeader>> {
        if height < self.start {
            return self.chain.read_header(height);
        }
        let offset = (height - self.start) as usize;
        Ok(self.verified.get(offset).cloned())
    }

    fn current_header(&self, height: u64) -> Option<BlockHeader> {
        HeaderSource::current_header(&self.chain, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::difficulty::{bits_to_target, target_to_bits};
    use crate::core::params::MAX_TARGET;
    use crate::core::testing::{build_header, header_chain, relaxed_forest, to_chunk};
    use crate::storage::{Checkpoint, CheckpointTable};
    use primitive_types::U256;

    fn base_header(nonce: u32, bits: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: BlockHash::from_bytes([7; 32]),
            merkle_root: BlockHash::from_bytes([3; 32]),
            timestamp: 1_500_000_000,
            bits,
            nonce,
            height: 100,
        }
    }

    #[test]
    fn test_stake_header_exempt_from_work_check() {
        let params = NetworkParams::new(BlockHash::zero());
        let target = bits_to_target(0x03008000).unwrap();
        let prev = BlockHash::from_bytes([7; 32]);

        let stake = base_header(0, 0x03008000);
        assert!(stake.hash().to_u256() > target);
        assert!(verify_header(&params, &stake, Some(&prev), Some(target)).is_ok());

        let work = base_header(1, 0x03008000);
        assert!(work.hash().to_u256() > target);
        assert!(matches!(
            verify_header(&params, &work, Some(&prev), Some(target)),
            Err(ChainError::InsufficientWork { .. })
        ));
    }

    #[test]
    fn test_verify_header_linkage_and_bits() {
        let params = NetworkParams::new(BlockHash::zero());
        let header = base_header(0, 0x1d00ffff);
        let target = bits_to_target(0x1d00ffff).unwrap();

        let wrong_prev = BlockHash::from_bytes([8; 32]);
        assert!(matches!(
            verify_header(&params, &header, Some(&wrong_prev), Some(target)),
            Err(ChainError::LinkageMismatch { .. })
        ));
        assert!(matches!(
            verify_header(&params, &header, None, Some(target)),
            Err(ChainError::LinkageMismatch { .. })
        ));

        let other_target = bits_to_target(0x1c00ffff).unwrap();
        assert!(matches!(
            verify_header(&params, &header, Some(&header.prev_hash), Some(other_target)),
            Err(ChainError::DifficultyMismatch { .. })
        ));
    }

    #[test]
    fn test_relaxed_mode_only_checks_linkage() {
        let params = NetworkParams::relaxed(BlockHash::zero());
        let header = base_header(5, 0x1d00ffff);
        let tiny = U256::from(1u64);
        assert!(verify_header(&params, &header, Some(&header.prev_hash), Some(tiny)).is_ok());
        assert!(verify_header(&params, &header, Some(&BlockHash::zero()), None).is_err());
    }

    #[test]
    fn test_genesis_accepted_without_height_check() {
        let temp_dir = tempfile::tempdir().unwrap();
        let genesis = BlockHeader {
            version: 1,
            prev_hash: BlockHash::zero(),
            merkle_root: BlockHash::from_bytes([9; 32]),
            timestamp: 1_400_000_000,
            bits: target_to_bits(MAX_TARGET),
            nonce: 12_345,
            height: 0,
        };
        let params = NetworkParams::new(genesis.hash());
        let forest = ChainForest::read_blockchains(temp_dir.path(), params).unwrap();

        let root = forest.root();
        assert!(root.can_connect(&genesis, false).unwrap());
        assert!(root.can_connect(&genesis, true).unwrap());

        let mut other = genesis.clone();
        other.nonce += 1;
        assert!(!root.can_connect(&other, false).unwrap());
    }

    #[test]
    fn test_can_connect_requires_next_height() {
        let temp_dir = tempfile::tempdir().unwrap();
        let headers = header_chain(BlockHash::zero(), 0, 5, 1);
        let mut forest = relaxed_forest(temp_dir.path(), &headers[0]);
        assert!(forest
            .connect_chunk(forest.root_id(), 0, &to_chunk(&headers[..4]))
            .unwrap());

        let root = forest.root();
        assert_eq!(root.height(), Some(3));
        assert!(root.can_connect(&headers[4], true).unwrap());
        assert!(!root.can_connect(&headers[3], true).unwrap());
        // already-stored height still links when the height check is off
        assert!(root.can_connect(&headers[3], false).unwrap());
        assert!(root.check_header(&headers[2]).unwrap());
    }

    #[test]
    fn test_can_connect_rejects_wrong_prev() {
        let temp_dir = tempfile::tempdir().unwrap();
        let headers = header_chain(BlockHash::zero(), 0, 3, 1);
        let mut forest = relaxed_forest(temp_dir.path(), &headers[0]);
        forest
            .connect_chunk(forest.root_id(), 0, &to_chunk(&headers[..2]))
            .unwrap();

        let stray = build_header(BlockHash::from_bytes([4; 32]), 2, 1_000, 0x1e0fffff, 1);
        assert!(!forest.root().can_connect(&stray, true).unwrap());
    }

    #[test]
    fn test_verify_chunk_sees_earlier_chunk_headers() {
        let temp_dir = tempfile::tempdir().unwrap();
        // stake blocks 20s apart on a strict network: from height 3 on, each
        // retarget reads the two previous headers of the same chunk
        let mut headers = Vec::new();
        let mut prev = BlockHash::zero();
        let mut bits = target_to_bits(MAX_TARGET);
        for height in 0..8u64 {
            if height >= 3 {
                let scaled = bits_to_target(bits).unwrap() * U256::from(459u64 * 30 + 40)
                    / U256::from(461u64 * 30);
                bits = target_to_bits(scaled);
            }
            let header = build_header(prev, height, 1_000 + 20 * height as u32, bits, 0);
            prev = header.hash();
            headers.push(header);
        }
        assert_ne!(headers[7].bits, headers[0].bits);

        let params = NetworkParams::new(headers[0].hash());
        let forest = ChainForest::read_blockchains(temp_dir.path(), params).unwrap();
        let root = forest.root();
        root.verify_chunk(0, &to_chunk(&headers)).unwrap();
        assert_eq!(root.size(), 0);

        let mut tampered = headers.clone();
        tampered[5].bits = headers[4].bits;
        assert!(matches!(
            root.verify_chunk(0, &to_chunk(&tampered)),
            Err(ChainError::DifficultyMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_chunk_rejects_partial_records() {
        let temp_dir = tempfile::tempdir().unwrap();
        let headers = header_chain(BlockHash::zero(), 0, 2, 1);
        let forest = relaxed_forest(temp_dir.path(), &headers[0]);
        let mut data = to_chunk(&headers);
        data.push(0);
        assert!(matches!(
            forest.root().verify_chunk(0, &data),
            Err(ChainError::MalformedChunk(161))
        ));
    }

    #[test]
    fn test_checkpoint_hashes_are_trusted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let trusted = BlockHash::from_bytes([0xab; 32]);
        let params = NetworkParams::relaxed(BlockHash::zero()).with_checkpoints(
            CheckpointTable::from_entries(vec![
                Checkpoint::new(BlockHash::zero(), MAX_TARGET),
                Checkpoint::new(trusted, MAX_TARGET),
            ]),
        );
        let forest = ChainForest::read_blockchains(temp_dir.path(), params).unwrap();
        let root = forest.root();
        assert_eq!(root.get_hash(1).unwrap(), Some(trusted));
        assert_eq!(root.get_hash(2).unwrap(), None);
        assert_eq!(root.prev_hash(0).unwrap(), Some(BlockHash::zero()));
    }
}
