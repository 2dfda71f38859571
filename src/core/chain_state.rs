//! Chain State Management
//!
//! Owns every known chain segment and the index from checkpoint height to
//! segment. Handles fork creation, chunk import, segment swaps when a fork
//! outgrows its parent, and bootstrap from disk.
//!
//! [`ChainForest`] is the single-threaded core; [`HeaderChains`] wraps it in a
//! reader/writer lock for use by concurrent callers.

use crate::config::ChainConfig;
use crate::core::block::{BlockHash, BlockHeader, BLOCK_HEADER_SIZE};
use crate::core::blockchain::{Blockchain, ChainSegment};
use crate::core::error::{ChainError, ChainResult};
use crate::core::params::NetworkParams;
use crate::storage::{parse_fork_file_name, segment_path, SegmentFile, FORKS_DIR_NAME};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const RECORD_SIZE: u64 = BLOCK_HEADER_SIZE as u64;

/// Suffix used while renaming fork files in two phases
const STAGING_SUFFIX: &str = "swap";

/// Stable handle to a segment. Survives swaps; the checkpoint it maps to
/// does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SegmentId(pub(crate) usize);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of one segment, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub id: SegmentId,
    pub name: String,
    pub checkpoint: u64,
    pub parent_checkpoint: Option<u64>,
    pub height: Option<u64>,
    pub branch_size: u64,
    pub is_best: bool,
}

// =============================================================================
// Chain Forest
// =============================================================================

/// All known segments, keyed by checkpoint height
#[derive(Debug)]
pub struct ChainForest {
    headers_dir: PathBuf,
    params: NetworkParams,
    segments: Vec<ChainSegment>,
    by_checkpoint: BTreeMap<u64, SegmentId>,
}

impl ChainForest {
    /// Load the root segment and every fork file that still connects.
    ///
    /// Forks are loaded in ascending parent checkpoint order so each parent
    /// is registered before its children. Forks that no longer connect stay
    /// on disk but are not registered.
    pub fn read_blockchains(headers_dir: impl Into<PathBuf>, params: NetworkParams) -> ChainResult<Self> {
        let headers_dir = headers_dir.into();
        let forks_dir = headers_dir.join(FORKS_DIR_NAME);
        fs::create_dir_all(&forks_dir)?;

        let root_path = segment_path(&headers_dir, None, 0);
        if !root_path.exists() {
            fs::File::create(&root_path)?;
        }
        let root = ChainSegment::new(SegmentId(0), 0, None, SegmentFile::open(root_path)?);

        let mut forest = Self {
            headers_dir,
            params,
            segments: vec![root],
            by_checkpoint: BTreeMap::from([(0, SegmentId(0))]),
        };

        let mut forks = Vec::new();
        for entry in fs::read_dir(&forks_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_fork_file_name(&name) {
                Some((parent, checkpoint)) => forks.push((parent, checkpoint, entry.path())),
                None => debug!("Ignoring {} in forks directory", name),
            }
        }
        forks.sort_by_key(|(parent, checkpoint, _)| (*parent, *checkpoint));

        for (parent_checkpoint, checkpoint, path) in forks {
            let Some(&parent_id) = forest.by_checkpoint.get(&parent_checkpoint) else {
                warn!("Cannot connect {}: no segment at {}", path.display(), parent_checkpoint);
                continue;
            };
            if forest.by_checkpoint.contains_key(&checkpoint) {
                warn!("Cannot connect {}: checkpoint {} already taken", path.display(), checkpoint);
                continue;
            }

            let store = SegmentFile::open(path.clone())?;
            let first = store
                .read_record(0)?
                .map(|raw| BlockHeader::deserialize(&raw, checkpoint));
            let connects = match &first {
                Some(header) => forest.chain(parent_id).can_connect(header, false)?,
                None => false,
            };
            if !connects {
                warn!("Cannot connect {}", path.display());
                continue;
            }

            let id = SegmentId(forest.segments.len());
            forest
                .segments
                .push(ChainSegment::new(id, checkpoint, Some(parent_id), store));
            forest.by_checkpoint.insert(checkpoint, id);
            info!("Loaded fork {} at {} (parent {})", id, checkpoint, parent_checkpoint);
        }

        info!("Loaded {} chain segment(s)", forest.by_checkpoint.len());
        Ok(forest)
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn headers_dir(&self) -> &Path {
        &self.headers_dir
    }

    fn segment(&self, id: SegmentId) -> &ChainSegment {
        &self.segments[id.0]
    }

    /// View of a segment. `id` must come from this forest.
    pub fn chain(&self, id: SegmentId) -> Blockchain<'_> {
        Blockchain::new(self, self.segment(id))
    }

    pub fn root_id(&self) -> SegmentId {
        self.by_checkpoint.get(&0).copied().unwrap_or(SegmentId(0))
    }

    pub fn root(&self) -> Blockchain<'_> {
        self.chain(self.root_id())
    }

    /// Segment registered at `checkpoint`
    pub fn by_checkpoint(&self, checkpoint: u64) -> Option<SegmentId> {
        self.by_checkpoint.get(&checkpoint).copied()
    }

    /// Registered segments in ascending checkpoint order
    pub fn chains(&self) -> impl Iterator<Item = Blockchain<'_>> + '_ {
        self.by_checkpoint.values().map(move |id| self.chain(*id))
    }

    pub fn len(&self) -> usize {
        self.by_checkpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_checkpoint.is_empty()
    }

    /// The tallest segment; ties go to the lowest checkpoint
    pub fn best_chain(&self) -> SegmentId {
        self.chains()
            .min_by_key(|c| std::cmp::Reverse(c.next_height()))
            .map(|c| c.id())
            .unwrap_or_else(|| self.root_id())
    }

    /// First segment that already stores `header`
    pub fn check_header(&self, header: &BlockHeader) -> ChainResult<Option<SegmentId>> {
        for chain in self.chains() {
            if chain.check_header(header)? {
                return Ok(Some(chain.id()));
            }
        }
        Ok(None)
    }

    /// First segment `header` can be appended to. The accepting segment
    /// keeps the header as its pending tip until it is saved, so callers
    /// must hold exclusive access to the forest.
    pub(crate) fn can_connect(&self, header: &BlockHeader) -> ChainResult<Option<SegmentId>> {
        for chain in self.chains() {
            chain.segment().set_current_header(header.clone());
            match chain.can_connect(header, true) {
                Ok(true) => return Ok(Some(chain.id())),
                Ok(false) => chain.segment().clear_current_header(),
                Err(e) => {
                    chain.segment().clear_current_header();
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    pub fn summaries(&self) -> ChainResult<Vec<ChainSummary>> {
        let best = self.best_chain();
        self.chains()
            .map(|chain| {
                Ok(ChainSummary {
                    id: chain.id(),
                    name: chain.get_name()?,
                    checkpoint: chain.checkpoint(),
                    parent_checkpoint: chain.parent_checkpoint(),
                    height: chain.height(),
                    branch_size: chain.get_branch_size(),
                    is_best: chain.id() == best,
                })
            })
            .collect()
    }

    /// Path a segment's file should have under its current identity
    fn expected_path(&self, id: SegmentId) -> PathBuf {
        let segment = self.segment(id);
        let parent_checkpoint = segment.parent.map(|p| self.segment(p).checkpoint);
        segment_path(&self.headers_dir, parent_checkpoint, segment.checkpoint)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Append one header at the segment's next height
    pub fn save_header(&mut self, id: SegmentId, header: &BlockHeader) -> ChainResult<()> {
        let segment = self.segment(id);
        let delta = header.height.checked_sub(segment.checkpoint).ok_or_else(|| {
            ChainError::AssertionFailed(format!(
                "header at {} is below checkpoint {}",
                header.height, segment.checkpoint
            ))
        })?;
        let size = segment.store.size();
        if delta != size {
            return Err(ChainError::AssertionFailed(format!(
                "header at {} does not extend segment {} of size {}",
                header.height, segment.checkpoint, size
            )));
        }

        segment.store.write(&header.serialize(), delta * RECORD_SIZE, false)?;
        segment.clear_current_header();
        debug!("Saved header {} at height {}", header.hash(), header.height);
        self.swap_with_parent(id)?;
        Ok(())
    }

    /// Store a verified chunk starting at height `index`. Records below the
    /// segment's checkpoint are dropped. Past the checkpointed prefix the
    /// write also discards anything stored after the chunk's start.
    pub fn save_chunk(&mut self, id: SegmentId, index: u64, chunk: &[u8]) -> ChainResult<()> {
        let segment = self.segment(id);
        let (data, offset) = if index < segment.checkpoint {
            let skip = ((segment.checkpoint - index) * RECORD_SIZE) as usize;
            (&chunk[skip.min(chunk.len())..], 0)
        } else {
            (chunk, (index - segment.checkpoint) * RECORD_SIZE)
        };
        if data.is_empty() {
            debug!("Chunk at {} lies below checkpoint {}", index, segment.checkpoint);
            return Ok(());
        }

        let truncate = index > self.params.checkpoints.len();
        segment.store.write(data, offset, truncate)?;
        segment.clear_current_header();
        self.swap_with_parent(id)?;
        Ok(())
    }

    /// Verify then store a chunk. Returns `false` when verification rejects
    /// it; nothing is written in that case.
    pub fn connect_chunk(&mut self, id: SegmentId, index: u64, data: &[u8]) -> ChainResult<bool> {
        let verified = self.chain(id).verify_chunk(index, data);
        self.segment(id).clear_current_header();
        match verified {
            Ok(()) => {}
            Err(e) if e.is_rejection() => {
                warn!("verify_chunk {} failed: {}", index, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.save_chunk(id, index, data)?;
        info!(
            "Connected chunk of {} header(s) at {}",
            data.len() / BLOCK_HEADER_SIZE,
            index
        );
        Ok(true)
    }

    /// Start a new segment off `parent` whose first header is `header`.
    /// The header must compete with a stored one; a header extending the
    /// parent's tip is appended with [`ChainForest::save_header`] instead.
    pub fn fork(&mut self, parent_id: SegmentId, header: &BlockHeader) -> ChainResult<SegmentId> {
        let checkpoint = header.height;
        let parent = self.chain(parent_id);
        if self.by_checkpoint.contains_key(&checkpoint) {
            return Err(ChainError::AssertionFailed(format!(
                "a segment already starts at {}",
                checkpoint
            )));
        }
        if checkpoint <= parent.checkpoint() || checkpoint >= parent.next_height() {
            return Err(ChainError::AssertionFailed(format!(
                "segment {} cannot fork at {} (covers {}..{})",
                parent.checkpoint(),
                checkpoint,
                parent.checkpoint(),
                parent.next_height()
            )));
        }

        let path = segment_path(&self.headers_dir, Some(parent.checkpoint()), checkpoint);
        let store = SegmentFile::create(path)?;
        let id = SegmentId(self.segments.len());
        self.segments
            .push(ChainSegment::new(id, checkpoint, Some(parent_id), store));
        self.by_checkpoint.insert(checkpoint, id);
        info!("Created fork {} at {} off {}", id, checkpoint, parent_id);

        self.save_header(id, header)?;
        Ok(id)
    }

    /// Exchange roles with the parent once this segment's branch is longer
    /// than the part of the parent it diverges from. Returns whether a swap
    /// happened.
    ///
    /// Both files are rewritten before any identity changes, but the
    /// sequence is not atomic: a crash part way through can leave the two
    /// files inconsistent until the next successful swap.
    pub fn swap_with_parent(&mut self, id: SegmentId) -> ChainResult<bool> {
        let segment = self.segment(id);
        let Some(parent_id) = segment.parent else {
            return Ok(false);
        };
        if parent_id == id {
            return Err(ChainError::AssertionFailed(format!(
                "segment {} is its own parent",
                segment.checkpoint
            )));
        }
        let parent = self.segment(parent_id);
        let checkpoint = segment.checkpoint;
        let parent_checkpoint = parent.checkpoint;
        let size = segment.store.size();
        let parent_branch_size = (parent_checkpoint + parent.store.size()).saturating_sub(checkpoint);
        if parent_branch_size >= size {
            return Ok(false);
        }
        let offset = checkpoint
            .checked_sub(parent_checkpoint)
            .ok_or_else(|| {
                ChainError::AssertionFailed(format!(
                    "segment {} starts below its parent {}",
                    checkpoint, parent_checkpoint
                ))
            })?
            * RECORD_SIZE;

        info!(
            "Swapping segment {} ({} headers) with parent {} ({} headers past {})",
            checkpoint, size, parent_checkpoint, parent_branch_size, checkpoint
        );

        let own_data = segment.store.read_all()?;
        let parent_data = parent.store.read_range(offset, parent_branch_size * RECORD_SIZE)?;
        segment.store.write(&parent_data, 0, true)?;
        parent.store.write(&own_data, offset, true)?;

        let old_paths: Vec<PathBuf> = self.segments.iter().map(|s| s.store.path()).collect();

        let grandparent = self.segment(parent_id).parent;
        {
            let segment = &mut self.segments[id.0];
            segment.checkpoint = parent_checkpoint;
            segment.parent = grandparent;
        }
        {
            let parent = &mut self.segments[parent_id.0];
            parent.checkpoint = checkpoint;
            parent.parent = Some(id);
        }
        // Children forked off the shared prefix now hang off the new owner
        for other in &mut self.segments {
            if other.id != id
                && other.id != parent_id
                && other.parent == Some(parent_id)
                && other.checkpoint < checkpoint
            {
                other.parent = Some(id);
            }
        }

        // The swapped pair trade files; content was exchanged above
        self.segment(id).store.set_path(old_paths[parent_id.0].clone())?;
        self.segment(parent_id).store.set_path(old_paths[id.0].clone())?;

        self.by_checkpoint.insert(parent_checkpoint, id);
        self.by_checkpoint.insert(checkpoint, parent_id);

        self.rename_moved_segments(&old_paths, &[id, parent_id])?;
        self.segment(id).clear_current_header();
        self.segment(parent_id).clear_current_header();
        Ok(true)
    }

    /// Rename every registered fork file whose derived name changed. Files
    /// move to a staging name first so no rename lands on a file that has
    /// not moved yet.
    fn rename_moved_segments(&self, old_paths: &[PathBuf], skip: &[SegmentId]) -> ChainResult<()> {
        let moves: Vec<(SegmentId, PathBuf, PathBuf)> = self
            .by_checkpoint
            .values()
            .filter(|id| !skip.contains(id))
            .filter_map(|id| {
                let old = old_paths[id.0].clone();
                let new = self.expected_path(*id);
                (old != new).then_some((*id, old, new))
            })
            .collect();

        let mut staged = Vec::with_capacity(moves.len());
        for (id, old, new) in moves {
            let staging = old.with_extension(STAGING_SUFFIX);
            if old.exists() {
                fs::rename(&old, &staging)?;
            }
            staged.push((id, staging, new));
        }
        for (id, staging, new) in staged {
            if staging.exists() {
                fs::rename(&staging, &new)?;
            }
            debug!("Segment {} now stored at {}", id, new.display());
            self.segment(id).store.set_path(new)?;
        }
        Ok(())
    }
}

// =============================================================================
// Header Chains
// =============================================================================

/// Lock-guarded registry shared by every caller.
///
/// Mutations and [`HeaderChains::can_connect`] (which records a pending tip)
/// take the write lock. Queries take the read lock and so never observe a
/// half-finished swap.
#[derive(Debug)]
pub struct HeaderChains {
    forest: RwLock<ChainForest>,
}

impl HeaderChains {
    pub fn new(forest: ChainForest) -> Self {
        Self {
            forest: RwLock::new(forest),
        }
    }

    /// Bootstrap from the configured headers directory
    pub fn read_blockchains(config: &ChainConfig) -> ChainResult<Self> {
        let forest = ChainForest::read_blockchains(&config.headers_dir, config.network.clone())?;
        Ok(Self::new(forest))
    }

    fn read(&self) -> RwLockReadGuard<'_, ChainForest> {
        self.forest.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChainForest> {
        self.forest.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a read-only query against a consistent snapshot of the registry.
    /// Operations that record a pending tip are not reachable from here.
    pub fn with_forest<R>(&self, f: impl FnOnce(&ChainForest) -> R) -> R {
        f(&self.read())
    }

    pub fn best_chain(&self) -> SegmentId {
        self.read().best_chain()
    }

    pub fn height(&self, id: SegmentId) -> Option<u64> {
        self.read().chain(id).height()
    }

    pub fn get_hash(&self, id: SegmentId, height: u64) -> ChainResult<Option<BlockHash>> {
        self.read().chain(id).get_hash(height)
    }

    pub fn read_header(&self, id: SegmentId, height: u64) -> ChainResult<Option<BlockHeader>> {
        self.read().chain(id).read_header(height)
    }

    pub fn summaries(&self) -> ChainResult<Vec<ChainSummary>> {
        self.read().summaries()
    }

    pub fn check_header(&self, header: &BlockHeader) -> ChainResult<Option<SegmentId>> {
        self.read().check_header(header)
    }

    pub fn can_connect(&self, header: &BlockHeader) -> ChainResult<Option<SegmentId>> {
        self.write().can_connect(header)
    }

    pub fn save_header(&self, id: SegmentId, header: &BlockHeader) -> ChainResult<()> {
        self.write().save_header(id, header)
    }

    pub fn fork(&self, parent: SegmentId, header: &BlockHeader) -> ChainResult<SegmentId> {
        self.write().fork(parent, header)
    }

    pub fn connect_chunk(&self, id: SegmentId, index: u64, data: &[u8]) -> ChainResult<bool> {
        self.write().connect_chunk(id, index, data)
    }

    /// Hex-encoded variant of [`HeaderChains::connect_chunk`]. Undecodable
    /// input is rejected like any other bad chunk.
    pub fn connect_chunk_hex(&self, id: SegmentId, index: u64, hex_data: &str) -> ChainResult<bool> {
        let data = match hex::decode(hex_data.trim()) {
            Ok(data) => data,
            Err(e) => {
                warn!("Chunk at {} is not valid hex: {}", index, e);
                return Ok(false);
            }
        };
        self.connect_chunk(id, index, &data)
    }
}
