//! tes-headers: header chain store for a hybrid proof-of-work / proof-of-stake coin
//!
//! This crate provides the header layer of a light client:
//! - 80-byte header codec with double SHA-256 identity
//! - Compact target conversion and stake/work retargeting
//! - Header and chunk verification against linkage, difficulty and work
//! - Flat-file chain segments with forks that swap in when they outgrow
//!   their parent
//! - Bootstrap from disk, discarding forks that no longer connect
//!
//! # Example
//!
//! ```rust,no_run
//! use tes_headers::config::ChainConfig;
//! use tes_headers::core::HeaderChains;
//! use std::path::Path;
//!
//! let config = ChainConfig::load(Path::new("tes_headers.json")).unwrap();
//! let chains = HeaderChains::read_blockchains(&config).unwrap();
//!
//! // Connect a chunk of raw headers starting at height 0
//! let chunk = std::fs::read("chunk.bin").unwrap();
//! let best = chains.best_chain();
//! if chains.connect_chunk(best, 0, &chunk).unwrap() {
//!     println!("Height: {:?}", chains.height(best));
//! }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod storage;

// Re-export commonly used types
pub use crate::config::ChainConfig;
pub use crate::core::{
    BlockHash, BlockHeader, Blockchain, ChainError, ChainForest, ChainResult, HeaderChains,
    NetworkParams, SegmentId,
};
pub use crate::storage::{Checkpoint, CheckpointTable};
