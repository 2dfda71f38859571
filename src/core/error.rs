//! Header chain errors

use crate::core::block::BlockHash;
use primitive_types::U256;
use std::io;
use thiserror::Error;

/// Errors raised while verifying, storing or reorganising header chains
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("prev hash mismatch: {expected} vs {got}")]
    LinkageMismatch { expected: String, got: BlockHash },
    #[error("bits mismatch: {expected:#010x} vs {got:#010x}")]
    DifficultyMismatch { expected: u32, got: u32 },
    #[error("insufficient proof of work: {hash} vs target {target:#x}")]
    InsufficientWork { hash: BlockHash, target: U256 },
    #[error("malformed compact target {0:#010x}: mantissa should be in [0x8000, 0x7fffff]")]
    MalformedTarget(u32),
    #[error("malformed chunk: {0} bytes is not a whole number of headers")]
    MalformedChunk(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("header at height {0} is not available")]
    MissingHeader(u64),
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    #[error("storage failure: {0}")]
    StorageFailure(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl ChainError {
    /// Routine outcome of seeing an invalid or competing header.
    ///
    /// Probing entry points turn these into a negative answer; everything
    /// else aborts the current operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ChainError::LinkageMismatch { .. }
                | ChainError::DifficultyMismatch { .. }
                | ChainError::InsufficientWork { .. }
                | ChainError::MalformedTarget(_)
                | ChainError::MalformedChunk(_)
                | ChainError::InvalidHex(_)
                | ChainError::MissingHeader(_)
        )
    }
}

/// Result alias for header chain operations
pub type ChainResult<T> = Result<T, ChainError>;
