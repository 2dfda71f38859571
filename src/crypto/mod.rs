//! Cryptographic utilities for the header chain
//!
//! This module provides SHA-256 and double SHA-256 hashing.

pub mod hash;

pub use hash::{double_sha256, sha256};
