//! Block header codec
//!
//! A header is an 80-byte wire record. Hashes are kept in display order
//! (most significant byte first) and byte-reversed on the wire.

use crate::crypto::double_sha256;
use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Header Constants
// =============================================================================

/// Block header size in bytes (80 bytes like Bitcoin)
pub const BLOCK_HEADER_SIZE: usize = 80;

/// Length of a header hash in bytes
pub const HASH_SIZE: usize = 32;

// =============================================================================
// Block Hash
// =============================================================================

/// A 32-byte identifier stored in display order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockHash([u8; HASH_SIZE]);

impl BlockHash {
    /// The all-zero hash, used as the parent of the genesis block
    pub const fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    /// Build from bytes already in display order
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from wire (little-endian) order
    pub fn from_wire(wire: &[u8; HASH_SIZE]) -> Self {
        let mut bytes = *wire;
        bytes.reverse();
        Self(bytes)
    }

    /// Bytes in wire (little-endian) order
    pub fn to_wire(&self) -> [u8; HASH_SIZE] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Numeric value used when comparing against a target
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Block Header
// =============================================================================

/// Block header plus the height it was received at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Hash of the previous block
    pub prev_hash: BlockHash,
    /// Merkle root of all transactions
    pub merkle_root: BlockHash,
    /// Block creation timestamp (unix seconds)
    pub timestamp: u32,
    /// Compact difficulty target
    pub bits: u32,
    /// Nonce; zero marks a proof-of-stake block
    pub nonce: u32,
    /// Absolute chain position. Not part of the wire record.
    pub height: u64,
}

impl BlockHeader {
    /// Encode the 80-byte wire record
    pub fn serialize(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_hash.to_wire());
        out[36..68].copy_from_slice(&self.merkle_root.to_wire());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Decode a wire record, attaching the height supplied by the caller
    pub fn deserialize(raw: &[u8; BLOCK_HEADER_SIZE], height: u64) -> Self {
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let hash = |at: usize| {
            let mut wire = [0u8; HASH_SIZE];
            wire.copy_from_slice(&raw[at..at + HASH_SIZE]);
            BlockHash::from_wire(&wire)
        };

        Self {
            version: word(0),
            prev_hash: hash(4),
            merkle_root: hash(36),
            timestamp: word(68),
            bits: word(72),
            nonce: word(76),
            height,
        }
    }

    /// Double SHA-256 of the wire record, in display order
    pub fn hash(&self) -> BlockHash {
        BlockHash::from_wire(&double_sha256(&self.serialize()))
    }

    /// Timestamp as a UTC datetime, if representable
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }
}

/// Identity of an optional header; an absent header hashes to all zeroes.
pub fn hash_header(header: Option<&BlockHeader>) -> BlockHash {
    header.map(BlockHeader::hash).unwrap_or_default()
}
