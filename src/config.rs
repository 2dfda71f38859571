//! Configuration for the header store

use crate::core::block::BlockHash;
use crate::core::error::ChainResult;
use crate::core::params::NetworkParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default headers directory, relative to the working directory
pub const DEFAULT_HEADERS_DIR: &str = ".tes_headers";

/// Where headers live and which network they belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Directory holding the root segment file and the forks directory
    #[serde(default = "default_headers_dir")]
    pub headers_dir: PathBuf,
    /// Consensus parameters
    pub network: NetworkParams,
}

fn default_headers_dir() -> PathBuf {
    PathBuf::from(DEFAULT_HEADERS_DIR)
}

impl ChainConfig {
    pub fn new(headers_dir: impl Into<PathBuf>, network: NetworkParams) -> Self {
        Self {
            headers_dir: headers_dir.into(),
            network,
        }
    }

    /// Read a JSON configuration file
    pub fn load(path: &Path) -> ChainResult<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write this configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> ChainResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Relaxed-mode configuration rooted at `dir`
    pub fn for_testing(dir: &Path, genesis_hash: BlockHash) -> Self {
        Self::new(dir, NetworkParams::relaxed(genesis_hash))
    }
}
