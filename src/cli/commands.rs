//! CLI commands for the header store
//!
//! Implements all command handlers for the CLI interface.

use crate::config::ChainConfig;
use crate::core::{
    BlockHash, BlockHeader, ChainError, HeaderChains, NetworkParams, SegmentId, BLOCK_HEADER_SIZE,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub chains: HeaderChains,
    pub config: ChainConfig,
}

impl AppState {
    /// Load the configuration and bootstrap the segment registry
    pub fn new(config_path: &Path, headers_dir: Option<PathBuf>) -> CliResult<Self> {
        let mut config = ChainConfig::load(config_path)?;
        if let Some(dir) = headers_dir {
            config.headers_dir = dir;
        }

        println!("📂 Loading headers from {:?}...", config.headers_dir);
        let chains = HeaderChains::read_blockchains(&config)?;
        Ok(Self { chains, config })
    }
}

/// Write a new configuration file
pub fn cmd_init(
    config_path: &Path,
    headers_dir: Option<PathBuf>,
    genesis: &str,
    testnet: bool,
) -> CliResult<()> {
    if config_path.exists() {
        println!("⚠️  Configuration already exists at {:?}", config_path);
        return Ok(());
    }

    let genesis_hash: BlockHash = genesis.parse().map_err(ChainError::from)?;
    let mut network = NetworkParams::new(genesis_hash);
    network.testnet = testnet;
    let config = ChainConfig::new(
        headers_dir.unwrap_or_else(|| PathBuf::from(crate::config::DEFAULT_HEADERS_DIR)),
        network,
    );
    config.save(config_path)?;

    println!("✅ Configuration written!");
    println!("   📁 Headers directory: {:?}", config.headers_dir);
    println!("   🧱 Genesis hash: {}", genesis_hash);
    println!("   🔧 Relaxed mode: {}", testnet);
    Ok(())
}

/// List every known segment
pub fn cmd_info(state: &AppState) -> CliResult<()> {
    let summaries = state.chains.summaries()?;

    println!("📊 Header Chains");
    println!("   Network: {}", if state.config.network.testnet { "relaxed" } else { "main" });
    println!("   Checkpoints: {}", state.config.network.checkpoints.len());
    println!("   Segments: {}", summaries.len());

    for summary in summaries {
        let marker = if summary.is_best { "⭐" } else { "  " };
        let height = summary
            .height
            .map_or_else(|| "empty".to_string(), |h| h.to_string());
        let parent = summary
            .parent_checkpoint
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "\n{} {} [{}]",
            marker,
            summary.id,
            if summary.name.is_empty() { "-" } else { summary.name.as_str() }
        );
        println!("   ├─ Checkpoint: {}", summary.checkpoint);
        println!("   ├─ Parent: {}", parent);
        println!("   ├─ Height: {}", height);
        println!("   └─ Branch size: {}", summary.branch_size);
    }
    Ok(())
}

/// Print the header at `height` on the best chain
pub fn cmd_header(state: &AppState, height: u64) -> CliResult<()> {
    let best = state.chains.best_chain();
    let Some(header) = state.chains.read_header(best, height)? else {
        println!("❌ No header at height {}", height);
        return Ok(());
    };

    let time = header
        .time()
        .map_or_else(|| "invalid".to_string(), |t| t.to_rfc3339());
    println!("🧱 Header {}", height);
    println!("   ├─ Hash: {}", header.hash());
    println!("   ├─ Prev: {}", header.prev_hash);
    println!("   ├─ Merkle root: {}", header.merkle_root);
    println!("   ├─ Version: {}", header.version);
    println!("   ├─ Time: {} ({})", header.timestamp, time);
    println!("   ├─ Bits: {:#010x}", header.bits);
    println!("   ├─ Nonce: {}", header.nonce);
    println!(
        "   └─ Kind: {}",
        if crate::core::difficulty::is_proof_of_stake_header(Some(&header)) {
            "proof-of-stake"
        } else {
            "proof-of-work"
        }
    );
    Ok(())
}

/// Verify and connect a raw chunk file to the best chain
pub fn cmd_import(state: &AppState, file: &Path, start: u64) -> CliResult<()> {
    let data = fs::read(file)?;
    let best = state.chains.best_chain();

    println!(
        "📥 Importing {} header(s) at height {} into {}",
        data.len() / BLOCK_HEADER_SIZE,
        start,
        best
    );

    if state.chains.connect_chunk(best, start, &data)? {
        let height = state.chains.height(state.chains.best_chain());
        println!("✅ Chunk connected! Best height: {:?}", height);
    } else {
        println!("❌ Chunk rejected");
    }
    Ok(())
}

/// Check a single 80-byte header, optionally appending it
pub fn cmd_check(state: &AppState, file: &Path, height: u64, save: bool) -> CliResult<()> {
    let data = fs::read(file)?;
    let raw: [u8; BLOCK_HEADER_SIZE] = data
        .as_slice()
        .try_into()
        .map_err(|_| ChainError::MalformedChunk(data.len()))?;
    let header = BlockHeader::deserialize(&raw, height);

    println!("🔍 Header {} at height {}", header.hash(), height);

    if let Some(id) = state.chains.check_header(&header)? {
        println!("✅ Already stored on segment {}", id);
        return Ok(());
    }

    match state.chains.can_connect(&header)? {
        Some(id) => {
            println!("✅ Connects to segment {}", id);
            if save {
                save_header(state, id, &header)?;
            }
        }
        None => println!("❌ Does not connect to any segment"),
    }
    Ok(())
}

fn save_header(state: &AppState, id: SegmentId, header: &BlockHeader) -> CliResult<()> {
    state.chains.save_header(id, header)?;
    println!("💾 Saved. Best chain is now {}", state.chains.best_chain());
    Ok(())
}
