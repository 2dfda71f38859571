//! tes-headers CLI Application
//!
//! A command-line interface for inspecting and extending the header store.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tes_headers::cli::{self, AppState};

#[derive(Parser)]
#[command(name = "tes-headers")]
#[command(version = "0.1.0")]
#[command(about = "Header chain store with fork tracking and stake/work retargeting", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "tes_headers.json")]
    config: PathBuf,

    /// Override the headers directory from the configuration
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new configuration file
    Init {
        /// Genesis block hash (hex)
        #[arg(short, long)]
        genesis: String,

        /// Relaxed mode: skip target and proof-of-work checks
        #[arg(long)]
        testnet: bool,
    },

    /// List chain segments
    Info,

    /// Show the header at a height on the best chain
    Header {
        /// Block height
        height: u64,
    },

    /// Verify and connect a raw chunk of 80-byte headers
    Import {
        /// Chunk file
        #[arg(short, long)]
        file: PathBuf,

        /// Height of the first header in the chunk
        #[arg(short, long)]
        start: u64,
    },

    /// Check whether a single header is known or connects
    Check {
        /// File holding one 80-byte header
        #[arg(short, long)]
        file: PathBuf,

        /// Height of the header
        #[arg(long)]
        height: u64,

        /// Append the header if it connects
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Init runs before a configuration exists
    if let Commands::Init { genesis, testnet } = &cli.command {
        return cli::cmd_init(&cli.config, cli.data_dir.clone(), genesis, *testnet);
    }

    let state = AppState::new(&cli.config, cli.data_dir.clone())?;

    match cli.command {
        Commands::Init { .. } => unreachable!(),
        Commands::Info => cli::cmd_info(&state)?,
        Commands::Header { height } => cli::cmd_header(&state, height)?,
        Commands::Import { file, start } => cli::cmd_import(&state, &file, start)?,
        Commands::Check { file, height, save } => cli::cmd_check(&state, &file, height, save)?,
    }

    Ok(())
}
