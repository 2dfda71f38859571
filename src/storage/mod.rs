//! Storage module for header persistence
//!
//! - Flat per-segment header files
//! - Trusted checkpoint table

pub mod checkpoint;
pub mod segment;

pub use checkpoint::{Checkpoint, CheckpointTable};
pub use segment::{
    parse_fork_file_name, segment_path, SegmentFile, FORKS_DIR_NAME, ROOT_FILE_NAME,
};
