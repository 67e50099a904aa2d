//! Configuration for the tier compaction picker and the persistent arena
//!
//! Two option groups mirror how the engine hands settings down:
//! - `CompactionOptions`: per-column-family tunables the picker re-reads on
//!   every tick (level sizing, triggers, output file sizing).
//! - `EngineOptions`: fixed at open (storage paths, level count, codecs).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pmem::{ARENA_SIZE, BLOCK_HEADER_SIZE, BLOCK_SIZE, SLOT_PER_BUCKET, SLOT_SIZE};

/// Compression codec for compaction output files.
///
/// The picker only *selects* the codec; encoding happens in the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Snappy,
}

/// Knobs forwarded to the codec of the output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionOptions {
    pub level: i32,
    pub max_dict_bytes: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            level: 0,
            max_dict_bytes: 0,
        }
    }
}

/// One storage directory with a capacity budget.
///
/// `target_size` bounds how many level bytes are charged to this path before
/// output files spill over to the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPath {
    pub path: PathBuf,
    pub target_size: u64,
}

impl DbPath {
    pub fn new(path: impl Into<PathBuf>, target_size: u64) -> Self {
        Self {
            path: path.into(),
            target_size,
        }
    }
}

/// Per-column-family compaction tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionOptions {
    /// Target size of L1 in bytes.
    pub max_bytes_for_level_base: u64,

    /// Growth factor between consecutive levels.
    pub max_bytes_for_level_multiplier: f64,

    /// Extra per-level factors on top of the multiplier; missing entries
    /// read as 1.0.
    pub max_bytes_for_level_multiplier_additional: Vec<f64>,

    /// Upper bound on the total bytes one compaction may rewrite.
    pub max_compaction_bytes: u64,

    /// When set, level targets are recomputed from the last level down and
    /// the additional factors are ignored.
    pub level_compaction_dynamic_level_bytes: bool,

    /// Number of L0 files that drives the L0 score to 1.
    pub level0_file_num_compaction_trigger: usize,

    /// Target size of a single output file at L1.
    pub target_file_size_base: u64,

    /// Growth factor of the output file target per level.
    pub target_file_size_multiplier: u64,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            max_bytes_for_level_base: 256 * 1024 * 1024,
            max_bytes_for_level_multiplier: 10.0,
            max_bytes_for_level_multiplier_additional: Vec::new(),
            max_compaction_bytes: 64 * 25 * 1024 * 1024,
            level_compaction_dynamic_level_bytes: false,
            level0_file_num_compaction_trigger: 4,
            target_file_size_base: 64 * 1024 * 1024,
            target_file_size_multiplier: 1,
        }
    }
}

impl CompactionOptions {
    /// Per-level additional factor, defaulting to 1.0 past the configured end.
    pub fn max_bytes_multiplier_additional(&self, level: usize) -> f64 {
        self.max_bytes_for_level_multiplier_additional
            .get(level)
            .copied()
            .unwrap_or(1.0)
    }

    /// Byte target for `level >= 1` under static leveling.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        debug_assert!(level >= 1);
        let mut size = self.max_bytes_for_level_base as f64;
        for l in 1..level {
            size *= self.max_bytes_for_level_multiplier * self.max_bytes_multiplier_additional(l);
        }
        size as u64
    }

    /// Target size of one output file written to `level >= 1`.
    pub fn max_file_size_for_level(&self, level: usize) -> u64 {
        debug_assert!(level >= 1);
        let mut size = self.target_file_size_base;
        for _ in 1..level {
            size = size.saturating_mul(self.target_file_size_multiplier);
        }
        size
    }
}

/// Engine-wide options fixed at open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Storage paths in fill order; the last one is the fallback.
    pub db_paths: Vec<DbPath>,

    /// Number of LSM levels.
    pub num_levels: usize,

    /// Default output codec.
    pub compression: CompressionType,

    /// Per-level codec table; when non-empty it overrides `compression`,
    /// clamped to its last entry for deeper levels.
    pub compression_per_level: Vec<CompressionType>,

    /// Knobs handed to the selected codec.
    pub compression_opts: CompressionOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            db_paths: vec![DbPath::new("", u64::MAX)],
            num_levels: 7,
            compression: CompressionType::Snappy,
            compression_per_level: Vec::new(),
            compression_opts: CompressionOptions::default(),
        }
    }
}

/// Geometry of the persistent arena backing the cuckoo filters.
///
/// Both sizes are tunable at open; the total is rounded up to a block
/// multiple. A block must hold the 24-byte list header plus at least one
/// bucket, and stay 8-byte aligned so the header fields land on their
/// native boundaries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArenaConfig {
    pub total_size: u64,
    pub block_size: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            total_size: ARENA_SIZE,
            block_size: BLOCK_SIZE,
        }
    }
}

impl ArenaConfig {
    /// Small geometry for unit tests: a handful of blocks, each a few
    /// buckets wide.
    pub fn for_testing() -> Self {
        Self {
            total_size: 16 * 4096,
            block_size: 4096,
        }
    }

    /// Smallest legal block payload (one bucket).
    pub fn min_block_size() -> u64 {
        BLOCK_HEADER_SIZE + SLOT_SIZE * SLOT_PER_BUCKET
    }
}
