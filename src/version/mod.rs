//! File metadata and per-version statistics read by the compaction picker
//!
//! The engine owns versioning; what the picker needs is the per-level file
//! lists, the compaction-score table, and a user-key overlap probe. Files
//! are shared as `Arc<FileMetaData>` so a running compaction can flag its
//! inputs without copying the version.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::config::CompactionOptions;
use crate::key::{InternalKey, InternalKeyComparator};

/// Metadata of one sorted on-disk file.
#[derive(Debug)]
pub struct FileMetaData {
    /// Engine-assigned file number.
    pub file_number: u64,

    /// Smallest internal key in the file.
    pub smallest: InternalKey,

    /// Largest internal key in the file.
    pub largest: InternalKey,

    /// File size in bytes, weighted for deletion entries.
    pub compensated_file_size: u64,

    /// Arena block index of this file's cuckoo filter, 0 when absent.
    pub pmem_block_num: u64,

    being_compacted: AtomicBool,
}

impl FileMetaData {
    pub fn new(
        file_number: u64,
        smallest: InternalKey,
        largest: InternalKey,
        compensated_file_size: u64,
    ) -> Self {
        Self {
            file_number,
            smallest,
            largest,
            compensated_file_size,
            pmem_block_num: 0,
            being_compacted: AtomicBool::new(false),
        }
    }

    /// Attach the block index of the file's cuckoo filter.
    pub fn with_filter_block(mut self, block_num: u64) -> Self {
        self.pmem_block_num = block_num;
        self
    }

    /// Whether the file is part of an in-flight compaction.
    pub fn is_being_compacted(&self) -> bool {
        self.being_compacted.load(AtomicOrdering::Acquire)
    }

    pub fn set_being_compacted(&self, v: bool) {
        self.being_compacted.store(v, AtomicOrdering::Release);
    }
}

/// Per-level file lists plus the derived compaction-score table.
///
/// Levels 1 and up are kept sorted by smallest key. The score table is
/// ranked: rank 0 carries the hottest level.
pub struct VersionStorageInfo {
    icmp: InternalKeyComparator,
    files: Vec<Vec<Arc<FileMetaData>>>,
    compaction_score: Vec<f64>,
    compaction_level: Vec<usize>,
    base_level: usize,
}

impl VersionStorageInfo {
    pub fn new(icmp: InternalKeyComparator, num_levels: usize) -> Self {
        assert!(num_levels >= 2);
        Self {
            icmp,
            files: vec![Vec::new(); num_levels],
            compaction_score: Vec::new(),
            compaction_level: Vec::new(),
            base_level: 1,
        }
    }

    pub fn number_levels(&self) -> usize {
        self.files.len()
    }

    pub fn base_level(&self) -> usize {
        self.base_level
    }

    /// Deepest level a compaction may start from.
    pub fn max_input_level(&self) -> usize {
        self.number_levels() - 2
    }

    pub fn level_files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Installs a file into `level`. L0 keeps arrival order; deeper levels
    /// stay sorted by smallest key.
    pub fn add_file(&mut self, level: usize, file: Arc<FileMetaData>) {
        assert!(level < self.number_levels());
        self.files[level].push(file);
        if level > 0 {
            let icmp = self.icmp.clone();
            self.files[level].sort_by(|a, b| icmp.compare(&a.smallest, &b.smallest));
        }
    }

    /// Score of the `rank`-th hottest level, -1 past the table end.
    pub fn compaction_score(&self, rank: usize) -> f64 {
        self.compaction_score.get(rank).copied().unwrap_or(-1.0)
    }

    /// Level holding the `rank`-th highest score.
    pub fn compaction_score_level(&self, rank: usize) -> usize {
        self.compaction_level.get(rank).copied().unwrap_or(0)
    }

    /// Recomputes and ranks the per-level scores. Files already flagged as
    /// being compacted do not count toward their level.
    ///
    /// L0 scores by file count against the trigger; deeper levels score by
    /// bytes against their target. The top level never compacts further and
    /// gets no score.
    pub fn compute_compaction_score(&mut self, opts: &CompactionOptions) {
        let mut scored: Vec<(f64, usize)> = Vec::with_capacity(self.number_levels() - 1);
        for level in 0..self.number_levels() - 1 {
            let score = if level == 0 {
                let num_files = self.files[0]
                    .iter()
                    .filter(|f| !f.is_being_compacted())
                    .count();
                num_files as f64 / opts.level0_file_num_compaction_trigger as f64
            } else {
                let level_bytes: u64 = self.files[level]
                    .iter()
                    .filter(|f| !f.is_being_compacted())
                    .map(|f| f.compensated_file_size)
                    .sum();
                level_bytes as f64 / opts.max_bytes_for_level(level) as f64
            };
            scored.push((score, level));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        self.compaction_score = scored.iter().map(|(s, _)| *s).collect();
        self.compaction_level = scored.iter().map(|(_, l)| *l).collect();
    }

    /// All files in `level` whose user-key range intersects
    /// `[smallest.user_key, largest.user_key]`.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        smallest: &InternalKey,
        largest: &InternalKey,
    ) -> Vec<Arc<FileMetaData>> {
        assert!(level < self.number_levels());
        self.files[level]
            .iter()
            .filter(|f| {
                !(self
                    .icmp
                    .compare_user_keys(f.largest.user_key(), smallest.user_key())
                    .is_lt()
                    || self
                        .icmp
                        .compare_user_keys(f.smallest.user_key(), largest.user_key())
                        .is_gt())
            })
            .cloned()
            .collect()
    }
}
