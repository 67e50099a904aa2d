//! Tiered compaction picking
//!
//! ## Flow
//! 1. The engine asks the picker's needs-compaction oracle after each
//!    version change.
//! 2. `TierCompactionPicker::pick_compaction` walks the score table,
//!    partitions the hottest level into vertical groups, and packages the
//!    heaviest group plus its output-level overlap as a [`Compaction`].
//! 3. The engine's executor performs the merge; files picked here carry
//!    the being-compacted flag until the compaction finishes or is
//!    released.

mod tier_picker;
mod vertical_group;

pub use tier_picker::TierCompactionPicker;
pub use vertical_group::{GroupSize, VerticalGroup, VerticalGroupBuilder};

use std::sync::Arc;

use crate::config::{CompressionOptions, CompressionType};
use crate::version::FileMetaData;

/// Why a compaction was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionReason {
    Unknown,
    /// L0 file count reached the trigger.
    LevelL0FilesNum,
    /// A deeper level outgrew its byte target.
    LevelMaxLevelSize,
}

/// The files selected at one level.
#[derive(Debug, Default, Clone)]
pub struct CompactionInputFiles {
    pub level: usize,
    pub files: Vec<Arc<FileMetaData>>,
}

impl CompactionInputFiles {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

/// In-memory sink for picker diagnostics, drained by the caller.
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: Vec<String>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.entries.push(line.into());
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.entries)
    }
}

/// A picked compaction, ready for the engine's executor.
#[derive(Debug)]
pub struct Compaction {
    /// Files to merge out of the start level (one vertical group, or all
    /// eligible L0 files).
    pub start_level_inputs: CompactionInputFiles,

    /// Files in the output level overlapping the start-level key range.
    pub output_level_inputs: CompactionInputFiles,

    /// Files in `output_level + 1` overlapping the inputs; the executor
    /// uses them to bound output file cuts.
    pub grandparents: Vec<Arc<FileMetaData>>,

    pub output_level: usize,

    /// Target size of a single output file.
    pub max_output_file_size: u64,

    /// Upper bound on bytes rewritten by this compaction.
    pub max_compaction_bytes: u64,

    /// Storage path the output files are written to.
    pub output_path_id: u32,

    pub compression: CompressionType,
    pub compression_opts: CompressionOptions,

    /// Always 0: subcompaction boundaries for the tiered layout are
    /// derived from the groups, not from this knob.
    pub max_subcompactions: u32,

    pub is_manual: bool,

    /// Score of the start level at pick time.
    pub score: f64,

    pub deletion_compaction: bool,

    pub reason: CompactionReason,

    /// Cuckoo-filter block of the picked input group, forwarded to the
    /// executor; 0 on the L0 path.
    pub input_level_group_filter_block_num: u64,
}

impl Compaction {
    /// Total number of input files across both levels.
    pub fn num_input_files(&self) -> usize {
        self.start_level_inputs.files.len() + self.output_level_inputs.files.len()
    }

    pub fn start_level(&self) -> usize {
        self.start_level_inputs.level
    }

    /// Clears the being-compacted flags of every input. Must be called
    /// when the engine abandons a picked compaction without executing it.
    pub fn release_inputs(&self) {
        self.mark_files_being_compacted(false);
    }

    pub(crate) fn mark_files_being_compacted(&self, v: bool) {
        for f in &self.start_level_inputs.files {
            f.set_being_compacted(v);
        }
        for f in &self.output_level_inputs.files {
            f.set_being_compacted(v);
        }
    }
}
