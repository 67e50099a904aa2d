//! Tier compaction picker
//!
//! Walks the compaction-score table from the hottest level down, builds
//! the start level's vertical groups, and promotes the heaviest group
//! (plus the overlapping files one level down) into a [`Compaction`]
//! descriptor. L0 is special-cased: every eligible L0 file joins, since
//! L0 files overlap freely.

use std::sync::Arc;

use super::vertical_group::VerticalGroupBuilder;
use super::{Compaction, CompactionInputFiles, CompactionReason, LogBuffer};
use crate::config::{CompactionOptions, CompressionType, EngineOptions};
use crate::key::{InternalKey, InternalKeyComparator};
use crate::version::{FileMetaData, VersionStorageInfo};

pub struct TierCompactionPicker {
    ioptions: Arc<EngineOptions>,
    icmp: InternalKeyComparator,
}

impl TierCompactionPicker {
    pub fn new(ioptions: Arc<EngineOptions>, icmp: InternalKeyComparator) -> Self {
        Self { ioptions, icmp }
    }

    /// Pure oracle the engine polls before scheduling a pick: true iff
    /// some input level scored at or above 1.
    pub fn needs_compaction(&self, vstorage: &VersionStorageInfo) -> bool {
        for rank in 0..=vstorage.max_input_level() {
            if vstorage.compaction_score(rank) >= 1.0 {
                return true;
            }
        }
        false
    }

    /// Picks a compaction, or `None` when no level qualifies. Picked input
    /// files are flagged as being compacted and the score table is
    /// recomputed, so an abandoned pick must be released by the caller.
    pub fn pick_compaction(
        &self,
        cf_name: &str,
        mutable_opts: &CompactionOptions,
        vstorage: &mut VersionStorageInfo,
        log_buffer: &mut LogBuffer,
    ) -> Option<Compaction> {
        let builder = TierCompactionBuilder {
            cf_name,
            vstorage,
            icmp: &self.icmp,
            mutable_opts,
            ioptions: self.ioptions.as_ref(),
            log_buffer,
            start_level: 0,
            output_level: 0,
            start_level_score: 0.0,
            start_level_inputs: CompactionInputFiles::default(),
            output_level_inputs: CompactionInputFiles::default(),
            grandparents: Vec::new(),
            reason: CompactionReason::Unknown,
            input_level_group_filter_block_num: 0,
        };
        builder.pick_compaction()
    }
}

struct TierCompactionBuilder<'a> {
    cf_name: &'a str,
    vstorage: &'a mut VersionStorageInfo,
    icmp: &'a InternalKeyComparator,
    mutable_opts: &'a CompactionOptions,
    ioptions: &'a EngineOptions,
    log_buffer: &'a mut LogBuffer,
    start_level: usize,
    output_level: usize,
    start_level_score: f64,
    start_level_inputs: CompactionInputFiles,
    output_level_inputs: CompactionInputFiles,
    grandparents: Vec<Arc<FileMetaData>>,
    reason: CompactionReason,
    input_level_group_filter_block_num: u64,
}

impl<'a> TierCompactionBuilder<'a> {
    fn pick_compaction(mut self) -> Option<Compaction> {
        // Ranks are sorted by score, so the first rank below 1 ends the
        // walk. The top level never starts a compaction and has no rank.
        for rank in 0..self.vstorage.number_levels() - 1 {
            self.start_level_score = self.vstorage.compaction_score(rank);
            self.start_level = self.vstorage.compaction_score_level(rank);
            if self.start_level_score < 1.0 {
                break;
            }
            self.output_level = self.start_level + 1;
            if self.pick_file_to_compact() {
                self.reason = if self.start_level == 0 {
                    CompactionReason::LevelL0FilesNum
                } else {
                    CompactionReason::LevelMaxLevelSize
                };
                break;
            }
        }

        if self.start_level_inputs.is_empty() {
            self.log_buffer
                .log(format!("[{}] tier: no compaction picked", self.cf_name));
            return None;
        }

        self.grandparents = self.get_grandparents();
        self.log_buffer.log(format!(
            "[{}] tier: picked {} files from level {} (score {:.2}), {} overlapping in level {}",
            self.cf_name,
            self.start_level_inputs.files.len(),
            self.start_level,
            self.start_level_score,
            self.output_level_inputs.files.len(),
            self.output_level,
        ));
        Some(self.build_compaction())
    }

    fn pick_file_to_compact(&mut self) -> bool {
        self.start_level_inputs.clear();
        if self.start_level == 0 {
            return self.pick_level0_files();
        }

        let group_builder = VerticalGroupBuilder::new(self.icmp.clone());
        let (groups, mut sizes) = group_builder.build(self.vstorage.level_files(self.start_level));
        if groups.is_empty() {
            return false;
        }

        sizes.sort_by(|a, b| b.group_file_size.cmp(&a.group_file_size));
        let heaviest = &groups[sizes[0].group_index];

        self.start_level_inputs.level = self.start_level;
        for f in &heaviest.files {
            self.start_level_inputs.files.push(f.clone());
            // the executor receives one filter block per pick; the last
            // group member's number wins
            self.input_level_group_filter_block_num = f.pmem_block_num;
        }

        self.output_level_inputs.level = self.output_level;
        self.output_level_inputs.files = self.vstorage.get_overlapping_inputs(
            self.output_level,
            &heaviest.smallest,
            &heaviest.largest,
        );
        let icmp = self.icmp;
        self.output_level_inputs.files.sort_by(|a, b| {
            icmp.compare(&a.smallest, &b.smallest)
                .then_with(|| icmp.compare(&b.largest, &a.largest))
        });
        true
    }

    /// Every non-busy L0 file joins the pick, and L1 is probed over their
    /// combined user-key range.
    fn pick_level0_files(&mut self) -> bool {
        let mut smallest: Option<InternalKey> = None;
        let mut largest: Option<InternalKey> = None;

        for f in self.vstorage.level_files(0) {
            if f.is_being_compacted() {
                continue;
            }
            self.start_level_inputs.files.push(f.clone());
            match &mut smallest {
                None => smallest = Some(f.smallest.clone()),
                Some(s) => {
                    if self.icmp.compare(s, &f.smallest).is_gt() {
                        *s = f.smallest.clone();
                    }
                }
            }
            match &mut largest {
                None => largest = Some(f.largest.clone()),
                Some(l) => {
                    if self.icmp.compare(l, &f.largest).is_lt() {
                        *l = f.largest.clone();
                    }
                }
            }
        }
        self.start_level_inputs.level = 0;
        let (Some(smallest), Some(largest)) = (smallest, largest) else {
            return false;
        };

        self.output_level_inputs.level = 1;
        self.output_level_inputs.files =
            self.vstorage.get_overlapping_inputs(1, &smallest, &largest);
        self.input_level_group_filter_block_num = 0;

        let icmp = self.icmp;
        self.output_level_inputs.files.sort_by(|a, b| {
            icmp.compare(&a.smallest, &b.smallest)
                .then_with(|| icmp.compare(&b.largest, &a.largest))
        });
        true
    }

    /// Files in `output_level + 1` overlapping the combined input range.
    fn get_grandparents(&self) -> Vec<Arc<FileMetaData>> {
        let gp_level = self.output_level + 1;
        if gp_level >= self.vstorage.number_levels() {
            return Vec::new();
        }
        let mut smallest: Option<&InternalKey> = None;
        let mut largest: Option<&InternalKey> = None;
        for f in self
            .start_level_inputs
            .files
            .iter()
            .chain(self.output_level_inputs.files.iter())
        {
            match smallest {
                None => smallest = Some(&f.smallest),
                Some(s) => {
                    if self.icmp.compare(s, &f.smallest).is_gt() {
                        smallest = Some(&f.smallest);
                    }
                }
            }
            match largest {
                None => largest = Some(&f.largest),
                Some(l) => {
                    if self.icmp.compare(l, &f.largest).is_lt() {
                        largest = Some(&f.largest);
                    }
                }
            }
        }
        match (smallest, largest) {
            (Some(s), Some(l)) => self.vstorage.get_overlapping_inputs(gp_level, s, l),
            _ => Vec::new(),
        }
    }

    fn output_compression(&self) -> CompressionType {
        let per_level = &self.ioptions.compression_per_level;
        if per_level.is_empty() {
            self.ioptions.compression
        } else {
            per_level[self.output_level.min(per_level.len() - 1)]
        }
    }

    fn build_compaction(self) -> Compaction {
        let compression = self.output_compression();
        let output_path_id = get_path_id(self.ioptions, self.mutable_opts, self.output_level);
        let compaction = Compaction {
            start_level_inputs: self.start_level_inputs,
            output_level_inputs: self.output_level_inputs,
            grandparents: self.grandparents,
            output_level: self.output_level,
            max_output_file_size: self.mutable_opts.max_file_size_for_level(self.output_level),
            max_compaction_bytes: self.mutable_opts.max_compaction_bytes,
            output_path_id,
            compression,
            compression_opts: self.ioptions.compression_opts,
            max_subcompactions: 0,
            is_manual: false,
            score: self.start_level_score,
            deletion_compaction: false,
            reason: self.reason,
            input_level_group_filter_block_num: self.input_level_group_filter_block_num,
        };

        // Registration: running compactions hide their files from the next
        // pick, so the score table must be refreshed now.
        compaction.mark_files_being_compacted(true);
        self.vstorage.compute_compaction_score(self.mutable_opts);
        compaction
    }
}

/// Charges level byte targets to the configured paths in order and returns
/// the path that still fits the output level; the last path is the
/// fallback. L0 is estimated at the L1 target.
pub(crate) fn get_path_id(
    ioptions: &EngineOptions,
    mutable_opts: &CompactionOptions,
    level: usize,
) -> u32 {
    let paths = &ioptions.db_paths;
    assert!(!paths.is_empty());

    let mut p = 0usize;
    let mut current_path_size = paths[0].target_size;
    let mut level_size = mutable_opts.max_bytes_for_level_base;
    let mut cur_level = 0usize;

    while p < paths.len() - 1 {
        if level_size <= current_path_size {
            if cur_level == level {
                return p as u32;
            }
            current_path_size -= level_size;
            if cur_level > 0 {
                level_size = if mutable_opts.level_compaction_dynamic_level_bytes {
                    // dynamic leveling ignores the additional factors
                    (level_size as f64 * mutable_opts.max_bytes_for_level_multiplier) as u64
                } else {
                    (level_size as f64
                        * mutable_opts.max_bytes_for_level_multiplier
                        * mutable_opts.max_bytes_multiplier_additional(cur_level))
                        as u64
                };
            }
            cur_level += 1;
            continue;
        }
        p += 1;
        current_path_size = paths[p].target_size;
    }
    p as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbPath;
    use crate::key::ValueKind;
    use crate::version::FileMetaData;

    fn ikey(key: &str) -> InternalKey {
        InternalKey::new(key.as_bytes().to_vec(), 100, ValueKind::Value)
    }

    fn file(number: u64, smallest: &str, largest: &str, size: u64) -> Arc<FileMetaData> {
        Arc::new(FileMetaData::new(
            number,
            ikey(smallest),
            ikey(largest),
            size,
        ))
    }

    fn filtered_file(
        number: u64,
        smallest: &str,
        largest: &str,
        size: u64,
        block: u64,
    ) -> Arc<FileMetaData> {
        Arc::new(
            FileMetaData::new(number, ikey(smallest), ikey(largest), size)
                .with_filter_block(block),
        )
    }

    fn picker() -> TierCompactionPicker {
        TierCompactionPicker::new(
            Arc::new(EngineOptions::default()),
            InternalKeyComparator::bytewise(),
        )
    }

    fn l0_trigger_opts() -> CompactionOptions {
        CompactionOptions {
            level0_file_num_compaction_trigger: 3,
            max_bytes_for_level_base: 1 << 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_l0_trigger_picks_every_eligible_file() {
        let opts = l0_trigger_opts();
        let mut v = VersionStorageInfo::new(InternalKeyComparator::bytewise(), 7);
        v.add_file(0, file(1, "a", "c", 10));
        v.add_file(0, file(2, "b", "d", 10));
        v.add_file(0, file(3, "e", "g", 10));
        v.compute_compaction_score(&opts);

        let mut log = LogBuffer::new();
        let c = picker()
            .pick_compaction("default", &opts, &mut v, &mut log)
            .expect("L0 pick");

        assert_eq!(c.start_level(), 0);
        assert_eq!(c.output_level, 1);
        assert_eq!(c.start_level_inputs.files.len(), 3);
        assert!(c.output_level_inputs.is_empty());
        assert_eq!(c.reason, CompactionReason::LevelL0FilesNum);
        assert_eq!(c.input_level_group_filter_block_num, 0);
        assert!(!log.entries().is_empty());
    }

    #[test]
    fn test_l0_pick_skips_busy_files() {
        let opts = l0_trigger_opts();
        let mut v = VersionStorageInfo::new(InternalKeyComparator::bytewise(), 7);
        let busy = file(1, "a", "c", 10);
        busy.set_being_compacted(true);
        v.add_file(0, busy);
        v.add_file(0, file(2, "b", "d", 10));
        v.add_file(0, file(3, "e", "g", 10));
        v.add_file(0, file(4, "f", "h", 10));
        v.compute_compaction_score(&opts);

        let mut log = LogBuffer::new();
        let c = picker()
            .pick_compaction("default", &opts, &mut v, &mut log)
            .expect("L0 pick");
        let numbers: Vec<u64> = c
            .start_level_inputs
            .files
            .iter()
            .map(|f| f.file_number)
            .collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }

    #[test]
    fn test_l1_pick_selects_heaviest_group() {
        let opts = CompactionOptions {
            level0_file_num_compaction_trigger: 100,
            max_bytes_for_level_base: 40,
            max_bytes_for_level_multiplier: 10.0,
            ..Default::default()
        };
        let mut v = VersionStorageInfo::new(InternalKeyComparator::bytewise(), 7);
        v.add_file(1, filtered_file(1, "1", "3", 10, 11));
        v.add_file(1, filtered_file(2, "2", "5", 20, 12));
        v.add_file(1, filtered_file(3, "7", "9", 15, 13));
        v.add_file(2, file(4, "2", "4", 30));
        v.add_file(2, file(5, "7", "8", 30));
        v.compute_compaction_score(&opts);

        let mut log = LogBuffer::new();
        let c = picker()
            .pick_compaction("default", &opts, &mut v, &mut log)
            .expect("L1 pick");

        assert_eq!(c.start_level(), 1);
        assert_eq!(c.output_level, 2);
        assert_eq!(c.reason, CompactionReason::LevelMaxLevelSize);

        let starts: Vec<u64> = c
            .start_level_inputs
            .files
            .iter()
            .map(|f| f.file_number)
            .collect();
        assert_eq!(starts, vec![1, 2]);

        let outputs: Vec<u64> = c
            .output_level_inputs
            .files
            .iter()
            .map(|f| f.file_number)
            .collect();
        assert_eq!(outputs, vec![4]);

        // last file of the picked group carries the forwarded block number
        assert_eq!(c.input_level_group_filter_block_num, 12);
    }

    #[test]
    fn test_pick_registers_files_and_blocks_rescheduling() {
        let opts = CompactionOptions {
            level0_file_num_compaction_trigger: 100,
            max_bytes_for_level_base: 40,
            ..Default::default()
        };
        let mut v = VersionStorageInfo::new(InternalKeyComparator::bytewise(), 7);
        v.add_file(1, file(1, "1", "3", 30));
        v.add_file(1, file(2, "2", "5", 30));
        v.compute_compaction_score(&opts);

        let p = picker();
        let mut log = LogBuffer::new();
        let c = p
            .pick_compaction("default", &opts, &mut v, &mut log)
            .expect("first pick");
        assert!(c
            .start_level_inputs
            .files
            .iter()
            .all(|f| f.is_being_compacted()));

        // scores were recomputed with the picked files hidden
        assert!(!p.needs_compaction(&v));
        assert!(p
            .pick_compaction("default", &opts, &mut v, &mut log)
            .is_none());

        // releasing the pick makes the files eligible again
        c.release_inputs();
        v.compute_compaction_score(&opts);
        assert!(p.needs_compaction(&v));
    }

    #[test]
    fn test_no_pick_when_all_scores_below_one() {
        let opts = CompactionOptions {
            level0_file_num_compaction_trigger: 10,
            max_bytes_for_level_base: 1 << 30,
            ..Default::default()
        };
        let mut v = VersionStorageInfo::new(InternalKeyComparator::bytewise(), 7);
        v.add_file(0, file(1, "a", "c", 10));
        v.add_file(1, file(2, "a", "z", 100));
        v.compute_compaction_score(&opts);

        let p = picker();
        assert!(!p.needs_compaction(&v));
        let mut log = LogBuffer::new();
        assert!(p
            .pick_compaction("default", &opts, &mut v, &mut log)
            .is_none());
    }

    #[test]
    fn test_grandparents_cover_the_input_range() {
        let opts = CompactionOptions {
            level0_file_num_compaction_trigger: 100,
            max_bytes_for_level_base: 40,
            ..Default::default()
        };
        let mut v = VersionStorageInfo::new(InternalKeyComparator::bytewise(), 7);
        v.add_file(1, file(1, "b", "e", 50));
        v.add_file(2, file(2, "c", "f", 10));
        v.add_file(3, file(3, "a", "d", 10));
        v.add_file(3, file(4, "x", "z", 10));
        v.compute_compaction_score(&opts);

        let mut log = LogBuffer::new();
        let c = picker()
            .pick_compaction("default", &opts, &mut v, &mut log)
            .expect("pick");
        let gp: Vec<u64> = c.grandparents.iter().map(|f| f.file_number).collect();
        assert_eq!(gp, vec![3]);
    }

    #[test]
    fn test_path_id_rolls_over_when_a_path_fills_up() {
        let ioptions = EngineOptions {
            db_paths: vec![DbPath::new("fast", 100), DbPath::new("bulk", u64::MAX)],
            ..Default::default()
        };
        let opts = CompactionOptions {
            max_bytes_for_level_base: 40,
            max_bytes_for_level_multiplier: 10.0,
            ..Default::default()
        };
        assert_eq!(get_path_id(&ioptions, &opts, 1), 0);
        assert_eq!(get_path_id(&ioptions, &opts, 2), 1);
        assert_eq!(get_path_id(&ioptions, &opts, 3), 1);
    }

    #[test]
    fn test_single_path_always_selected() {
        let ioptions = EngineOptions::default();
        let opts = CompactionOptions::default();
        for level in 1..7 {
            assert_eq!(get_path_id(&ioptions, &opts, level), 0);
        }
    }

    #[test]
    fn test_compression_per_level_clamps_to_last_entry() {
        let ioptions = EngineOptions {
            compression_per_level: vec![CompressionType::None, CompressionType::Snappy],
            ..Default::default()
        };
        let opts = CompactionOptions {
            level0_file_num_compaction_trigger: 100,
            max_bytes_for_level_base: 40,
            ..Default::default()
        };
        let mut v = VersionStorageInfo::new(InternalKeyComparator::bytewise(), 7);
        v.add_file(3, file(1, "a", "c", 1 << 20));
        v.compute_compaction_score(&opts);

        let p = TierCompactionPicker::new(Arc::new(ioptions), InternalKeyComparator::bytewise());
        let mut log = LogBuffer::new();
        let c = p
            .pick_compaction("default", &opts, &mut v, &mut log)
            .expect("pick");
        assert_eq!(c.output_level, 4);
        assert_eq!(c.compression, CompressionType::Snappy);
    }
}
