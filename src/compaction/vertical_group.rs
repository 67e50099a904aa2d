//! Vertical group formation for one LSM level
//!
//! A vertical group is a maximal chain of files whose user-key ranges
//! transitively overlap: walking the level in key order, a file joins the
//! current group while its smallest user key still falls inside the
//! group's range, and the group's largest key grows as members arrive.
//! Groups end up pairwise disjoint, so each one can be merged into the
//! next level independently.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::key::{InternalKey, InternalKeyComparator};
use crate::version::FileMetaData;

/// One overlap-closed chain of files, in ascending smallest-key order.
#[derive(Debug, Clone)]
pub struct VerticalGroup {
    pub files: Vec<Arc<FileMetaData>>,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub group_file_size: u64,
}

impl VerticalGroup {
    fn seed(file: &Arc<FileMetaData>) -> Self {
        Self {
            files: vec![file.clone()],
            smallest: file.smallest.clone(),
            largest: file.largest.clone(),
            group_file_size: file.compensated_file_size,
        }
    }
}

/// Size-ranking entry pointing back into the group list.
#[derive(Debug, Clone, Copy)]
pub struct GroupSize {
    pub group_index: usize,
    pub group_file_size: u64,
}

/// Partitions a level's files into vertical groups.
pub struct VerticalGroupBuilder {
    icmp: InternalKeyComparator,
}

impl VerticalGroupBuilder {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self { icmp }
    }

    /// Builds the groups for `level_files` plus the size index used for
    /// ranking. Files flagged as being compacted are skipped, except that
    /// the first file in key order always seeds the first group unchecked
    /// (long-standing picker behavior, pinned by tests).
    pub fn build(
        &self,
        level_files: &[Arc<FileMetaData>],
    ) -> (Vec<VerticalGroup>, Vec<GroupSize>) {
        let mut groups: Vec<VerticalGroup> = Vec::new();
        let mut sizes: Vec<GroupSize> = Vec::new();

        let mut files: Vec<Arc<FileMetaData>> = level_files.to_vec();
        files.sort_by(|a, b| self.order_files(a, b));

        let Some(first) = files.first() else {
            return (groups, sizes);
        };
        let mut group = VerticalGroup::seed(first);

        for file in &files[1..] {
            if file.is_being_compacted() {
                continue;
            }
            let within = self
                .icmp
                .compare_with_user_key(&group.smallest, &file.smallest)
                .is_le()
                && self
                    .icmp
                    .compare_with_user_key(&group.largest, &file.smallest)
                    .is_ge();
            if within {
                group.files.push(file.clone());
                group.group_file_size += file.compensated_file_size;
                if self.icmp.compare(&group.largest, &file.largest).is_lt() {
                    group.largest = file.largest.clone();
                }
            } else {
                Self::emit(&mut groups, &mut sizes, group);
                group = VerticalGroup::seed(file);
            }
        }
        Self::emit(&mut groups, &mut sizes, group);

        (groups, sizes)
    }

    fn emit(groups: &mut Vec<VerticalGroup>, sizes: &mut Vec<GroupSize>, group: VerticalGroup) {
        sizes.push(GroupSize {
            group_index: groups.len(),
            group_file_size: group.group_file_size,
        });
        groups.push(group);
    }

    /// Level files are walked in (smallest asc, largest desc) order so a
    /// wide file precedes the narrower files it covers.
    pub(crate) fn order_files(&self, a: &Arc<FileMetaData>, b: &Arc<FileMetaData>) -> Ordering {
        self.icmp
            .compare(&a.smallest, &b.smallest)
            .then_with(|| self.icmp.compare(&b.largest, &a.largest))
    }
}
