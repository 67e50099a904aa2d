//! Persistent-memory arena and per-group cuckoo filters
//!
//! ## Architecture
//! - **PersistentArena**: fixed-size blocks memory-mapped from one file,
//!   threaded into a free list and per-level occupied lists
//! - **CuckooFilter**: approximate membership over one block, identified
//!   by a block index that survives restart
//!
//! Filters are created while a compaction writes its output group and
//! disposed when the referring file is obsoleted; the read path probes
//! them to skip files that cannot contain a key.

mod arena;
mod cuckoo;
mod format;

pub use arena::PersistentArena;
pub use cuckoo::{CuckooFilter, MAX_COLLIDE_NUM};
pub use format::{
    ARENA_SIZE, BLOCK_HEADER_SIZE, BLOCK_SIZE, LEVEL_NUM, NO_MORE_FREE_BLOCK,
    NO_MORE_NEXT_VALID_BLOCK, SLOT_PER_BUCKET, SLOT_SIZE,
};
