//! On-media layout of the persistent arena
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Block 0 (superblock)                │
//! │  0..8    first free block index      │
//! │  8..88   per-level list heads        │
//! │          (LEVEL_NUM × i64)           │
//! ├──────────────────────────────────────┤
//! │  Block i, i > 0                      │
//! │  0..8    next: successor on the free │
//! │          list, or next block of the  │
//! │          same level when occupied    │
//! │  8..16   prev: predecessor in the    │
//! │          level list (0 in the head)  │
//! │  16..20  level (occupied blocks)     │
//! │  20..24  padding                     │
//! │  24..    cuckoo buckets              │
//! └──────────────────────────────────────┘
//! ```
//!
//! All integers are native-endian: list pointers are `i64`, the level is
//! `i32`. The free list ends at `-1`, a per-level list at `-2`. The
//! superblock's free-list head occupies the same eight bytes as block 0's
//! `next` field; initialization chains the free list through every block's
//! leading word and relies on that alias.

/// Bytes per arena block; one cuckoo filter occupies one block.
pub const BLOCK_SIZE: u64 = 1024 * 1024;

/// Default size of the backing file.
pub const ARENA_SIZE: u64 = 1024 * 1024 * 1024;

/// Fixed number of per-level list heads in the superblock. The engine runs
/// seven levels by default; the extra slots absorb deeper configurations.
pub const LEVEL_NUM: usize = 10;

/// Free-list terminator.
pub const NO_MORE_FREE_BLOCK: i64 = -1;

/// Per-level list terminator.
pub const NO_MORE_NEXT_VALID_BLOCK: i64 = -2;

/// Size of the intrusive list node at the head of every block. The level
/// field is padded out so the bucket array starts 8-byte aligned.
pub const BLOCK_HEADER_SIZE: u64 = 24;

/// Slots per cuckoo bucket.
pub const SLOT_PER_BUCKET: u64 = 4;

/// One slot on media: tag `u64` at offset 0, status `u32` at offset 8,
/// four bytes of padding.
pub const SLOT_SIZE: u64 = 16;

const NEXT_OFFSET: usize = 0;
const PREV_OFFSET: usize = 8;
const LEVEL_OFFSET: usize = 16;

/// Byte offset of the free-list head inside the superblock.
pub(crate) const FREE_HEAD_OFFSET: usize = 0;

/// Byte offset of the per-level head array inside the superblock.
pub(crate) const LEVEL_HEADS_OFFSET: usize = 8;

/// Typed view over a block's intrusive list header.
///
/// Callers must hold the arena allocation lock while reading or writing
/// header fields; the pointer must address the start of a mapped block.
#[derive(Clone, Copy)]
pub(crate) struct BlockHeader {
    ptr: *mut u8,
}

impl BlockHeader {
    /// Safety: `ptr` must point at the first byte of a mapped block that
    /// stays valid for the lifetime of the view.
    pub(crate) unsafe fn from_raw(ptr: *mut u8) -> Self {
        Self { ptr }
    }

    pub(crate) fn next(&self) -> i64 {
        unsafe { self.ptr.add(NEXT_OFFSET).cast::<i64>().read() }
    }

    pub(crate) fn set_next(&self, v: i64) {
        unsafe { self.ptr.add(NEXT_OFFSET).cast::<i64>().write(v) }
    }

    pub(crate) fn prev(&self) -> i64 {
        unsafe { self.ptr.add(PREV_OFFSET).cast::<i64>().read() }
    }

    pub(crate) fn set_prev(&self, v: i64) {
        unsafe { self.ptr.add(PREV_OFFSET).cast::<i64>().write(v) }
    }

    pub(crate) fn level(&self) -> i32 {
        unsafe { self.ptr.add(LEVEL_OFFSET).cast::<i32>().read() }
    }

    pub(crate) fn set_level(&self, v: i32) {
        unsafe { self.ptr.add(LEVEL_OFFSET).cast::<i32>().write(v) }
    }
}
