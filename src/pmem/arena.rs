//! Persistent block arena backing the per-group cuckoo filters
//!
//! The arena memory-maps one file of fixed-size blocks. Block 0 is the
//! superblock; every other block is either on the global free list or on
//! exactly one per-level occupied list, threaded through the block headers
//! themselves so the lists survive a restart.
//!
//! Header fields are only touched under the allocation mutex. Block
//! payloads belong to the filter owning the block and are guarded by that
//! filter's own lock; the two byte ranges never overlap.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use parking_lot::Mutex;

use super::format::{
    BlockHeader, BLOCK_HEADER_SIZE, FREE_HEAD_OFFSET, LEVEL_HEADS_OFFSET, LEVEL_NUM,
    NO_MORE_FREE_BLOCK, NO_MORE_NEXT_VALID_BLOCK, SLOT_PER_BUCKET, SLOT_SIZE,
};
use crate::config::ArenaConfig;
use crate::error::{Result, StorageError};

/// Fixed-size block allocator over a memory-mapped file.
pub struct PersistentArena {
    alloc_mutex: Mutex<()>,
    base: *mut u8,
    mapped_len: usize,
    block_size: u64,
    block_count: u64,
    // Keeps the mapping alive; all data access goes through `base`.
    mmap: MmapMut,
}

// Header bytes are serialized by `alloc_mutex`; payload bytes are owned by
// one filter each, serialized by the filter's lock.
unsafe impl Send for PersistentArena {}
unsafe impl Sync for PersistentArena {}

impl PersistentArena {
    /// Maps `path`, creating the file if absent. The total size is rounded
    /// up to a block multiple; a fresh file gets its free list and level
    /// heads formatted, an existing file is trusted as-is and must have
    /// been written with the same geometry.
    pub fn open(path: &Path, config: ArenaConfig) -> Result<Self> {
        let block_size = config.block_size;
        if block_size % 8 != 0 || block_size < ArenaConfig::min_block_size() {
            return Err(StorageError::InvalidArgument(format!(
                "block size {} must be 8-byte aligned and hold at least one bucket",
                block_size
            )));
        }
        let total = (config.total_size + block_size - 1) / block_size * block_size;
        let block_count = total / block_size;
        if block_count < 2 {
            return Err(StorageError::InvalidArgument(format!(
                "arena of {} bytes leaves no allocatable block",
                total
            )));
        }

        let preexisting = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(total)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        let arena = Self {
            alloc_mutex: Mutex::new(()),
            base,
            mapped_len: total as usize,
            block_size,
            block_count,
            mmap,
        };
        if !preexisting {
            arena.format_lists();
        }
        Ok(arena)
    }

    /// Chains every block's leading word into the initial free list. Block
    /// 0's word doubles as the superblock's free-list head, so after the
    /// loop the head already points at block 1.
    fn format_lists(&self) {
        let _guard = self.alloc_mutex.lock();
        for i in 0..self.block_count - 1 {
            self.header(i).set_next(i as i64 + 1);
        }
        self.header(self.block_count - 1).set_next(NO_MORE_FREE_BLOCK);
        for level in 0..LEVEL_NUM {
            self.set_level_head(level, NO_MORE_NEXT_VALID_BLOCK);
        }
    }

    /// Detaches the first free block, stamps its level, and prepends it to
    /// that level's occupied list. Fails when the free list is empty.
    pub fn allocate_block(&self, level: usize) -> Result<u64> {
        assert!(level < LEVEL_NUM);
        let _guard = self.alloc_mutex.lock();

        let first_free = self.free_head();
        if first_free == NO_MORE_FREE_BLOCK {
            return Err(StorageError::ArenaExhausted(format!(
                "no free block left for a level {} filter",
                level
            )));
        }

        let block_num = first_free as u64;
        let node = self.header(block_num);
        node.set_level(level as i32);
        self.set_free_head(node.next());

        node.set_next(self.level_head(level));
        if node.next() != NO_MORE_NEXT_VALID_BLOCK {
            self.header(node.next() as u64).set_prev(block_num as i64);
        }
        node.set_prev(0);
        self.set_level_head(level, block_num as i64);

        Ok(block_num)
    }

    /// Unlinks the block from its level list and pushes it back onto the
    /// free list (LIFO).
    ///
    /// `prev == 0` marks the list head: block 0 is the superblock and can
    /// never be a real predecessor, so the index doubles as the sentinel.
    pub fn dispose_block(&self, block_num: u64) {
        assert!(block_num > 0 && block_num < self.block_count);
        let _guard = self.alloc_mutex.lock();

        let node = self.header(block_num);
        let prev = node.prev();
        let next = node.next();

        if prev == 0 {
            self.set_level_head(node.level() as usize, next);
        } else {
            self.header(prev as u64).set_next(next);
        }
        if next != NO_MORE_NEXT_VALID_BLOCK {
            self.header(next as u64).set_prev(prev);
        }

        node.set_next(self.free_head());
        self.set_free_head(block_num as i64);
    }

    /// Raw pointer to the start of `block_num`. Block 0 is never handed out.
    pub(crate) fn get_block(&self, block_num: u64) -> *mut u8 {
        assert!(block_num > 0 && block_num < self.block_count);
        unsafe { self.base.add((block_num * self.block_size) as usize) }
    }

    /// Flushes the whole mapping to the backing file.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    pub fn mapped_size(&self) -> usize {
        self.mapped_len
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Buckets available to a filter in one block of this arena.
    pub fn buckets_per_block(&self) -> u64 {
        ((self.block_size - BLOCK_HEADER_SIZE) / SLOT_SIZE) / SLOT_PER_BUCKET
    }

    /// Snapshot of the free list, head first.
    pub fn free_list(&self) -> Vec<u64> {
        let _guard = self.alloc_mutex.lock();
        let mut out = Vec::new();
        let mut cur = self.free_head();
        while cur != NO_MORE_FREE_BLOCK {
            out.push(cur as u64);
            cur = self.header(cur as u64).next();
        }
        out
    }

    /// Snapshot of one level's occupied list, head first.
    pub fn level_list(&self, level: usize) -> Vec<u64> {
        assert!(level < LEVEL_NUM);
        let _guard = self.alloc_mutex.lock();
        let mut out = Vec::new();
        let mut cur = self.level_head(level);
        while cur != NO_MORE_NEXT_VALID_BLOCK {
            out.push(cur as u64);
            cur = self.header(cur as u64).next();
        }
        out
    }

    fn header(&self, block_num: u64) -> BlockHeader {
        debug_assert!(block_num < self.block_count);
        unsafe { BlockHeader::from_raw(self.base.add((block_num * self.block_size) as usize)) }
    }

    fn free_head(&self) -> i64 {
        unsafe { self.base.add(FREE_HEAD_OFFSET).cast::<i64>().read() }
    }

    fn set_free_head(&self, v: i64) {
        unsafe { self.base.add(FREE_HEAD_OFFSET).cast::<i64>().write(v) }
    }

    fn level_head(&self, level: usize) -> i64 {
        unsafe {
            self.base
                .add(LEVEL_HEADS_OFFSET + level * 8)
                .cast::<i64>()
                .read()
        }
    }

    fn set_level_head(&self, level: usize, v: i64) {
        unsafe {
            self.base
                .add(LEVEL_HEADS_OFFSET + level * 8)
                .cast::<i64>()
                .write(v)
        }
    }
}

impl Drop for PersistentArena {
    fn drop(&mut self) {
        // best-effort teardown persistence
        let _ = self.mmap.flush();
    }
}
