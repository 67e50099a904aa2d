//! TierDB Storage Engine Extensions
//!
//! Tiered compaction picking and persistent-memory cuckoo filters for an
//! LSM engine.
//!
//! ## Architecture
//! - **compaction**: vertical-group tier picker that partitions a level
//!   into overlap-closed file chains and packages the heaviest one, plus
//!   its output-level overlap, as a compaction descriptor
//! - **pmem**: block arena over a memory-mapped file; one cuckoo filter
//!   per output group, addressed by a restart-stable block index
//! - **version**: file metadata and per-level statistics the picker reads
//!
//! The engine proper (SST files, MemTable, WAL, iterators, the merge
//! executor) lives outside this crate; it drives the picker through
//! [`VersionStorageInfo`] and installs filter block numbers into
//! [`FileMetaData`].

pub mod compaction;
pub mod config;
pub mod key;
pub mod pmem;
pub mod version;

mod error;

pub use compaction::{
    Compaction, CompactionInputFiles, CompactionReason, GroupSize, LogBuffer,
    TierCompactionPicker, VerticalGroup, VerticalGroupBuilder,
};
pub use config::{
    ArenaConfig, CompactionOptions, CompressionOptions, CompressionType, DbPath, EngineOptions,
};
pub use error::{Result, StorageError};
pub use key::{
    BytewiseComparator, InternalKey, InternalKeyComparator, UserKeyComparator, ValueKind,
};
pub use pmem::{CuckooFilter, PersistentArena};
pub use version::{FileMetaData, VersionStorageInfo};
