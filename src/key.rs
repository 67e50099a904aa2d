//! Internal keys and comparators
//!
//! An internal key is the user-visible key extended with a sequence number
//! and a record kind. File ordering and group boundaries use the full
//! internal comparison; range overlap between files is decided on the
//! user-key portion alone.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Record kind carried by an internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueKind {
    Deletion = 0,
    Value = 1,
}

/// User key plus sequence number and record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    user_key: Vec<u8>,
    sequence: u64,
    kind: ValueKind,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Vec<u8>>, sequence: u64, kind: ValueKind) -> Self {
        Self {
            user_key: user_key.into(),
            sequence,
            kind,
        }
    }

    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            String::from_utf8_lossy(&self.user_key),
            self.sequence
        )
    }
}

/// Ordering over user keys; the engine may install its own.
pub trait UserKeyComparator: Send + Sync {
    fn name(&self) -> &'static str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order, the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl UserKeyComparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "tierdb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders internal keys by user key ascending, then sequence descending,
/// then kind descending, so the freshest record for a user key sorts first.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_cmp: Arc<dyn UserKeyComparator>,
}

impl InternalKeyComparator {
    pub fn new(user_cmp: Arc<dyn UserKeyComparator>) -> Self {
        Self { user_cmp }
    }

    /// Comparator over raw byte order.
    pub fn bytewise() -> Self {
        Self::new(Arc::new(BytewiseComparator))
    }

    pub fn user_comparator(&self) -> &Arc<dyn UserKeyComparator> {
        &self.user_cmp
    }

    pub fn compare(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        match self.user_cmp.compare(a.user_key(), b.user_key()) {
            Ordering::Equal => b
                .sequence()
                .cmp(&a.sequence())
                .then_with(|| (b.kind() as u8).cmp(&(a.kind() as u8))),
            ord => ord,
        }
    }

    /// Compares only the user-key portions.
    pub fn compare_with_user_key(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        self.user_cmp.compare(a.user_key(), b.user_key())
    }

    pub fn compare_user_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user_cmp.compare(a, b)
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user_cmp", &self.user_cmp.name())
            .finish()
    }
}
