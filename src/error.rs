//! Error types for the tierdb storage extensions

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arena exhausted: {0}")]
    ArenaExhausted(String),

    #[error("Filter overflow: {0}")]
    FilterOverflow(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
