#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used by `tessera-storage`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by segment readers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("write after end of segment")]
    Finished,

    #[error("segment failed: {0}")]
    Failed(String),
}
