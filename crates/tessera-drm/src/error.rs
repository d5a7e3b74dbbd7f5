#![forbid(unsafe_code)]

use thiserror::Error;

pub type DrmResult<T> = Result<T, DrmError>;

/// DRM decryption errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrmError {
    #[error("AES-128-CBC decryption failed: {0}")]
    DecryptFailed(String),

    #[error("Invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Key processing failed: {0}")]
    KeyProcessing(String),

    #[error("Key fetch failed: {0}")]
    KeyFetch(String),
}
