#![forbid(unsafe_code)]

use thiserror::Error;

/// Segment pipeline errors.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Playlist parsing error: {0}")]
    PlaylistParse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    #[error("DRM error: {0}")]
    Drm(#[from] tessera_drm::DrmError),

    #[error("No segment covers {0:.3}s")]
    SeekOutOfRange(f64),

    #[error("Unknown variant: {0}")]
    UnknownVariant(usize),

    #[error("No variants")]
    NoVariants,

    #[error("Cancelled")]
    Cancelled,

    #[error("Request superseded by a newer one")]
    Superseded,

    #[error("Segment storage closed")]
    Closed,
}

pub type HlsResult<T> = Result<T, HlsError>;
