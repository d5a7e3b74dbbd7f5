#![forbid(unsafe_code)]

//! `tessera-storage`
//!
//! Byte conduit between the download thread and the demuxer. One
//! [`SegmentReader`] carries the decrypted bytes of exactly one segment:
//! - producer side: `write` / `end` / `fail`
//! - consumer side: blocking `read` with a minimum size and an absolute timeout
//! - `overwritable` once the segment is complete and fully consumed

mod error;
mod reader;

pub use error::{StorageError, StorageResult};
pub use reader::{DEFAULT_READ_TIMEOUT, ReaderOptions, SegmentInfo, SegmentReader};
