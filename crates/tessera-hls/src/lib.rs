#![forbid(unsafe_code)]

//! `tessera-hls`
//!
//! Threaded HLS segment pipeline built on blocking threads and condvars, no
//! async runtime:
//! - one reload thread per variant merges its media playlist into a shared
//!   [`Timeline`](tessera_playlist::Timeline)
//! - one download thread picks a variant per segment with the Q-learning
//!   [`AbrPolicy`](tessera_abr::AbrPolicy), decrypts AES-128 segments and
//!   publishes their bytes through [`SegmentReader`](tessera_storage::SegmentReader)s
//! - the consumer pulls readers through [`SegmentStorage::get_next_segment_reader`]
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use tessera_hls::{
//!     HlsOptions, NextSegment, PlaybackTelemetry, SegmentStorage,
//!     testing::{FakeDownloader, FakePlaylistParser},
//! };
//! use tessera_playlist::Variant;
//! use url::Url;
//!
//! # fn main() -> Result<(), tessera_hls::HlsError> {
//! let variant = Variant::new(Url::parse("https://cdn.example.com/low.m3u8").unwrap(), 500_000);
//! let storage = SegmentStorage::new(
//!     vec![variant],
//!     Arc::new(FakeDownloader::new()),
//!     Arc::new(FakePlaylistParser::new()),
//!     HlsOptions::default(),
//! )?;
//! storage.start()?;
//! storage.wait_ready(Duration::from_secs(5));
//!
//! let ticket = storage.get_next_segment_reader(PlaybackTelemetry::default());
//! if let NextSegment::Reader(reader) = ticket.wait()? {
//!     let mut buf = vec![0u8; 188];
//!     let read = reader.read(0, &mut buf, 188)?;
//!     assert!(read <= buf.len());
//! }
//! # Ok(())
//! # }
//! ```

mod download;
mod error;
mod events;
mod options;
mod reload;
mod shared;
mod storage;
mod ticket;
mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{HlsError, HlsResult};
pub use events::{EventEmitter, HlsEvent};
pub use options::{HlsOptions, KeyOptions};
pub use storage::SegmentStorage;
pub use tessera_abr::{AbrMode, AbrOptions, PlaybackTelemetry};
pub use ticket::{NextSegment, SegmentTicket};
pub use traits::{ChunkControl, Downloader, PlaylistParser};
