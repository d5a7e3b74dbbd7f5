//! Variant playlists and the merged cross-variant timeline.
//!
//! A [`MediaPlaylist`] is what one reload of one variant yields. A
//! [`Timeline`] aligns the playlists of all variants by media sequence so the
//! download pointer can switch variants mid-stream without losing position.
//!
//! ```rust
//! use std::time::Duration;
//! use tessera_playlist::{MediaPlaylist, Segment, Timeline};
//! use url::Url;
//!
//! let url = Url::parse("https://cdn.example.com/low/1.ts").unwrap();
//! let mut playlist = MediaPlaylist::new(500_000, Duration::from_secs(4), false);
//! playlist.segments.push(Segment::new(1, Duration::from_secs(4), url));
//!
//! let mut timeline = Timeline::new(1);
//! let outcome = timeline.merge(0, &playlist);
//! assert!(outcome.became_ready);
//! assert!(timeline.has_download_item(0));
//! ```

#![forbid(unsafe_code)]

mod playlist;
mod segment;
mod timeline;

pub use playlist::MediaPlaylist;
pub use segment::{Segment, SegmentId, SegmentKey, Variant, sequence_iv};
pub use timeline::{
    DEFAULT_LIVE_START_SEGMENTS, DEFAULT_PRUNE_WINDOW, DownloadSegment, MergeOutcome, Timeline,
};
