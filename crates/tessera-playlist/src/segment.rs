#![forbid(unsafe_code)]

//! Segment and variant descriptors.

use std::time::Duration;

use url::Url;

/// AES-128 key reference effective for one segment (`#EXT-X-KEY`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentKey {
    /// Absolute URI of the key.
    pub uri: Url,
    /// Explicit IV, if the playlist carries one.
    pub iv: Option<[u8; 16]>,
}

/// Identity of a segment resource.
///
/// Two segments with equal ids refer to the same bytes of the same variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentId {
    pub url: Url,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub media_sequence: u64,
}

/// One fetchable unit of one variant at one point in the timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Position of the segment in its variant; aligns variants with each other.
    pub media_sequence: u64,
    /// Playback duration.
    pub duration: Duration,
    /// Cumulative offset from the start of the timeline, assigned on merge.
    pub time_in_playlist: Duration,
    /// Absolute URL of the resource holding the segment.
    pub url: Url,
    /// Byte offset inside `url` (`#EXT-X-BYTERANGE`).
    pub byte_offset: u64,
    /// Byte length inside `url`; 0 means the whole resource.
    pub byte_length: u64,
    /// Encryption key, if the segment is encrypted.
    pub key: Option<SegmentKey>,
    /// Timestamp/format discontinuity precedes this segment.
    pub discontinuity: bool,
    pub valid: bool,
}

impl Segment {
    /// Plain, unencrypted whole-resource segment.
    pub fn new(media_sequence: u64, duration: Duration, url: Url) -> Self {
        Self {
            media_sequence,
            duration,
            time_in_playlist: Duration::ZERO,
            url,
            byte_offset: 0,
            byte_length: 0,
            key: None,
            discontinuity: false,
            valid: true,
        }
    }

    pub fn with_byte_range(mut self, byte_offset: u64, byte_length: u64) -> Self {
        self.byte_offset = byte_offset;
        self.byte_length = byte_length;
        self
    }

    pub fn with_key(mut self, key: SegmentKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_discontinuity(mut self, discontinuity: bool) -> Self {
        self.discontinuity = discontinuity;
        self
    }

    pub fn encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Identity used for deduplication and lookup.
    pub fn id(&self) -> SegmentId {
        SegmentId {
            url: self.url.clone(),
            byte_offset: self.byte_offset,
            byte_length: self.byte_length,
            media_sequence: self.media_sequence,
        }
    }

    /// End of the segment on the playlist clock.
    pub fn end_time(&self) -> Duration {
        self.time_in_playlist + self.duration
    }

    /// IV used to decrypt this segment when the key carries none.
    ///
    /// HLS convention: the media sequence number as a big-endian 128-bit integer.
    pub fn default_iv(&self) -> [u8; 16] {
        sequence_iv(self.media_sequence)
    }
}

/// IV derived from a media sequence number.
pub fn sequence_iv(media_sequence: u64) -> [u8; 16] {
    u128::from(media_sequence).to_be_bytes()
}

/// One selectable quality level, as advertised by the master manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    /// Media playlist URL of the variant.
    pub url: Url,
    /// Advertised bitrate in bits per second.
    pub bandwidth: u64,
    /// Human-readable name (e.g. "720p").
    pub name: Option<String>,
}

impl Variant {
    pub fn new(url: Url, bandwidth: u64) -> Self {
        Self {
            url,
            bandwidth,
            name: None,
        }
    }
}
