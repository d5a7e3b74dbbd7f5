#![forbid(unsafe_code)]

//! Per-variant media playlist and its incremental merge.

use std::time::Duration;

use tracing::{debug, trace};

use crate::Segment;

/// Parsed media playlist of one variant (VOD or live).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MediaPlaylist {
    /// Segments ordered by strictly increasing `media_sequence`.
    pub segments: Vec<Segment>,
    /// Advertised bitrate of the variant (bits per second).
    pub bandwidth: u64,
    /// `#EXT-X-TARGETDURATION`.
    pub target_duration: Duration,
    /// No `#EXT-X-ENDLIST` seen in the most recent fetch.
    pub live: bool,
}

impl MediaPlaylist {
    pub fn new(bandwidth: u64, target_duration: Duration, live: bool) -> Self {
        Self {
            segments: Vec::new(),
            bandwidth,
            target_duration,
            live,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.media_sequence)
    }

    /// Sum of all segment durations.
    pub fn duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn find(&self, media_sequence: u64) -> Option<&Segment> {
        self.segments
            .binary_search_by_key(&media_sequence, |s| s.media_sequence)
            .ok()
            .map(|idx| &self.segments[idx])
    }

    /// Merge a freshly fetched playlist into this one.
    ///
    /// Returns the number of appended segments. History is never rewritten:
    /// only segments newer than the current maximum sequence are appended, and
    /// they are placed on the clock right after the current last segment.
    pub fn merge(&mut self, incoming: &Self) -> usize {
        if incoming.is_empty() {
            debug!(bandwidth = self.bandwidth, "playlist merge: empty incoming playlist");
            return 0;
        }

        self.live = incoming.live;
        self.target_duration = incoming.target_duration;
        if incoming.bandwidth > 0 {
            self.bandwidth = incoming.bandwidth;
        }

        let (mut max_sequence, mut clock) = match self.segments.last() {
            Some(last) => (Some(last.media_sequence), last.end_time()),
            None => (None, Duration::ZERO),
        };

        let mut added = 0;
        for segment in &incoming.segments {
            if max_sequence.is_some_and(|max| segment.media_sequence <= max) {
                trace!(
                    media_sequence = segment.media_sequence,
                    "playlist merge: known segment"
                );
                continue;
            }
            let mut segment = segment.clone();
            segment.time_in_playlist = clock;
            clock += segment.duration;
            max_sequence = Some(segment.media_sequence);
            self.segments.push(segment);
            added += 1;
        }

        debug!(
            added,
            total = self.segments.len(),
            live = self.live,
            "playlist merge"
        );
        added
    }
}
