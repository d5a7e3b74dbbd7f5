#![forbid(unsafe_code)]

//! Cross-variant timeline with a stable download pointer.
//!
//! Entries are kept in a `VecDeque` addressed by monotonically increasing
//! logical indices. Pruning pops from the front and bumps `base`, so a logical
//! index handed out earlier stays meaningful for as long as its entry exists.

use std::{collections::VecDeque, time::Duration};

use tracing::{debug, trace, warn};

use crate::{MediaPlaylist, Segment};

/// Default number of entries kept behind the download pointer on live streams.
pub const DEFAULT_PRUNE_WINDOW: u64 = 6;
/// Default distance from the live edge at which live playback starts.
pub const DEFAULT_LIVE_START_SEGMENTS: usize = 3;

// DownloadSegment

/// One playback position of the timeline with a slot per variant.
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadSegment {
    pub media_sequence: u64,
    pub time_in_playlist: Duration,
    pub duration: Duration,
    slots: Vec<Option<Segment>>,
}

impl DownloadSegment {
    fn new(variants: usize, media_sequence: u64, time_in_playlist: Duration, duration: Duration) -> Self {
        Self {
            media_sequence,
            time_in_playlist,
            duration,
            slots: vec![None; variants],
        }
    }

    /// Segment of `variant` for this position, if its playlist supplied one.
    pub fn slot(&self, variant: usize) -> Option<&Segment> {
        self.slots.get(variant).and_then(Option::as_ref)
    }

    pub fn variant_count(&self) -> usize {
        self.slots.len()
    }

    pub fn end_time(&self) -> Duration {
        self.time_in_playlist + self.duration
    }

    pub fn contains(&self, time: Duration) -> bool {
        time >= self.time_in_playlist && time < self.end_time()
    }

    /// Variants with a valid segment at this position.
    pub fn servable_variants(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().filter(|s| s.valid).map(|_| idx))
    }
}

// MergeOutcome

/// Result of merging one variant's playlist into the timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Segments of the variant that were new to the timeline.
    pub added: usize,
    /// New timeline positions appended at the tail.
    pub appended: usize,
    /// Entries dropped from the front by live pruning.
    pub pruned: usize,
    /// The timeline went from empty to non-empty.
    pub became_ready: bool,
}

#[derive(Clone, Debug, Default)]
struct VariantTrack {
    bandwidth: u64,
    target_duration: Duration,
    live: bool,
    loaded: bool,
    max_sequence: Option<u64>,
}

// Timeline

/// Merged view of all variant playlists.
#[derive(Clone, Debug)]
pub struct Timeline {
    entries: VecDeque<DownloadSegment>,
    /// Logical index of `entries[0]`.
    base: usize,
    /// Logical index of the next position to download.
    pointer: usize,
    /// End of the last entry ever appended.
    clock: Duration,
    tracks: Vec<VariantTrack>,
    prune_window: u64,
    live_start_segments: usize,
}

impl Timeline {
    pub fn new(variants: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            base: 0,
            pointer: 0,
            clock: Duration::ZERO,
            tracks: vec![VariantTrack::default(); variants],
            prune_window: DEFAULT_PRUNE_WINDOW,
            live_start_segments: DEFAULT_LIVE_START_SEGMENTS,
        }
    }

    pub fn with_prune_window(mut self, window: u64) -> Self {
        self.prune_window = window;
        self
    }

    pub fn with_live_start_segments(mut self, segments: usize) -> Self {
        self.live_start_segments = segments;
        self
    }

    pub fn variant_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Logical index of the first retained entry.
    pub fn first_index(&self) -> usize {
        self.base
    }

    /// Logical index one past the last entry.
    pub fn end_index(&self) -> usize {
        self.base + self.entries.len()
    }

    /// Logical index of the download pointer.
    pub fn position(&self) -> usize {
        self.pointer
    }

    pub fn get(&self, index: usize) -> Option<&DownloadSegment> {
        index
            .checked_sub(self.base)
            .and_then(|offset| self.entries.get(offset))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DownloadSegment> {
        self.entries.iter()
    }

    /// Entry under the download pointer.
    pub fn current(&self) -> Option<&DownloadSegment> {
        self.get(self.pointer)
    }

    /// Segment of `variant` under the download pointer.
    pub fn current_segment(&self, variant: usize) -> Option<&Segment> {
        self.current().and_then(|entry| entry.slot(variant))
    }

    /// Move the pointer one position forward.
    pub fn advance(&mut self) {
        self.pointer += 1;
        trace!(position = self.pointer, "timeline: advance");
    }

    /// Place the pointer at `index`. Fails for indices that were pruned or
    /// lie beyond the tail.
    pub fn set_position(&mut self, index: usize) -> bool {
        if index < self.base || index > self.end_index() {
            return false;
        }
        self.pointer = index;
        true
    }

    /// Logical index where playback starts: the first entry for on-demand
    /// content, a few entries behind the edge for live content.
    pub fn start_position(&self) -> usize {
        if self.is_live() {
            self.end_index()
                .saturating_sub(self.live_start_segments)
                .max(self.base)
        } else {
            self.base
        }
    }

    /// Move the pointer to the entry containing `time`.
    ///
    /// Returns the start of that entry, or `None` (pointer untouched) when no
    /// retained entry covers `time`.
    pub fn seek(&mut self, time: Duration) -> Option<Duration> {
        let offset = self.entries.partition_point(|e| e.end_time() <= time);
        let entry = self.entries.get(offset).filter(|e| e.contains(time))?;
        let start = entry.time_in_playlist;
        debug!(
            media_sequence = entry.media_sequence,
            start_ms = start.as_millis() as u64,
            "timeline: seek"
        );
        self.pointer = self.base + offset;
        Some(start)
    }

    /// End of the playback clock.
    pub fn total_duration(&self) -> Duration {
        self.clock
    }

    /// At least one loaded variant is still live.
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.loaded && t.live)
    }

    pub fn is_variant_live(&self, variant: usize) -> bool {
        self.tracks.get(variant).is_some_and(|t| t.live)
    }

    pub fn is_variant_loaded(&self, variant: usize) -> bool {
        self.tracks.get(variant).is_some_and(|t| t.loaded)
    }

    pub fn target_duration(&self, variant: usize) -> Option<Duration> {
        self.tracks
            .get(variant)
            .filter(|t| t.loaded)
            .map(|t| t.target_duration)
    }

    /// Bandwidth reported by the variant's media playlist (0 if unknown).
    pub fn bandwidth(&self, variant: usize) -> u64 {
        self.tracks.get(variant).map_or(0, |t| t.bandwidth)
    }

    /// `variant` can serve the position under the pointer right now.
    pub fn has_download_item(&self, variant: usize) -> bool {
        self.current_segment(variant).is_some_and(|s| s.valid)
    }

    /// `variant` can serve the position under the pointer now or after a
    /// future reload of its playlist.
    pub fn will_have_download_item(&self, variant: usize) -> bool {
        if self.has_download_item(variant) {
            return true;
        }
        let Some(track) = self.tracks.get(variant) else {
            return false;
        };
        if !track.loaded {
            return true;
        }
        if !track.live {
            return false;
        }
        match (self.current(), track.max_sequence) {
            (Some(entry), Some(max)) => max < entry.media_sequence,
            _ => true,
        }
    }

    /// Pointer has a position some variant can download now.
    pub fn is_servable(&self) -> bool {
        (0..self.tracks.len()).any(|variant| self.has_download_item(variant))
    }

    /// On-demand content whose every position has been downloaded.
    pub fn is_finished(&self) -> bool {
        let any_loaded = self.tracks.iter().any(|t| t.loaded);
        any_loaded && !self.is_live() && self.pointer >= self.end_index()
    }

    /// Advance past positions no variant will ever serve. Returns the number
    /// of skipped positions.
    pub fn skip_unservable(&mut self) -> usize {
        let mut skipped = 0;
        while self.current().is_some()
            && !(0..self.tracks.len()).any(|variant| self.will_have_download_item(variant))
        {
            if let Some(entry) = self.current() {
                warn!(
                    media_sequence = entry.media_sequence,
                    "timeline: no variant can serve position, skipping"
                );
            }
            self.pointer += 1;
            skipped += 1;
        }
        skipped
    }

    /// Merge a freshly parsed playlist of `variant`.
    ///
    /// Known positions get the variant's slot filled; sequences past the tail
    /// become new entries on the clock. Sequences the variant already supplied,
    /// sequences older than the retained head and sequences falling into a gap
    /// of the timeline are ignored.
    pub fn merge(&mut self, variant: usize, incoming: &MediaPlaylist) -> MergeOutcome {
        let variants = self.tracks.len();
        let Some(track) = self.tracks.get_mut(variant) else {
            warn!(variant, variants, "timeline merge: unknown variant");
            return MergeOutcome::default();
        };

        let was_empty = self.entries.is_empty();
        let mut outcome = MergeOutcome::default();

        if incoming.is_empty() {
            debug!(variant, "timeline merge: empty playlist");
            return outcome;
        }

        track.loaded = true;
        track.live = incoming.live;
        track.target_duration = incoming.target_duration;
        if incoming.bandwidth > 0 {
            track.bandwidth = incoming.bandwidth;
        }

        for segment in &incoming.segments {
            let seq = segment.media_sequence;
            if track.max_sequence.is_some_and(|max| seq <= max) {
                continue;
            }
            track.max_sequence = Some(seq);

            let tail_seq = self.entries.back().map(|e| e.media_sequence);
            if tail_seq.is_none_or(|tail| seq > tail) {
                let mut entry =
                    DownloadSegment::new(variants, seq, self.clock, segment.duration);
                let mut segment = segment.clone();
                segment.time_in_playlist = self.clock;
                entry.slots[variant] = Some(segment);
                self.clock += entry.duration;
                self.entries.push_back(entry);
                outcome.appended += 1;
                outcome.added += 1;
                continue;
            }

            let Ok(offset) = self
                .entries
                .binary_search_by_key(&seq, |e| e.media_sequence)
            else {
                trace!(variant, media_sequence = seq, "timeline merge: no matching position");
                continue;
            };
            let entry = &mut self.entries[offset];
            if entry.slots[variant].is_none() {
                let mut segment = segment.clone();
                segment.time_in_playlist = entry.time_in_playlist;
                entry.slots[variant] = Some(segment);
                outcome.added += 1;
            }
        }

        if self.is_live() {
            outcome.pruned = self.prune();
        }
        outcome.became_ready = was_empty && !self.entries.is_empty();

        debug!(
            variant,
            added = outcome.added,
            appended = outcome.appended,
            pruned = outcome.pruned,
            len = self.entries.len(),
            live = self.is_variant_live(variant),
            "timeline merge"
        );
        outcome
    }

    /// Drop front entries lagging the pointer by more than the prune window.
    /// Entries at or ahead of the pointer are never dropped.
    pub fn prune(&mut self) -> usize {
        let pointer_seq = match self.current() {
            Some(entry) => entry.media_sequence,
            None => match self.entries.back() {
                Some(last) if self.pointer >= self.end_index() => last.media_sequence + 1,
                _ => return 0,
            },
        };

        let mut pruned = 0;
        while self.base < self.pointer
            && self
                .entries
                .front()
                .is_some_and(|e| e.media_sequence + self.prune_window < pointer_seq)
        {
            self.entries.pop_front();
            self.base += 1;
            pruned += 1;
        }
        if pruned > 0 {
            trace!(pruned, base = self.base, "timeline: pruned");
        }
        pruned
    }
}
