#![forbid(unsafe_code)]

//! State shared by the reload threads, the download thread and the consumer.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tessera_abr::PlaybackTelemetry;
use tessera_playlist::{Timeline, Variant};
use tessera_storage::SegmentReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    HlsError, HlsOptions,
    events::EventEmitter,
    ticket::{NextSegment, Reply},
};

/// Periodic wake of every condvar wait, so cancellation is observed even
/// without a notification.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(50);

pub(crate) struct EngineState {
    pub timeline: Timeline,
    /// Published readers not yet handed to the consumer, oldest first.
    pub queue: VecDeque<SegmentReader>,
    /// Reader of the segment currently being downloaded.
    pub in_flight: Option<SegmentReader>,
    /// Unanswered consumer request.
    pub pending: Option<Reply>,
    pub telemetry: PlaybackTelemetry,
    pub active_variant: Option<usize>,
    /// The pointer sits at a chosen start position.
    pub started: bool,
    /// Time of the position playback started at.
    pub start_time: Option<Duration>,
    pub end_announced: bool,
}

impl EngineState {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            queue: VecDeque::new(),
            in_flight: None,
            pending: None,
            telemetry: PlaybackTelemetry::default(),
            active_variant: None,
            started: false,
            start_time: None,
            end_announced: false,
        }
    }

    /// Place the pointer at the playback start unless playback already
    /// started. Returns `false` while the timeline is empty.
    pub fn ensure_started(&mut self) -> bool {
        if self.started {
            return true;
        }
        if self.timeline.is_empty() {
            return false;
        }
        let start = self.timeline.start_position();
        self.timeline.set_position(start);
        self.started = true;
        self.start_time = self.timeline.current().map(|entry| entry.time_in_playlist);
        debug!(
            position = start,
            live = self.timeline.is_live(),
            "segment storage: playback start"
        );
        true
    }

    /// Hand `reader` to the waiting consumer, or queue it.
    pub fn publish(&mut self, reader: SegmentReader) {
        if let Some(reply) = self.pending.take() {
            match reply.send(Ok(NextSegment::Reader(reader.clone()))) {
                Ok(()) => {
                    trace!(
                        media_sequence = reader.info().media_sequence,
                        "segment storage: reader handed to waiting consumer"
                    );
                    return;
                }
                Err(_) => trace!("segment storage: waiting consumer went away"),
            }
        }
        self.queue.push_back(reader);
    }

    /// Nothing is queued and no position is left to download.
    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty() && self.timeline.is_finished()
    }

    /// Answer the waiting consumer with end of stream. Returns `true` the
    /// first time the end is reached since the last seek.
    pub fn answer_end_of_stream(&mut self) -> bool {
        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Ok(NextSegment::EndOfStream));
        }
        !std::mem::replace(&mut self.end_announced, true)
    }

    /// Drop the queued readers and fail the one being downloaded.
    pub fn discard_readers(&mut self, reason: &str) -> usize {
        let discarded = self.queue.len();
        for reader in self.queue.drain(..) {
            reader.fail(reason);
        }
        if let Some(reader) = self.in_flight.take().filter(|r| !r.is_finished()) {
            reader.fail(reason);
        }
        discarded
    }

    /// Remove `reader` from the queue. `false` when it was already handed out.
    pub fn unqueue(&mut self, reader: &SegmentReader) -> bool {
        match self.queue.iter().position(|queued| queued.ptr_eq(reader)) {
            Some(idx) => {
                self.queue.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Bandwidth of every variant: the media playlist's when known, the
    /// master playlist's otherwise.
    pub fn candidates(&self, variants: &[Variant]) -> Vec<u64> {
        variants
            .iter()
            .enumerate()
            .map(|(idx, variant)| match self.timeline.bandwidth(idx) {
                0 => variant.bandwidth,
                bps => bps,
            })
            .collect()
    }

    pub fn fail_pending(&mut self, error: HlsError) {
        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Err(error));
        }
    }
}

pub(crate) struct Shared {
    pub state: Mutex<EngineState>,
    /// Download thread: capacity, servable position, seek.
    pub work: Condvar,
    /// `wait_ready` callers: first segment merged.
    pub ready: Condvar,
    /// Reload threads: shutdown.
    pub reload: Condvar,
    /// Bumped by every seek; in-flight work of an older epoch is discarded.
    pub epoch: AtomicU64,
    pub cancel: CancellationToken,
    pub events: EventEmitter,
    pub options: HlsOptions,
    pub variants: Vec<Variant>,
}

impl Shared {
    pub fn new(
        variants: Vec<Variant>,
        options: HlsOptions,
        cancel: CancellationToken,
    ) -> Self {
        let timeline = Timeline::new(variants.len())
            .with_prune_window(options.prune_window)
            .with_live_start_segments(options.live_start_segments);
        Self {
            state: Mutex::new(EngineState::new(timeline)),
            work: Condvar::new(),
            ready: Condvar::new(),
            reload: Condvar::new(),
            epoch: AtomicU64::new(0),
            cancel,
            events: EventEmitter::new(options.events_channel_capacity),
            options,
            variants,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn wake_all(&self) {
        self.work.notify_all();
        self.ready.notify_all();
        self.reload.notify_all();
    }

    /// Wait on `condvar` for up to `timeout` while `keep_waiting` holds.
    ///
    /// Returns the guard and `false` once cancelled.
    pub fn wait_while<'a>(
        &self,
        condvar: &Condvar,
        mut guard: MutexGuard<'a, EngineState>,
        timeout: Duration,
        mut keep_waiting: impl FnMut(&EngineState) -> bool,
    ) -> (MutexGuard<'a, EngineState>, bool) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_cancelled() {
                return (guard, false);
            }
            let now = Instant::now();
            if now >= deadline || !keep_waiting(&guard) {
                return (guard, true);
            }
            condvar.wait_for(&mut guard, WAIT_SLICE.min(deadline - now));
        }
    }
}
