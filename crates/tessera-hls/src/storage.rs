#![forbid(unsafe_code)]

use std::{sync::Arc, thread::JoinHandle, time::Duration};

use parking_lot::Mutex;
use tessera_abr::PlaybackTelemetry;
use tessera_playlist::Variant;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    Downloader, HlsError, HlsEvent, HlsOptions, HlsResult, PlaylistParser,
    download::DownloadWorker,
    reload::{ReloadWorker, SharedParser},
    shared::Shared,
    ticket::{NextSegment, SegmentTicket},
};

/// Segment pipeline of one stream.
///
/// Owns one reload thread per variant and one download thread. The consumer
/// asks for readers with [`get_next_segment_reader`](Self::get_next_segment_reader),
/// reports playback telemetry with each request and reads the returned
/// [`SegmentReader`](tessera_storage::SegmentReader)s to their end.
///
/// Dropping the storage shuts it down and joins its threads.
pub struct SegmentStorage {
    shared: Arc<Shared>,
    downloader: Arc<dyn Downloader>,
    parser: SharedParser,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SegmentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStorage")
            .field("variants", &self.shared.variants.len())
            .field("threads", &self.handles.lock().len())
            .field("cancelled", &self.shared.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SegmentStorage {
    pub fn new(
        variants: Vec<Variant>,
        downloader: Arc<dyn Downloader>,
        parser: Arc<dyn PlaylistParser + Send + Sync>,
        options: HlsOptions,
    ) -> HlsResult<Self> {
        if variants.is_empty() {
            return Err(HlsError::NoVariants);
        }
        let initial = options.abr.initial_variant();
        if initial >= variants.len() {
            return Err(HlsError::UnknownVariant(initial));
        }

        let cancel = options
            .cancel
            .as_ref()
            .map(|parent| parent.child_token())
            .unwrap_or_default();
        Ok(Self {
            shared: Arc::new(Shared::new(variants, options, cancel)),
            downloader,
            parser,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the reload and download threads. Calling it again is a no-op.
    pub fn start(&self) -> HlsResult<()> {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return Ok(());
        }
        if self.shared.cancel.is_cancelled() {
            return Err(HlsError::Cancelled);
        }

        for variant in 0..self.shared.variants.len() {
            let worker = ReloadWorker::new(
                self.shared.clone(),
                variant,
                self.downloader.clone(),
                self.parser.clone(),
            );
            handles.push(worker.spawn()?);
        }
        handles.push(DownloadWorker::new(self.shared.clone(), self.downloader.clone()).spawn()?);

        debug!(
            variants = self.shared.variants.len(),
            "segment storage: started"
        );
        Ok(())
    }

    /// Block until the first playlist merged segments into the timeline.
    /// Returns `false` on timeout or shutdown.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let state = self.shared.state.lock();
        let (state, alive) =
            self.shared
                .wait_while(&self.shared.ready, state, timeout, |s| s.timeline.is_empty());
        alive && !state.timeline.is_empty()
    }

    /// Position the pointer at the playback start (the first segment, or a
    /// few segments behind the live edge) and let downloading begin.
    ///
    /// Returns the start time, `None` while no playlist is loaded. Once
    /// playback started the pointer is left alone. The first
    /// [`get_next_segment_reader`](Self::get_next_segment_reader) call starts
    /// playback the same way.
    pub fn start_segment(&self) -> Option<Duration> {
        let mut state = self.shared.state.lock();
        if !state.ensure_started() {
            return None;
        }
        self.shared.work.notify_all();
        state.start_time
    }

    /// `variant` can serve the position under the pointer now.
    pub fn has_download_item(&self, variant: usize) -> bool {
        self.shared.state.lock().timeline.has_download_item(variant)
    }

    /// `variant` can serve the position under the pointer now or after a
    /// future reload.
    pub fn will_have_download_item(&self, variant: usize) -> bool {
        self.shared
            .state
            .lock()
            .timeline
            .will_have_download_item(variant)
    }

    /// Request the reader of the next segment.
    ///
    /// `telemetry` feeds the ABR policy's next decision. The ticket resolves
    /// at once when a reader is queued; otherwise it waits for the download
    /// thread. A newer request supersedes an unanswered older one, which then
    /// resolves to [`HlsError::Superseded`].
    pub fn get_next_segment_reader(&self, telemetry: PlaybackTelemetry) -> SegmentTicket {
        let (reply, ticket) = SegmentTicket::channel(self.shared.cancel.clone());
        let mut state = self.shared.state.lock();
        // Checked under the lock: the download thread fails the pending
        // request under the same lock once it observes cancellation.
        if self.shared.cancel.is_cancelled() {
            let _ = reply.send(Err(HlsError::Cancelled));
            return ticket;
        }
        state.telemetry = telemetry;
        state.ensure_started();
        if let Some(reader) = state.queue.pop_front() {
            let _ = reply.send(Ok(NextSegment::Reader(reader)));
        } else if state.is_exhausted() {
            let _ = reply.send(Ok(NextSegment::EndOfStream));
        } else if let Some(previous) = state.pending.replace(reply) {
            debug!("segment storage: request superseded");
            let _ = previous.send(Err(HlsError::Superseded));
        }
        self.shared.work.notify_all();
        ticket
    }

    /// Reposition playback at `seconds`.
    ///
    /// The pointer moves to the segment containing `seconds`, queued readers
    /// are discarded and a reader still being downloaded fails. Returns the
    /// start of that segment; a time no segment covers leaves everything
    /// untouched and returns [`HlsError::SeekOutOfRange`].
    pub fn seek_time(&self, seconds: f64) -> HlsResult<f64> {
        let requested =
            Duration::try_from_secs_f64(seconds).map_err(|_| HlsError::SeekOutOfRange(seconds))?;

        let mut state = self.shared.state.lock();
        let position = state
            .timeline
            .seek(requested)
            .ok_or(HlsError::SeekOutOfRange(seconds))?;
        let epoch = self.shared.bump_epoch();
        state.started = true;
        state.end_announced = false;
        let discarded = state.discard_readers("discarded by seek");
        self.shared.work.notify_all();
        drop(state);

        debug!(
            requested_ms = requested.as_millis() as u64,
            position_ms = position.as_millis() as u64,
            discarded,
            epoch,
            "segment storage: seek"
        );
        self.shared.events.emit_seek(requested, position);
        Ok(position.as_secs_f64())
    }

    /// End of the timeline in seconds.
    pub fn get_total_duration(&self) -> f64 {
        self.shared
            .state
            .lock()
            .timeline
            .total_duration()
            .as_secs_f64()
    }

    pub fn is_live(&self) -> bool {
        self.shared.state.lock().timeline.is_live()
    }

    /// Variant of the most recently started segment.
    pub fn active_variant(&self) -> Option<usize> {
        self.shared.state.lock().active_variant
    }

    pub fn variants(&self) -> &[Variant] {
        &self.shared.variants
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HlsEvent> {
        self.shared.events.subscribe()
    }

    /// Cancel every thread and blocked read, then join the threads.
    pub fn shutdown(&self) {
        if !self.shared.cancel.is_cancelled() {
            debug!("segment storage: shutdown");
        }
        self.shared.cancel.cancel();
        self.shared.state.lock().fail_pending(HlsError::Cancelled);
        self.shared.wake_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let name = handle.thread().name().map(str::to_string);
            if handle.join().is_err() {
                warn!(thread = ?name, "segment storage: thread panicked");
            }
        }
    }
}

impl Drop for SegmentStorage {
    fn drop(&mut self) {
        self.shutdown();
    }
}
