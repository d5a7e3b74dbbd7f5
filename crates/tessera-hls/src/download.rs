#![forbid(unsafe_code)]

//! The download thread.
//!
//! One loop per storage: wait until the queue has room and the pointer is
//! servable, let the ABR policy pick a variant, stream the segment through an
//! optional AES-128-CBC decryptor into a freshly published [`SegmentReader`],
//! then advance the pointer and feed the outcome back into the policy.

use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use tessera_abr::{AbrDecision, AbrPolicy, Action, PlaybackTelemetry, Stage};
use tessera_drm::{ChunkDecryptor, DrmError, KeyCache};
use tessera_playlist::{DownloadSegment, Segment, sequence_iv};
use tessera_storage::{ReaderOptions, SegmentInfo, SegmentReader};
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    ChunkControl, Downloader, HlsError, HlsResult,
    shared::{EngineState, Shared, WAIT_SLICE},
};

/// Position the download loop works on, captured under the lock.
struct Job {
    epoch: u64,
    entry: DownloadSegment,
    candidates: Vec<u64>,
    telemetry: PlaybackTelemetry,
    active: Option<usize>,
}

/// CBC chain state left by the previous encrypted segment.
#[derive(Clone, Debug)]
struct ChainLink {
    epoch: u64,
    media_sequence: u64,
    key_uri: Url,
    next_iv: [u8; 16],
}

/// How a segment transfer ended.
enum Transfer {
    Complete { bytes: u64, next_iv: Option<[u8; 16]> },
    Superseded,
    Cancelled,
    Failed(HlsError),
}

pub(crate) struct DownloadWorker {
    shared: Arc<Shared>,
    downloader: Arc<dyn Downloader>,
    policy: AbrPolicy,
    keys: KeyCache,
    chain: Option<ChainLink>,
    previous_bps: Option<u64>,
    last_download: Duration,
}

impl DownloadWorker {
    pub fn new(shared: Arc<Shared>, downloader: Arc<dyn Downloader>) -> Self {
        let policy = AbrPolicy::new(shared.options.abr.clone());
        let keys = KeyCache::new(shared.options.keys.key_processor.clone());
        Self {
            shared,
            downloader,
            policy,
            keys,
            chain: None,
            previous_bps: None,
            last_download: Duration::ZERO,
        }
    }

    pub fn spawn(self) -> HlsResult<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("tessera-download".to_string())
            .spawn(move || self.run())
            .map_err(|e| HlsError::Fetch(format!("failed to spawn download thread: {e}")))
    }

    fn run(mut self) {
        debug!("download: started");
        while let Some(job) = self.next_job() {
            self.process(job);
        }
        self.shared.state.lock().fail_pending(HlsError::Cancelled);
        debug!("download: exited");
    }

    /// Block until a position can be downloaded. `None` once cancelled.
    fn next_job(&self) -> Option<Job> {
        let shared = &self.shared;
        let capacity = shared.options.max_buffered_segments.max(1);
        let mut state = shared.state.lock();

        loop {
            if shared.cancel.is_cancelled() {
                return None;
            }

            // Playback starts with the first consumer request or `start_segment`.
            let started = state.started || (state.pending.is_some() && state.ensure_started());
            if started {
                self.skip_unservable(&mut state);
                if state.is_exhausted() {
                    if state.answer_end_of_stream() {
                        debug!("download: end of stream");
                        shared.events.emit_end_of_stream();
                    }
                } else if state.queue.len() < capacity && state.timeline.is_servable() {
                    if let Some(entry) = state.timeline.current().cloned() {
                        return Some(Job {
                            epoch: shared.epoch(),
                            entry,
                            candidates: state.candidates(&shared.variants),
                            telemetry: state.telemetry,
                            active: state.active_variant,
                        });
                    }
                }
            }

            shared.work.wait_for(&mut state, WAIT_SLICE);
        }
    }

    /// Degenerate guard: step over positions no variant will ever serve.
    fn skip_unservable(&self, state: &mut EngineState) {
        let from = state.timeline.position();
        let skipped = state.timeline.skip_unservable();
        for index in from..from + skipped {
            if let Some(entry) = state.timeline.get(index) {
                self.shared.events.emit_segment_skipped(entry.media_sequence);
            }
        }
    }

    fn process(&mut self, job: Job) {
        let stage = Stage::from_estimator(&*self.downloader, job.telemetry)
            .with_previous(self.previous_bps)
            .with_last_download(self.last_download);
        let mut decision = self.policy.choose(&stage, &job.candidates);

        let Some(variant) = viable_variant(&job.entry, decision.variant) else {
            // The slot vanished between the wait and now; re-evaluate.
            return;
        };
        if variant != decision.variant {
            debug!(
                chosen = decision.variant,
                replacement = variant,
                media_sequence = job.entry.media_sequence,
                "download: chosen variant cannot serve position"
            );
            decision.variant = variant;
            decision.action = Action(job.candidates.get(variant).copied().unwrap_or(0));
        }
        if job.active != Some(variant) {
            self.shared
                .events
                .emit_variant_selected(job.active, variant, decision.reason);
        }

        let Some(segment) = job.entry.slot(variant).cloned() else {
            return;
        };
        let bandwidth = job.candidates.get(variant).copied().unwrap_or(0);
        let reader = SegmentReader::new(
            SegmentInfo {
                variant,
                media_sequence: segment.media_sequence,
                time_in_playlist: job.entry.time_in_playlist,
                duration: segment.duration,
                discontinuity: segment.discontinuity,
                bandwidth,
            },
            ReaderOptions::default()
                .with_read_timeout(self.shared.options.read_timeout)
                .with_cancel(self.shared.cancel.clone()),
        );

        {
            let mut state = self.shared.state.lock();
            if self.shared.epoch() != job.epoch {
                trace!("download: position moved before start");
                return;
            }
            state.active_variant = Some(variant);
            state.in_flight = Some(reader.clone());
            state.publish(reader.clone());
        }

        self.shared
            .events
            .emit_segment_start(variant, segment.media_sequence, segment.byte_offset);
        debug!(
            variant,
            media_sequence = segment.media_sequence,
            url = %segment.url,
            encrypted = segment.encrypted(),
            "download: segment start"
        );

        let started = Instant::now();
        let transfer = self.transfer(&segment, &reader, job.epoch);
        let elapsed = started.elapsed();

        match transfer {
            Transfer::Complete { bytes, next_iv } => {
                self.complete(&job, &decision, &segment, bytes, elapsed, next_iv);
            }
            Transfer::Superseded => {
                trace!(
                    media_sequence = segment.media_sequence,
                    "download: discarded by seek"
                );
                reader.fail("discarded by seek");
            }
            Transfer::Cancelled => reader.fail("cancelled"),
            Transfer::Failed(e) => self.fail(&job, variant, &segment, &reader, &e),
        }
    }

    /// Stream the segment into `reader`, decrypting on the fly.
    fn transfer(&mut self, segment: &Segment, reader: &SegmentReader, epoch: u64) -> Transfer {
        let mut decryptor = match self.decryptor(segment, epoch) {
            Ok(decryptor) => decryptor,
            Err(e) => return Transfer::Failed(e),
        };

        let shared = &self.shared;
        let mut error: Option<HlsError> = None;
        let mut superseded = false;
        let mut on_chunk = |chunk: &[u8]| {
            if shared.cancel.is_cancelled() {
                return ChunkControl::Abort;
            }
            if shared.epoch() != epoch {
                superseded = true;
                return ChunkControl::Abort;
            }
            let written = match decryptor.as_mut() {
                Some(decryptor) => decryptor
                    .update(chunk)
                    .map_err(HlsError::from)
                    .and_then(|plain| reader.write(&plain).map_err(HlsError::from)),
                None => reader.write(chunk).map_err(HlsError::from),
            };
            match written {
                Ok(()) => ChunkControl::Continue,
                Err(e) => {
                    error = Some(e);
                    ChunkControl::Abort
                }
            }
        };

        let result = self.downloader.download_range(
            &segment.url,
            segment.byte_offset,
            segment.byte_length,
            &mut on_chunk,
        );

        if shared.cancel.is_cancelled() {
            return Transfer::Cancelled;
        }
        if superseded || shared.epoch() != epoch {
            return Transfer::Superseded;
        }
        if let Some(e) = error {
            return Transfer::Failed(e);
        }
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => return Transfer::Failed(e),
        };

        let next_iv = match decryptor.as_mut() {
            Some(decryptor) => {
                match decryptor
                    .finish()
                    .map_err(HlsError::from)
                    .and_then(|tail| reader.write(&tail).map_err(HlsError::from))
                {
                    Ok(()) => Some(decryptor.next_iv()),
                    Err(e) => return Transfer::Failed(e),
                }
            }
            None => None,
        };

        if reader.is_empty() {
            return Transfer::Failed(HlsError::Fetch(format!(
                "segment {} is empty",
                segment.media_sequence
            )));
        }
        reader.end();
        Transfer::Complete { bytes, next_iv }
    }

    /// Decryptor for an encrypted segment, `None` for clear ones.
    fn decryptor(&mut self, segment: &Segment, epoch: u64) -> HlsResult<Option<ChunkDecryptor>> {
        let Some(ref key) = segment.key else {
            return Ok(None);
        };

        let cached = self.keys.get(&key.uri).is_some();
        let downloader = &self.downloader;
        let key_options = &self.shared.options.keys;
        let result = self.keys.get_or_fetch(&key.uri, key.iv, |url| {
            downloader
                .download(&key_options.fetch_url(url))
                .map_err(|e| DrmError::KeyFetch(e.to_string()))
        });
        self.shared
            .events
            .emit_key_fetch(key.uri.as_str(), result.is_ok(), cached);
        let aes_key = result?;

        let iv = match key.iv {
            Some(iv) => iv,
            None => self
                .chained_iv(segment, epoch)
                .unwrap_or_else(|| sequence_iv(segment.media_sequence)),
        };
        trace!(
            media_sequence = segment.media_sequence,
            key = %key.uri,
            cached,
            "download: decrypting segment"
        );
        Ok(Some(ChunkDecryptor::new(aes_key, iv)))
    }

    /// IV continuing the previous segment's CBC chain, when enabled and the
    /// previous segment directly precedes `segment` under the same key.
    fn chained_iv(&self, segment: &Segment, epoch: u64) -> Option<[u8; 16]> {
        if !self.shared.options.chain_iv {
            return None;
        }
        let link = self.chain.as_ref()?;
        let key = segment.key.as_ref()?;
        let adjacent = link.epoch == epoch && link.media_sequence + 1 == segment.media_sequence;
        (adjacent && link.key_uri == key.uri).then_some(link.next_iv)
    }

    fn complete(
        &mut self,
        job: &Job,
        decision: &AbrDecision,
        segment: &Segment,
        bytes: u64,
        elapsed: Duration,
        next_iv: Option<[u8; 16]>,
    ) {
        let telemetry = {
            let mut state = self.shared.state.lock();
            if self.shared.epoch() != job.epoch {
                return;
            }
            state.in_flight = None;
            state.timeline.advance();
            self.shared.work.notify_all();
            state.telemetry
        };

        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            let bps = (bytes as f64 * 8.0 / secs).round() as u64;
            self.downloader.record_bandwidth(bps);
        }
        let after = Stage::from_estimator(&*self.downloader, telemetry)
            .with_last_download(elapsed);
        let reward = self.policy.update(decision, &after, &job.candidates);

        self.chain = match (&segment.key, next_iv) {
            (Some(key), Some(next_iv)) => Some(ChainLink {
                epoch: job.epoch,
                media_sequence: segment.media_sequence,
                key_uri: key.uri.clone(),
                next_iv,
            }),
            _ => None,
        };
        self.previous_bps = job.candidates.get(decision.variant).copied();
        self.last_download = elapsed;

        self.shared.events.emit_segment_complete(
            decision.variant,
            segment.media_sequence,
            bytes,
            elapsed,
        );
        debug!(
            variant = decision.variant,
            media_sequence = segment.media_sequence,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            reward,
            "download: segment complete"
        );
    }

    /// Withdraw the reader and retry the same position after a pause.
    fn fail(
        &mut self,
        job: &Job,
        variant: usize,
        segment: &Segment,
        reader: &SegmentReader,
        error: &HlsError,
    ) {
        warn!(
            variant,
            media_sequence = segment.media_sequence,
            error = %error,
            "download: segment failed, will retry"
        );
        self.shared
            .events
            .emit_segment_failed(variant, segment.media_sequence, &error.to_string());
        self.chain = None;

        let mut state = self.shared.state.lock();
        if !state.unqueue(reader) {
            reader.fail(error.to_string());
        }
        state.in_flight = None;

        let epoch = job.epoch;
        let _ = self.shared.wait_while(
            &self.shared.work,
            state,
            self.shared.options.retry_delay,
            |_| self.shared.epoch() == epoch,
        );
    }
}

/// `chosen` when it can serve `entry`, else the nearest variant below it
/// that can, else the nearest above.
fn viable_variant(entry: &DownloadSegment, chosen: usize) -> Option<usize> {
    let serves = |variant: usize| entry.slot(variant).is_some_and(|s| s.valid);
    if serves(chosen) {
        return Some(chosen);
    }
    (0..chosen)
        .rev()
        .find(|&v| serves(v))
        .or_else(|| (chosen + 1..entry.variant_count()).find(|&v| serves(v)))
}
