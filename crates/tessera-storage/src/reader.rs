#![forbid(unsafe_code)]

//! Single-segment byte conduit.
//!
//! `SegmentReader` holds the decrypted bytes of one segment in a `Vec<u8>`
//! behind a `Mutex`. The producer appends and finally calls `end()`; readers
//! block on a `Condvar` until enough bytes exist at their position, the
//! segment ends, the reader fails, the token is cancelled or the absolute
//! deadline passes.

use std::{
    ops::Range,
    sync::Arc,
    time::{Duration, Instant},
};

use derive_setters::Setters;
use parking_lot::{Condvar, Mutex};
use rangemap::RangeSet;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{StorageError, StorageResult};

/// Upper bound for a single blocking `read`.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Periodic wake while waiting, so cancellation is observed even without a
/// notification.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Where a segment sits in the stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Variant index that served the segment.
    pub variant: usize,
    pub media_sequence: u64,
    pub time_in_playlist: Duration,
    pub duration: Duration,
    /// A timestamp/format discontinuity precedes this segment.
    pub discontinuity: bool,
    /// Advertised bandwidth of the serving variant.
    pub bandwidth: u64,
}

/// Options for [`SegmentReader`].
#[derive(Clone, Debug, Setters)]
#[setters(prefix = "with_")]
pub struct ReaderOptions {
    /// Absolute limit for one blocking `read`.
    pub read_timeout: Duration,
    /// Cancels every blocked read.
    pub cancel: CancellationToken,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Default)]
struct ReaderState {
    buf: Vec<u8>,
    finished: bool,
    /// Byte ranges handed out to a reader at least once.
    consumed: RangeSet<u64>,
    failed: Option<String>,
}

struct ReaderInner {
    state: Mutex<ReaderState>,
    condvar: Condvar,
    cancel: CancellationToken,
    read_timeout: Duration,
    info: SegmentInfo,
}

/// Bytes of one in-flight segment, shared by one producer and any number of
/// readers. Cloning yields another handle to the same segment.
#[derive(Clone)]
pub struct SegmentReader {
    inner: Arc<ReaderInner>,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SegmentReader")
            .field("media_sequence", &self.inner.info.media_sequence)
            .field("variant", &self.inner.info.variant)
            .field("len", &state.buf.len())
            .field("finished", &state.finished)
            .field("failed", &state.failed.is_some())
            .finish()
    }
}

impl SegmentReader {
    pub fn new(info: SegmentInfo, options: ReaderOptions) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                state: Mutex::new(ReaderState::default()),
                condvar: Condvar::new(),
                cancel: options.cancel,
                read_timeout: options.read_timeout,
                info,
            }),
        }
    }

    /// Finished reader pre-filled with `data`.
    pub fn from_bytes(info: SegmentInfo, data: &[u8], options: ReaderOptions) -> Self {
        let reader = Self::new(info, options);
        {
            let mut state = reader.inner.state.lock();
            state.buf.extend_from_slice(data);
            state.finished = true;
        }
        reader
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.inner.info
    }

    /// Append bytes and wake blocked readers.
    pub fn write(&self, data: &[u8]) -> StorageResult<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let mut state = self.inner.state.lock();
        if let Some(ref reason) = state.failed {
            return Err(StorageError::Failed(reason.clone()));
        }
        if state.finished {
            return Err(StorageError::Finished);
        }
        if data.is_empty() {
            return Ok(());
        }

        state.buf.extend_from_slice(data);
        trace!(
            media_sequence = self.inner.info.media_sequence,
            written = data.len(),
            len = state.buf.len(),
            "segment_reader::write"
        );
        self.inner.condvar.notify_all();
        Ok(())
    }

    /// No more bytes will arrive.
    pub fn end(&self) {
        let mut state = self.inner.state.lock();
        state.finished = true;
        self.inner.condvar.notify_all();
    }

    /// Abort the segment; pending and future reads return
    /// [`StorageError::Failed`].
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.inner.state.lock();
        state.failed = Some(reason.into());
        state.finished = true;
        self.inner.condvar.notify_all();
    }

    /// Copy bytes starting at `pos` into `dst`.
    ///
    /// Returns at once when at least `min_size` bytes (capped at `dst.len()`)
    /// are available at `pos`. Otherwise blocks until they are, the segment
    /// ends, or the read timeout elapses, and then returns whatever is
    /// available, possibly nothing.
    pub fn read(&self, pos: u64, dst: &mut [u8], min_size: usize) -> StorageResult<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        let want = min_size.min(dst.len());
        let deadline = Instant::now() + self.inner.read_timeout;
        let mut state = self.inner.state.lock();

        loop {
            if self.inner.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            if let Some(ref reason) = state.failed {
                return Err(StorageError::Failed(reason.clone()));
            }

            let available = available_at(&state.buf, pos);
            if available >= want || state.finished {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                trace!(
                    media_sequence = self.inner.info.media_sequence,
                    pos,
                    available,
                    want,
                    "segment_reader::read timed out"
                );
                break;
            }
            self.inner
                .condvar
                .wait_for(&mut state, WAIT_SLICE.min(deadline - now));
        }

        let available = available_at(&state.buf, pos);
        let count = dst.len().min(available);
        if count > 0 {
            // `available > 0` implies `pos` fits in the buffer.
            let start = pos as usize;
            dst[..count].copy_from_slice(&state.buf[start..start + count]);
            state.consumed.insert(pos..pos + count as u64);
        }
        Ok(count)
    }

    /// Both handles refer to the same segment.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.inner.state.lock().buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().buf.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    pub fn is_failed(&self) -> bool {
        self.inner.state.lock().failed.is_some()
    }

    /// Finished and every written byte has been read at least once.
    pub fn overwritable(&self) -> bool {
        let state = self.inner.state.lock();
        state.finished
            && state.failed.is_none()
            && fully_covered(&state.consumed, &(0..state.buf.len() as u64))
    }
}

fn fully_covered(ranges: &RangeSet<u64>, range: &Range<u64>) -> bool {
    range.is_empty() || ranges.gaps(range).next().is_none()
}

fn available_at(buf: &[u8], pos: u64) -> usize {
    usize::try_from(pos)
        .ok()
        .and_then(|pos| buf.len().checked_sub(pos))
        .unwrap_or(0)
}
