#![forbid(unsafe_code)]

use std::time::Duration;

use kanal::ReceiveErrorTimeout;
use tessera_storage::SegmentReader;
use tokio_util::sync::CancellationToken;

use crate::{HlsError, HlsResult, shared::WAIT_SLICE};

/// Answer to a next-segment request.
#[derive(Debug)]
pub enum NextSegment {
    Reader(SegmentReader),
    /// On-demand content is exhausted; a seek revives the stream.
    EndOfStream,
}

impl NextSegment {
    pub fn into_reader(self) -> Option<SegmentReader> {
        match self {
            Self::Reader(reader) => Some(reader),
            Self::EndOfStream => None,
        }
    }
}

pub(crate) type Reply = kanal::Sender<HlsResult<NextSegment>>;

/// Pending answer to [`SegmentStorage::get_next_segment_reader`](crate::SegmentStorage::get_next_segment_reader).
///
/// Resolves once a reader is published, the stream ends, a newer request
/// supersedes this one, or the storage shuts down.
#[derive(Debug)]
pub struct SegmentTicket {
    rx: kanal::Receiver<HlsResult<NextSegment>>,
    cancel: CancellationToken,
}

impl SegmentTicket {
    pub(crate) fn channel(cancel: CancellationToken) -> (Reply, Self) {
        let (tx, rx) = kanal::bounded(1);
        (tx, Self { rx, cancel })
    }

    /// Block until the request resolves or the storage is cancelled.
    pub fn wait(self) -> HlsResult<NextSegment> {
        loop {
            if let Some(answer) = self.wait_timeout(WAIT_SLICE)? {
                return Ok(answer);
            }
            if self.cancel.is_cancelled() {
                return self.try_get()?.ok_or(HlsError::Cancelled);
            }
        }
    }

    /// Block for at most `timeout`; `Ok(None)` when still unresolved.
    pub fn wait_timeout(&self, timeout: Duration) -> HlsResult<Option<NextSegment>> {
        match self.rx.recv_timeout(timeout) {
            Ok(answer) => answer.map(Some),
            Err(ReceiveErrorTimeout::Timeout) => Ok(None),
            Err(_) => Err(self.closed()),
        }
    }

    /// Answer if already resolved.
    pub fn try_get(&self) -> HlsResult<Option<NextSegment>> {
        match self.rx.try_recv() {
            Ok(Some(answer)) => answer.map(Some),
            Ok(None) => Ok(None),
            Err(_) => Err(self.closed()),
        }
    }

    fn closed(&self) -> HlsError {
        if self.cancel.is_cancelled() {
            HlsError::Cancelled
        } else {
            HlsError::Closed
        }
    }
}
