//! In-memory collaborators for tests.
//!
//! `Downloader` streams through a `&mut dyn FnMut` callback and has a
//! supertrait, which `#[automock]` cannot express usefully: expectations
//! would have to drive the callback themselves. [`FakeDownloader`] serves
//! registered resources instead, in fixed-size chunks with an optional delay,
//! and can be told to fail a URL a number of times.
//!
//! [`FakePlaylistParser`] ignores the fetched bytes and returns whatever
//! playlist the test registered for the variant, so live reloads are
//! simulated by replacing it.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tessera_abr::{BandwidthEstimator, BandwidthMeter};
use tessera_playlist::MediaPlaylist;
use url::Url;

use crate::{ChunkControl, Downloader, HlsError, HlsResult, PlaylistParser};

/// Transport serving resources from memory.
#[derive(Debug)]
pub struct FakeDownloader {
    resources: Mutex<HashMap<Url, Bytes>>,
    failures: Mutex<HashMap<Url, usize>>,
    requests: Mutex<Vec<Url>>,
    chunk_size: usize,
    chunk_delay: Duration,
    meter: BandwidthMeter,
}

impl Default for FakeDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            chunk_size: 4096,
            chunk_delay: Duration::ZERO,
            meter: BandwidthMeter::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep before every chunk, simulating a slow link.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Bandwidth reported before the first sample.
    pub fn with_initial_bandwidth(mut self, bps: u64) -> Self {
        self.meter = BandwidthMeter::new(bps);
        self
    }

    pub fn add_resource(&self, url: Url, data: impl Into<Bytes>) {
        self.resources.lock().insert(url, data.into());
    }

    pub fn remove_resource(&self, url: &Url) {
        self.resources.lock().remove(url);
    }

    /// Fail the next `times` requests of `url`.
    pub fn fail_next(&self, url: Url, times: usize) {
        self.failures.lock().insert(url, times);
    }

    /// Every requested URL, in order.
    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &Url) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }

    fn fetch(&self, url: &Url) -> HlsResult<Bytes> {
        self.requests.lock().push(url.clone());

        if let Some(remaining) = self.failures.lock().get_mut(url).filter(|r| **r > 0) {
            *remaining -= 1;
            return Err(HlsError::Fetch(format!("injected failure: {url}")));
        }

        self.resources
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| HlsError::Fetch(format!("404 Not Found: {url}")))
    }
}

impl BandwidthEstimator for FakeDownloader {
    fn average_bandwidth(&self) -> u64 {
        self.meter.average_bandwidth()
    }

    fn current_bandwidth(&self) -> u64 {
        self.meter.current_bandwidth()
    }

    fn record_bandwidth(&self, bps: u64) {
        self.meter.record_bandwidth(bps);
    }
}

impl Downloader for FakeDownloader {
    fn download(&self, url: &Url) -> HlsResult<Bytes> {
        self.fetch(url)
    }

    fn download_range(
        &self,
        url: &Url,
        byte_offset: u64,
        byte_length: u64,
        on_chunk: &mut dyn FnMut(&[u8]) -> ChunkControl,
    ) -> HlsResult<u64> {
        let data = self.fetch(url)?;
        let start = usize::try_from(byte_offset)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let end = match byte_length {
            0 => data.len(),
            len => start
                .saturating_add(usize::try_from(len).unwrap_or(usize::MAX))
                .min(data.len()),
        };

        let mut delivered = 0u64;
        for chunk in data[start..end].chunks(self.chunk_size) {
            if !self.chunk_delay.is_zero() {
                std::thread::sleep(self.chunk_delay);
            }
            if on_chunk(chunk) == ChunkControl::Abort {
                break;
            }
            delivered += chunk.len() as u64;
        }
        Ok(delivered)
    }
}

/// Parser returning registered playlists.
#[derive(Debug, Default)]
pub struct FakePlaylistParser {
    playlists: Mutex<HashMap<usize, MediaPlaylist>>,
    calls: Mutex<HashMap<usize, usize>>,
}

impl FakePlaylistParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Playlist returned for `variant` from now on.
    pub fn set(&self, variant: usize, playlist: MediaPlaylist) {
        self.playlists.lock().insert(variant, playlist);
    }

    /// Number of parses of `variant` so far.
    pub fn calls(&self, variant: usize) -> usize {
        self.calls.lock().get(&variant).copied().unwrap_or(0)
    }
}

impl PlaylistParser for FakePlaylistParser {
    fn parse(&self, variant: usize, _data: &[u8]) -> HlsResult<MediaPlaylist> {
        *self.calls.lock().entry(variant).or_insert(0) += 1;
        self.playlists
            .lock()
            .get(&variant)
            .cloned()
            .ok_or_else(|| HlsError::PlaylistParse(format!("no playlist for variant {variant}")))
    }
}
