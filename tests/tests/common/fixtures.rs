use std::{
    ops::Range,
    sync::Arc,
    time::{Duration, Instant},
};

use rstest::*;
use tessera_hls::{
    HlsEvent, HlsOptions, NextSegment, PlaybackTelemetry, SegmentStorage,
    testing::{FakeDownloader, FakePlaylistParser},
};
use tessera_playlist::{MediaPlaylist, Segment, Variant};
use tessera_storage::{SegmentReader, StorageError};
use tokio::sync::broadcast;
use url::Url;

pub const LADDER: [u64; 3] = [500_000, 1_500_000, 3_000_000];
pub const SEGMENT_BYTES: usize = 2048;

#[fixture]
pub fn tracing_setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::default()
                .add_directive("warn".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

pub fn segment_url(stream: &str, variant: usize, seq: u64) -> Url {
    Url::parse(&format!("https://cdn.example.com/{stream}/v{variant}/{seq}.ts")).unwrap()
}

pub fn body(stream: &str, variant: usize, seq: u64) -> Vec<u8> {
    format!("{stream}:{variant}:{seq}|")
        .into_bytes()
        .into_iter()
        .cycle()
        .take(SEGMENT_BYTES)
        .collect()
}

/// One stream served from memory: a ladder of variants whose playlists are
/// swapped in through the fake parser.
pub struct Harness {
    pub name: &'static str,
    pub downloader: Arc<FakeDownloader>,
    pub parser: Arc<FakePlaylistParser>,
    pub variants: Vec<Variant>,
}

impl Harness {
    pub fn new(name: &'static str, ladder: &[u64]) -> Self {
        Self::with_downloader(name, ladder, FakeDownloader::new())
    }

    pub fn with_downloader(name: &'static str, ladder: &[u64], downloader: FakeDownloader) -> Self {
        let downloader = Arc::new(downloader);
        let variants = ladder
            .iter()
            .enumerate()
            .map(|(v, &bps)| {
                let url =
                    Url::parse(&format!("https://cdn.example.com/{name}/v{v}.m3u8")).unwrap();
                downloader.add_resource(url.clone(), b"#EXTM3U\n".to_vec());
                Variant::new(url, bps)
            })
            .collect();
        Self {
            name,
            downloader,
            parser: Arc::new(FakePlaylistParser::new()),
            variants,
        }
    }

    /// Publish the playlist of `variant` covering `seqs`.
    pub fn playlist(&self, variant: usize, seqs: Range<u64>, segment_secs: f64, live: bool) {
        let duration = Duration::from_secs_f64(segment_secs);
        let bandwidth = self.variants[variant].bandwidth;
        let mut playlist = MediaPlaylist::new(bandwidth, duration, live);
        for seq in seqs {
            let url = segment_url(self.name, variant, seq);
            self.downloader
                .add_resource(url.clone(), body(self.name, variant, seq));
            playlist.segments.push(Segment::new(seq, duration, url));
        }
        self.parser.set(variant, playlist);
    }

    pub fn build(&self, options: HlsOptions) -> SegmentStorage {
        SegmentStorage::new(
            self.variants.clone(),
            self.downloader.clone(),
            self.parser.clone(),
            options,
        )
        .unwrap()
    }
}

pub fn fast_options() -> HlsOptions {
    HlsOptions::default()
        .with_retry_delay(Duration::from_millis(20))
        .with_min_reload_interval(Duration::from_millis(20))
        .with_read_timeout(Duration::from_secs(5))
}

pub fn buffered(secs: u64) -> PlaybackTelemetry {
    PlaybackTelemetry {
        time_in_buffer: Duration::from_secs(secs),
        ..PlaybackTelemetry::default()
    }
}

pub fn read_to_end(reader: &SegmentReader) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 700];
    loop {
        let read = reader.read(out.len() as u64, &mut buf, 1)?;
        if read == 0 && reader.is_finished() {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..read]);
    }
}

/// Next fully read segment, `None` at end of stream.
pub fn next_read(
    storage: &SegmentStorage,
    telemetry: PlaybackTelemetry,
) -> Option<(SegmentReader, Vec<u8>)> {
    loop {
        let reader = match storage.get_next_segment_reader(telemetry).wait() {
            Ok(NextSegment::Reader(reader)) => reader,
            Ok(NextSegment::EndOfStream) => return None,
            Err(e) => panic!("segment request failed: {e}"),
        };
        match read_to_end(&reader) {
            Ok(bytes) => return Some((reader, bytes)),
            Err(StorageError::Failed(_)) => continue,
            Err(e) => panic!("segment read failed: {e}"),
        }
    }
}

pub fn wait_for_event(
    rx: &mut broadcast::Receiver<HlsEvent>,
    timeout: Duration,
    mut matches: impl FnMut(&HlsEvent) -> bool,
) -> Option<HlsEvent> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    None
}

/// Block until every variant of the ladder merged its first playlist.
pub fn wait_all_loaded(rx: &mut broadcast::Receiver<HlsEvent>, variants: usize) {
    let mut loaded = vec![false; variants];
    while loaded.iter().any(|l| !l) {
        match wait_for_event(rx, Duration::from_secs(5), |e| {
            matches!(e, HlsEvent::PlaylistReloaded { .. })
        }) {
            Some(HlsEvent::PlaylistReloaded { variant, .. }) => loaded[variant] = true,
            _ => panic!("playlists not loaded: {loaded:?}"),
        }
    }
}
