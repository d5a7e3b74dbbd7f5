//! Several storages running side by side, each with its own threads.

use std::{thread, time::Duration};

use rstest::rstest;
use tessera_hls::{HlsError, PlaybackTelemetry, testing::FakeDownloader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::common::*;

const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

/// Play `name` to its end, returning the served sequence numbers.
fn play(name: &'static str) -> Vec<u64> {
    let harness = Harness::with_downloader(
        name,
        &LADDER,
        FakeDownloader::new().with_chunk_size(512),
    );
    for v in 0..LADDER.len() {
        harness.playlist(v, 0..6, 1.0, false);
    }
    let storage = harness.build(fast_options());
    storage.start().unwrap();

    let mut seqs = Vec::new();
    while let Some((reader, bytes)) = next_read(&storage, buffered(seqs.len() as u64)) {
        let info = reader.info();
        assert_eq!(bytes, body(name, info.variant, info.media_sequence));
        seqs.push(info.media_sequence);
    }
    info!(name, segments = seqs.len(), "instance finished");
    seqs
}

#[rstest]
#[case(2)]
#[case(4)]
#[case(8)]
#[timeout(Duration::from_secs(20))]
fn concurrent_instances_play_independently(_tracing_setup: (), #[case] count: usize) {
    let results: Vec<Vec<u64>> = thread::scope(|s| {
        let handles: Vec<_> = NAMES[..count]
            .iter()
            .map(|&name| s.spawn(move || play(name)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for seqs in results {
        assert_eq!(seqs, (0..6).collect::<Vec<_>>());
    }
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn parent_token_cancels_every_instance(_tracing_setup: ()) {
    let parent = CancellationToken::new();
    // No playlists registered: requests stay pending until cancelled.
    let harnesses: Vec<Harness> = NAMES[..3]
        .iter()
        .map(|&name| Harness::new(name, &LADDER))
        .collect();
    let storages: Vec<_> = harnesses
        .iter()
        .map(|h| {
            let storage = h.build(fast_options().with_cancel(parent.clone()));
            storage.start().unwrap();
            storage
        })
        .collect();
    let tickets: Vec<_> = storages
        .iter()
        .map(|s| s.get_next_segment_reader(PlaybackTelemetry::default()))
        .collect();

    parent.cancel();
    for ticket in tickets {
        assert!(matches!(ticket.wait(), Err(HlsError::Cancelled)));
    }
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn shutting_down_one_instance_leaves_others_running(_tracing_setup: ()) {
    let parent = CancellationToken::new();
    let stopped = Harness::new("stopped", &LADDER[..1]);
    let running = Harness::new("running", &LADDER[..1]);
    stopped.playlist(0, 0..3, 1.0, false);
    running.playlist(0, 0..3, 1.0, false);

    let first = stopped.build(fast_options().with_cancel(parent.clone()));
    let second = running.build(fast_options().with_cancel(parent.clone()));
    first.start().unwrap();
    second.start().unwrap();

    first.shutdown();
    assert!(!parent.is_cancelled());

    let seqs: Vec<u64> = std::iter::from_fn(|| next_read(&second, PlaybackTelemetry::default()))
        .map(|(reader, _)| reader.info().media_sequence)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2]);
}
