#![forbid(unsafe_code)]

use std::time::Duration;

use rstest::rstest;
use tessera_hls::{HlsError, HlsEvent, PlaybackTelemetry};

use crate::common::*;

#[rstest]
#[timeout(Duration::from_secs(10))]
fn seek_into_segment_seven_skips_everything_buffered(_tracing_setup: ()) {
    let harness = Harness::new("seek", &LADDER[..1]);
    harness.playlist(0, 0..10, 1.0, false);
    let storage = harness.build(fast_options().with_max_buffered_segments(3));
    let mut events = storage.subscribe();
    storage.start().unwrap();

    let (first, _) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
    assert_eq!(first.info().media_sequence, 0);
    // Queue full behind the consumer: 1, 2, 3.
    assert!(
        wait_for_event(&mut events, Duration::from_secs(5), |e| matches!(
            e,
            HlsEvent::SegmentComplete {
                media_sequence: 3,
                ..
            }
        ))
        .is_some()
    );

    assert_eq!(storage.seek_time(7.25).unwrap(), 7.0);

    let served: Vec<u64> = std::iter::from_fn(|| next_read(&storage, buffered(4)))
        .map(|(reader, bytes)| {
            let seq = reader.info().media_sequence;
            assert_eq!(bytes, body("seek", 0, seq));
            seq
        })
        .collect();
    assert_eq!(served, vec![7, 8, 9]);
    for skipped in 4..7 {
        assert_eq!(
            harness.downloader.request_count(&segment_url("seek", 0, skipped)),
            0,
            "segment {skipped} should never be fetched"
        );
    }
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn seek_past_the_end_keeps_playing_from_where_it_was(_tracing_setup: ()) {
    let harness = Harness::new("past", &LADDER[..1]);
    harness.playlist(0, 0..4, 1.0, false);
    let storage = harness.build(fast_options());
    storage.start().unwrap();

    let (first, _) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
    assert_eq!(first.info().media_sequence, 0);

    assert!(matches!(
        storage.seek_time(42.0),
        Err(HlsError::SeekOutOfRange(t)) if t == 42.0
    ));
    let (next, _) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
    assert_eq!(next.info().media_sequence, 1);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn backward_seek_refetches_played_segments(_tracing_setup: ()) {
    let harness = Harness::new("back", &LADDER[..1]);
    harness.playlist(0, 0..3, 1.0, false);
    let storage = harness.build(fast_options());
    storage.start().unwrap();

    while next_read(&storage, PlaybackTelemetry::default()).is_some() {}
    assert_eq!(storage.seek_time(0.0).unwrap(), 0.0);

    let (reader, _) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
    assert_eq!(reader.info().media_sequence, 0);
    assert_eq!(
        harness.downloader.request_count(&segment_url("back", 0, 0)),
        2
    );
}
