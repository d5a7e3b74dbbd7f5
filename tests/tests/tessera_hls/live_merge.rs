#![forbid(unsafe_code)]

use std::time::Duration;

use rstest::rstest;
use tessera_abr::{AbrMode, AbrOptions};
use tessera_hls::{HlsEvent, PlaybackTelemetry};

use crate::common::*;

const SEGMENT: Duration = Duration::from_millis(200);

#[rstest]
#[timeout(Duration::from_secs(10))]
fn overlapping_reload_extends_timeline_without_duplicates(_tracing_setup: ()) {
    let harness = Harness::new("live", &LADDER[..1]);
    harness.playlist(0, 1..4, 0.2, true);
    let storage = harness.build(fast_options());
    let mut events = storage.subscribe();
    storage.start().unwrap();
    wait_all_loaded(&mut events, 1);

    let mut served = Vec::new();
    for _ in 0..3 {
        let (reader, _) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
        served.push(reader.info().clone());
    }

    harness.playlist(0, 2..6, 0.2, true);
    assert!(
        wait_for_event(&mut events, Duration::from_secs(5), |e| matches!(
            e,
            HlsEvent::PlaylistReloaded { added: 2, .. }
        ))
        .is_some()
    );
    for _ in 0..2 {
        let (reader, bytes) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
        assert_eq!(bytes, body("live", 0, reader.info().media_sequence));
        served.push(reader.info().clone());
    }

    let seqs: Vec<u64> = served.iter().map(|i| i.media_sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    for (idx, info) in served.iter().enumerate() {
        assert_eq!(info.time_in_playlist, SEGMENT * idx as u32);
    }
    assert!(
        served
            .windows(2)
            .all(|w| w[0].time_in_playlist < w[1].time_in_playlist)
    );
    assert_eq!(storage.get_total_duration(), (SEGMENT * 5).as_secs_f64());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn lagging_pinned_variant_is_bridged_by_lower_one(_tracing_setup: ()) {
    let harness = Harness::new("lag", &LADDER[..2]);
    harness.playlist(0, 0..4, 0.2, true);
    harness.playlist(1, 0..2, 0.2, true);
    let storage = harness.build(
        fast_options()
            .with_live_start_segments(4)
            .with_abr(AbrOptions::default().with_mode(AbrMode::Manual(1))),
    );
    let mut events = storage.subscribe();
    storage.start().unwrap();
    wait_all_loaded(&mut events, 2);

    let served: Vec<(u64, usize)> = (0..4)
        .map(|_| {
            let (reader, bytes) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
            let info = reader.info();
            assert_eq!(bytes, body("lag", info.variant, info.media_sequence));
            (info.media_sequence, info.variant)
        })
        .collect();
    assert_eq!(served, vec![(0, 1), (1, 1), (2, 0), (3, 0)]);
    // Both playlists are live: later positions may still arrive.
    assert!(storage.will_have_download_item(1));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn ended_live_stream_reports_end(_tracing_setup: ()) {
    let harness = Harness::new("ending", &LADDER[..1]);
    harness.playlist(0, 0..2, 0.2, true);
    let storage = harness.build(fast_options());
    storage.start().unwrap();

    assert!(storage.wait_ready(Duration::from_secs(5)));
    assert!(storage.is_live());
    assert!(next_read(&storage, PlaybackTelemetry::default()).is_some());
    assert!(next_read(&storage, PlaybackTelemetry::default()).is_some());

    harness.playlist(0, 0..3, 0.2, false);
    let (reader, _) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
    assert_eq!(reader.info().media_sequence, 2);
    assert!(next_read(&storage, PlaybackTelemetry::default()).is_none());
    assert!(!storage.is_live());
}
