#![forbid(unsafe_code)]

use std::time::Duration;

use rstest::rstest;
use tessera_abr::{AbrMode, AbrOptions, AbrReason};
use tessera_hls::{HlsEvent, PlaybackTelemetry, testing::FakeDownloader};

use crate::common::*;

fn greedy() -> AbrOptions {
    AbrOptions::default()
        .with_initial_exploration(0.0)
        .with_min_exploration(0.0)
        .with_seed(11)
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn one_megabit_with_empty_buffer_avoids_top_variant(_tracing_setup: ()) {
    let harness = Harness::with_downloader(
        "abr",
        &LADDER,
        FakeDownloader::new().with_initial_bandwidth(1_000_000),
    );
    for v in 0..LADDER.len() {
        harness.playlist(v, 0..4, 4.0, false);
    }
    let storage = harness.build(fast_options().with_abr(greedy()));
    let mut events = storage.subscribe();
    storage.start().unwrap();
    wait_all_loaded(&mut events, LADDER.len());

    let (reader, bytes) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
    let selected = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, HlsEvent::VariantSelected { .. })
    });

    let (from_variant, to_variant, reason) = match selected {
        Some(HlsEvent::VariantSelected {
            from_variant,
            to_variant,
            reason,
        }) => (from_variant, to_variant, reason),
        other => panic!("no variant selected: {other:?}"),
    };
    assert_eq!(from_variant, None);
    assert_eq!(reason, AbrReason::Exploit);
    assert_ne!(to_variant, 2);
    assert_eq!(reader.info().variant, to_variant);
    assert_eq!(reader.info().bandwidth, LADDER[to_variant]);
    assert_eq!(bytes, body("abr", to_variant, 0));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn pinned_start_variant_is_used_before_any_measurement(_tracing_setup: ()) {
    let harness = Harness::new("pinned", &LADDER);
    for v in 0..LADDER.len() {
        harness.playlist(v, 0..2, 4.0, false);
    }
    let storage =
        harness.build(fast_options().with_abr(greedy().with_mode(AbrMode::Auto(Some(1)))));
    let mut events = storage.subscribe();
    storage.start().unwrap();
    wait_all_loaded(&mut events, LADDER.len());

    let (reader, _) = next_read(&storage, PlaybackTelemetry::default()).unwrap();
    assert_eq!(reader.info().variant, 1);
    assert!(
        wait_for_event(&mut events, Duration::from_secs(2), |e| {
            *e == HlsEvent::VariantSelected {
                from_variant: None,
                to_variant: 1,
                reason: AbrReason::Initial,
            }
        })
        .is_some()
    );
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn every_segment_is_served_once_whatever_the_choices(_tracing_setup: ()) {
    let harness = Harness::new("learn", &LADDER);
    for v in 0..LADDER.len() {
        harness.playlist(v, 0..12, 1.0, false);
    }
    let storage = harness.build(fast_options().with_abr(AbrOptions::default().with_seed(3)));
    let mut events = storage.subscribe();
    storage.start().unwrap();
    wait_all_loaded(&mut events, LADDER.len());

    let mut seqs = Vec::new();
    let mut buffer = 0;
    while let Some((reader, bytes)) = next_read(&storage, buffered(buffer)) {
        let info = reader.info();
        assert_eq!(bytes, body("learn", info.variant, info.media_sequence));
        seqs.push(info.media_sequence);
        buffer = (buffer + 2).min(20);
    }
    assert_eq!(seqs, (0..12).collect::<Vec<_>>());
}
