use rfscope::hal::{SourceConfig, SyntheticGenerator, ToneSpec};
use rfscope::{EventFilter, PipelineConfig, PipelineController, PipelineEvent};
use std::time::Duration;

const FRAMES: u64 = 50;

fn controller() -> PipelineController {
    let source_config = SourceConfig {
        center_frequency_hz: 0.0,
        sample_rate_hz: 128_000.0,
        gain_db: 0.0,
        block_size: 128,
    };
    let source = SyntheticGenerator::new(source_config)
        .with_tone(ToneSpec::new(20_000.0, 0.2))
        .with_noise(1e-3, 7)
        .with_max_blocks(FRAMES);

    let mut config = PipelineConfig::default();
    config.spectrum.sample_rate_hz = 128_000.0;
    config.spectrum.center_frequency_hz = 0.0;
    config.spectrum.block_size = 128;
    PipelineController::new(config, Box::new(source)).unwrap()
}

fn frame_sequences(events: Vec<PipelineEvent>) -> Vec<u64> {
    events
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::Frame(frame) => Some(frame.sequence),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_slow_subscriber_keeps_newest_events() {
    let mut controller = controller();
    let slow = controller.subscribe_with_capacity("slow", 2, EventFilter::frames_only());
    let fast = controller.subscribe_with_capacity("fast", 64, EventFilter::frames_only());

    controller.start().await.unwrap();
    let summary = controller.wait().await.unwrap();
    assert_eq!(summary.frames_emitted, FRAMES);

    // The slow consumer never read: only the two newest frames survive
    assert_eq!(slow.pending(), 2);
    assert_eq!(slow.stats().delivered(), FRAMES);
    assert_eq!(slow.stats().dropped(), FRAMES - 2);
    assert_eq!(frame_sequences(slow.drain()), vec![48, 49]);

    // The other subscriber is unaffected and sees every frame in order
    let sequences = frame_sequences(fast.drain());
    assert_eq!(sequences, (0..FRAMES).collect::<Vec<_>>());
    assert_eq!(fast.stats().dropped(), 0);
    assert_eq!(fast.stats().received(), FRAMES);
}

#[tokio::test]
async fn test_concurrent_consumer_sees_ordered_sequences() {
    let mut controller = controller();
    let frames = controller.subscribe_with_capacity("reader", 8, EventFilter::frames_only());

    let reader = tokio::task::spawn_blocking(move || {
        let mut seen = Vec::new();
        while let Some(event) = frames.recv_timeout(Duration::from_millis(500)) {
            seen.push(event.sequence());
            if event.sequence() == FRAMES - 1 {
                break;
            }
        }
        (seen, frames.stats().dropped())
    });

    controller.start().await.unwrap();
    controller.wait().await.unwrap();

    let (seen, dropped) = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader did not finish")
        .unwrap();
    assert_eq!(seen.last(), Some(&(FRAMES - 1)));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.len() as u64 + dropped, FRAMES);
}

#[tokio::test]
async fn test_filter_selects_event_kinds() {
    let mut controller = controller();
    let tracks_only = EventFilter {
        frames: false,
        tracks: true,
        alerts: false,
    };
    let tracks = controller.subscribe("tracks", tracks_only);

    controller.start().await.unwrap();
    controller.wait().await.unwrap();

    let events = tracks.drain();
    assert_eq!(events.len() as u64, FRAMES);
    assert!(events.iter().all(|e| matches!(e, PipelineEvent::Tracks(_))));

    match events.last() {
        Some(PipelineEvent::Tracks(snapshot)) => {
            assert_eq!(snapshot.sequence, FRAMES - 1);
            assert_eq!(snapshot.tracks.len(), 1);
            assert_eq!(snapshot.tracks[0].age as u64, FRAMES);
        }
        other => panic!("expected a track snapshot, got {:?}", other.map(|e| e.sequence())),
    }
}

#[tokio::test]
async fn test_dropped_subscription_does_not_stall_pipeline() {
    let mut controller = controller();
    let gone = controller.subscribe_with_capacity("gone", 1, EventFilter::all());
    let kept = controller.subscribe("kept", EventFilter::frames_only());
    drop(gone);

    controller.start().await.unwrap();
    let summary = controller.wait().await.unwrap();
    assert_eq!(summary.frames_emitted, FRAMES);
    assert_eq!(kept.pending() as u64, FRAMES);
}
