use rfscope::core::IqSample;
use rfscope::engine::StopReason;
use rfscope::hal::format_converter::iq_to_bytes;
use rfscope::hal::{
    FileReplay, InjectedFault, IqFormat, Link, LinkConnector, LiveDevice, ManagedSource,
    SampleSource, SourceConfig, SourceEvent, SourceKind, SourceState, SyntheticGenerator,
    ToneSpec,
};
use rfscope::buffers::TimeWindow;
use rfscope::{PipelineConfig, PipelineController, PipelineError};
use std::f64::consts::PI;
use std::io::{Cursor, Write};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(5);

fn source_config() -> SourceConfig {
    SourceConfig {
        center_frequency_hz: 0.0,
        sample_rate_hz: 64_000.0,
        gain_db: 0.0,
        block_size: 64,
    }
}

fn pipeline_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.spectrum.sample_rate_hz = 64_000.0;
    config.spectrum.center_frequency_hz = 0.0;
    config.spectrum.block_size = 64;
    config
}

/// Read until the next block, returning (sequence, gap_flag)
async fn next_block(source: &mut ManagedSource) -> (u64, bool) {
    loop {
        match source.next_block(TIMEOUT).await {
            Ok(SourceEvent::Block(block)) => return (block.sequence, block.gap_flag),
            Ok(SourceEvent::Empty) | Err(_) => continue,
            Ok(other) => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_managed_source_flags_every_discontinuity() {
    let generator = SyntheticGenerator::new(source_config())
        .with_tone(ToneSpec::new(4_000.0, 0.3))
        .with_fault(2, InjectedFault::Gap { dropped_blocks: 3 })
        .with_fault(5, InjectedFault::Timeout)
        .with_fault(7, InjectedFault::ShortRead);
    let mut source = ManagedSource::new(Box::new(generator));
    source.open().await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..7 {
        seen.push(next_block(&mut source).await);
    }

    assert_eq!(
        seen,
        vec![
            (0, false),
            (1, false),
            (5, true),
            (6, false),
            (7, false),
            (8, true),
            (10, true),
        ]
    );
    // Block 8 is only degraded by the timeout before it; no samples were lost
    assert_eq!(source.gaps_detected(), 2);
}

#[tokio::test]
async fn test_managed_source_lifecycle() {
    let mut source = ManagedSource::new(Box::new(SyntheticGenerator::new(source_config())));
    assert_eq!(source.state(), &SourceState::Unopened);
    assert!(source.next_block(TIMEOUT).await.is_err());

    // Closing before open is a no-op
    source.close().await.unwrap();
    assert_eq!(source.state(), &SourceState::Unopened);

    source.open().await.unwrap();
    assert!(source.open().await.is_err());

    source.close().await.unwrap();
    source.close().await.unwrap();
    assert_eq!(source.state(), &SourceState::Closed);

    // Reopening restarts the stream
    source.open().await.unwrap();
    assert_eq!(next_block(&mut source).await, (0, false));
}

#[tokio::test]
async fn test_disconnect_puts_source_in_error() {
    let generator =
        SyntheticGenerator::new(source_config()).with_fault(1, InjectedFault::Disconnect);
    let mut source = ManagedSource::new(Box::new(generator));
    source.open().await.unwrap();

    assert_eq!(next_block(&mut source).await, (0, false));
    assert!(matches!(
        source.next_block(TIMEOUT).await.unwrap(),
        SourceEvent::Disconnected(_)
    ));
    assert!(matches!(source.state(), SourceState::Error(_)));
    assert!(source.next_block(TIMEOUT).await.is_err());
}

fn tone_recording(blocks: usize, format: IqFormat, suffix: &str) -> tempfile::NamedTempFile {
    let step = 2.0 * PI * 16_000.0 / 64_000.0;
    // Half a block of trailing samples that must never be delivered
    let samples: Vec<IqSample> = (0..blocks * 64 + 32)
        .map(|i| IqSample::from_polar(0.5, step * i as f64))
        .collect();
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(&iq_to_bytes(&samples, format)).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_file_replay_through_pipeline() {
    let file = tone_recording(10, IqFormat::Cf32, ".cf32");
    let replay = FileReplay::from_path(file.path(), source_config()).unwrap();
    assert_eq!(
        replay.capabilities().format,
        Some(IqFormat::Cf32)
    );

    let mut controller = PipelineController::new(pipeline_config(), Box::new(replay)).unwrap();
    controller.start().await.unwrap();
    let summary = controller.wait().await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(summary.frames_emitted, 10);
    assert_eq!(summary.degraded_frames, 0);

    let tracks = controller.tracks().await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].frequency_hz, 16_000.0);
    assert_eq!(tracks[0].age, 10);
    // 0.5 full scale is -6 dBFS
    assert!((tracks[0].power_dbm + 6.0206).abs() < 0.01);
}

#[tokio::test]
async fn test_file_replay_quantised_formats() {
    for (format, suffix) in [(IqFormat::Cu8, ".cu8"), (IqFormat::Cs8, ".cs8"), (IqFormat::Cs16, ".cs16")] {
        let file = tone_recording(4, format, suffix);
        let replay = FileReplay::from_path(file.path(), source_config()).unwrap();
        let mut controller = PipelineController::new(pipeline_config(), Box::new(replay)).unwrap();

        controller.start().await.unwrap();
        let summary = controller.wait().await.unwrap();
        assert_eq!(summary.frames_emitted, 4, "{:?}", format);

        let tracks = controller.tracks().await.unwrap();
        assert_eq!(tracks.len(), 1, "{:?}", format);
        assert_eq!(tracks[0].frequency_hz, 16_000.0);
    }
}

#[tokio::test]
async fn test_missing_recording_fails_to_start() {
    let replay = FileReplay::new("/nonexistent/capture.cf32", IqFormat::Cf32, source_config());
    let mut controller = PipelineController::new(pipeline_config(), Box::new(replay)).unwrap();
    assert!(controller.start().await.is_err());
    assert!(!controller.state().is_running());
}

fn memory_link(blocks: usize) -> LinkConnector {
    let samples: Vec<IqSample> = (0..blocks * 64)
        .map(|i| IqSample::new((i % 64) as f64 / 64.0, 0.0))
        .collect();
    let bytes = iq_to_bytes(&samples, IqFormat::Cu8);
    Box::new(move || Ok(Link::new(Cursor::new(bytes.clone()))))
}

#[tokio::test]
async fn test_live_device_streams_until_link_closes() {
    let device = LiveDevice::new("loopback", source_config(), IqFormat::Cu8, memory_link(3));
    assert_eq!(
        device.capabilities().kind,
        SourceKind::LiveDevice
    );

    let mut source = ManagedSource::new(Box::new(device));
    source.open().await.unwrap();

    for expected in 0..3u64 {
        match source.next_block(Duration::from_secs(1)).await.unwrap() {
            SourceEvent::Block(block) => {
                assert_eq!(block.sequence, expected);
                assert!(!block.gap_flag);
                assert_eq!(block.len(), 64);
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    let event = source.next_block(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(event, SourceEvent::Disconnected(reason) if reason.contains("closed")));
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_live_device_loss_faults_pipeline() {
    let device = LiveDevice::new("loopback", source_config(), IqFormat::Cu8, memory_link(5))
        .with_queue_depth(8);
    let mut controller = PipelineController::new(pipeline_config(), Box::new(device)).unwrap();

    controller.start().await.unwrap();
    let err = controller.wait().await.unwrap_err();
    assert!(matches!(err, PipelineError::DeviceLost(_)));
    assert_eq!(controller.query_waterfall(TimeWindow::all()).await.unwrap().len(), 5);
}
