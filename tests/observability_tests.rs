use rfscope::hal::{InjectedFault, SourceConfig, SyntheticGenerator, ToneSpec};
use rfscope::{PipelineConfig, PipelineController};

#[tokio::test]
async fn test_monitor_after_session() {
    let source_config = SourceConfig {
        center_frequency_hz: 0.0,
        sample_rate_hz: 64_000.0,
        gain_db: 0.0,
        block_size: 64,
    };
    let source = SyntheticGenerator::new(source_config)
        .with_tone(ToneSpec::new(10_000.0, 0.4))
        .with_fault(5, InjectedFault::Gap { dropped_blocks: 2 })
        .with_max_blocks(20);

    let mut config = PipelineConfig::default();
    config.spectrum.sample_rate_hz = 64_000.0;
    config.spectrum.center_frequency_hz = 0.0;
    config.spectrum.block_size = 64;

    let mut controller = PipelineController::new(config, Box::new(source)).unwrap();
    controller.start().await.unwrap();
    controller.wait().await.unwrap();

    let counters = controller.monitor().counters();
    assert_eq!(counters.blocks_received, 20);
    assert_eq!(counters.gaps_detected, 1);
    assert_eq!(counters.degraded_blocks, 1);
    assert_eq!(counters.frames_emitted, 20);
    assert_eq!(counters.source_timeouts, 0);

    let stages = controller.monitor().collector().snapshot();
    assert_eq!(stages["source"].items_processed, 20);
    assert_eq!(stages["spectral"].items_processed, 20);
    assert_eq!(stages["waterfall"].items_processed, 20);
    assert_eq!(stages["spectral"].errors_count, 0);
    // Frame publish and the track/alert publish are timed separately
    assert_eq!(stages["fanout"].items_processed, 40);

    let report = controller.monitor().generate_report();
    assert!(report.contains("[acquisition]"));
    assert!(report.contains("20 received, 1 degraded"));
    assert!(report.contains("[spectral]"));
    assert!(report.contains("0 errors"));
}
