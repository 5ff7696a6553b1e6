use rfscope::engine::{EventFilter, PipelineController, PipelineEvent};
use rfscope::hal::{InjectedFault, SourceConfig, SyntheticGenerator, ToneSpec};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("rfscope - synthetic spectrum session");
    println!("====================================\n");

    let config = serde_json::json!({
        "spectrum": {
            "sample_rate_hz": 2_048_000.0,
            "center_frequency_hz": 433_000_000.0,
            "block_size": 2048,
            "window_function": "blackman-harris",
            "averaging_alpha": 0.5,
            "calibration_db": -30.0
        },
        "tracker": {"peak_min_separation_hz": 20_000.0, "peak_miss_tolerance": 2},
        "alert_rules": [
            {
                "id": "keyfob",
                "low_hz": 433_250_000.0,
                "high_hz": 433_350_000.0,
                "threshold_dbm": -60.0,
                "mode": {"type": "rising"},
                "severity": "critical"
            },
            {
                "id": "beacon",
                "low_hz": 433_500_000.0,
                "high_hz": 433_700_000.0,
                "threshold_dbm": -70.0,
                "mode": {"type": "sustained", "frames": 25}
            }
        ],
        "waterfall": {"capacity": 256},
        "acquisition": {"source_timeout_ms": 200}
    });

    let source_config = SourceConfig {
        center_frequency_hz: 433_000_000.0,
        sample_rate_hz: 2_048_000.0,
        gain_db: 30.0,
        block_size: 2048,
    };

    // A bursty transmitter at +300 kHz and a slowly drifting beacon near +600 kHz
    let bursts: Vec<f64> = (0..120)
        .map(|i| if (30..45).contains(&i) || (80..90).contains(&i) { 0.3 } else { 0.0 })
        .collect();
    let source = SyntheticGenerator::new(source_config)
        .with_tone(ToneSpec::new(300_000.0, 0.0).with_schedule(bursts))
        .with_tone(ToneSpec::new(590_000.0, 0.05).with_drift(100.0))
        .with_noise(1e-3, 7)
        .with_fault(60, InjectedFault::Gap { dropped_blocks: 3 })
        .with_max_blocks(120)
        .with_realtime(true);

    let mut controller = PipelineController::from_json(config, Box::new(source))?;
    let alerts = controller.subscribe("console", EventFilter::alerts_only());
    let frames = controller.subscribe_with_capacity("display", 4, EventFilter::frames_only());

    controller.start().await?;

    let printer = tokio::task::spawn_blocking(move || {
        let mut printed = 0;
        while let Some(event) = alerts.recv_timeout(Duration::from_secs(2)) {
            if let PipelineEvent::Alert(alert) = event {
                println!(
                    "ALERT {:<8} {:<7} {:.3} MHz {:6.1} dBm  block {}",
                    alert.severity.to_string(),
                    alert.rule_id,
                    alert.frequency_hz / 1e6,
                    alert.power_dbm,
                    alert.sequence
                );
                printed += 1;
            }
        }
        printed
    });

    let summary = controller.wait().await?;
    let printed = printer.await?;

    println!("\nSession ended: {:?}", summary.stop_reason);
    println!(
        "{} frames ({} degraded), {} alerts printed",
        summary.frames_emitted, summary.degraded_frames, printed
    );
    println!(
        "Display subscriber: {} delivered, {} dropped",
        frames.stats().delivered(),
        frames.stats().dropped()
    );

    for track in controller.tracks().await? {
        println!(
            "Track {} at {:.4} MHz, {:.1} dBm, seen {} frames, drift {:.0} Hz",
            track.id,
            track.frequency_hz / 1e6,
            track.power_dbm,
            track.age,
            track.drift_hz()
        );
    }

    let rows = controller.query_waterfall(rfscope::buffers::TimeWindow::all()).await?;
    println!("Waterfall holds {} rows", rows.len());
    println!("\n{}", controller.monitor().generate_report());

    Ok(())
}
