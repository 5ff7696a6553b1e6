use super::{CounterSnapshot, MetricsCollector, PipelineCounters};
use std::sync::Arc;

/// Read-only view over a running pipeline's metrics
#[derive(Clone)]
pub struct PipelineMonitor {
    collector: MetricsCollector,
    counters: Arc<PipelineCounters>,
}

impl PipelineMonitor {
    pub fn new(collector: MetricsCollector, counters: Arc<PipelineCounters>) -> Self {
        Self {
            collector,
            counters,
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn generate_report(&self) -> String {
        let counters = self.counters.snapshot();
        let mut report = String::from("=== Pipeline Metrics ===\n");

        report.push_str(&format!(
            "\n[acquisition]\n  Blocks: {} received, {} degraded, {} skipped\n  Gaps: {}\n  Timeouts: {}\n  Read errors: {}\n  Frames: {}\n  Alerts: {}\n",
            counters.blocks_received,
            counters.degraded_blocks,
            counters.blocks_skipped,
            counters.gaps_detected,
            counters.source_timeouts,
            counters.read_errors,
            counters.frames_emitted,
            counters.alerts_fired,
        ));

        for (stage, metrics) in self.collector.snapshot() {
            report.push_str(&format!(
                "\n[{}]\n  Processed: {}\n  Errors: {}\n  Avg Latency: {}μs (max {}μs)\n",
                stage,
                metrics.items_processed,
                if metrics.errors_count > 0 {
                    format!(
                        "{} error{}",
                        metrics.errors_count,
                        if metrics.errors_count == 1 { "" } else { "s" }
                    )
                } else {
                    "0 errors".to_string()
                },
                metrics.avg_latency_us,
                metrics.max_latency_us
            ));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lists_stages_in_order() {
        let mut collector = MetricsCollector::new();
        let spectral = collector.stage("spectral");
        collector.stage("alerts");
        spectral.record_error();

        let counters = Arc::new(PipelineCounters::new());
        counters.record_block(false, false);

        let report = PipelineMonitor::new(collector, counters).generate_report();
        assert!(report.contains("1 received"));
        assert!(report.contains("1 error\n"));
        let alerts = report.find("[alerts]").unwrap();
        let spectral = report.find("[spectral]").unwrap();
        assert!(alerts < spectral);
    }
}
