use super::StageMetrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub stage: String,
    pub items_processed: u64,
    pub errors_count: u64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
}

/// Named stage metrics, reported in stage-name order
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: BTreeMap<String, Arc<StageMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: impl Into<String>, metrics: Arc<StageMetrics>) {
        self.metrics.insert(stage.into(), metrics);
    }

    /// Register a fresh StageMetrics and return a handle to it
    pub fn stage(&mut self, stage: &str) -> Arc<StageMetrics> {
        let metrics = Arc::new(StageMetrics::new(stage));
        self.register(stage, metrics.clone());
        metrics
    }

    pub fn snapshot(&self) -> BTreeMap<String, StageSnapshot> {
        self.metrics
            .iter()
            .map(|(id, metrics)| {
                (
                    id.clone(),
                    StageSnapshot {
                        stage: metrics.stage().to_string(),
                        items_processed: metrics.items_processed(),
                        errors_count: metrics.errors_count(),
                        avg_latency_us: metrics.avg_latency_us(),
                        max_latency_us: metrics.max_latency_us(),
                    },
                )
            })
            .collect()
    }

    pub fn get_stage_metrics(&self, stage: &str) -> Option<Arc<StageMetrics>> {
        self.metrics.get(stage).cloned()
    }
}
