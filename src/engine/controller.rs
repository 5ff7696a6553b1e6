use crate::analysis::{AlertEngine, PeakTrack, PeakTracker};
use crate::buffers::{TimeWindow, WaterfallBuffer, WaterfallRow};
use crate::core::SampleBlock;
use crate::dsp::SpectralProcessor;
use crate::engine::config::{AcquisitionConfig, PipelineConfig};
use crate::engine::fanout::{
    EventFilter, Fanout, PipelineEvent, Subscription, SubscriptionRegistry, TrackSnapshot,
};
use crate::engine::state::PipelineState;
use crate::error::PipelineError;
use crate::hal::{ManagedSource, SampleSource, SourceEvent};
use crate::observability::{MetricsCollector, PipelineCounters, PipelineMonitor, StageMetrics};
use crate::resilience::{ErrorPolicy, RetryTracker};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Why a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Requested,
    EndOfStream,
}

/// Totals for one start..stop session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub blocks_received: u64,
    pub frames_emitted: u64,
    pub degraded_frames: u64,
    pub blocks_skipped: u64,
    pub alerts_raised: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct SessionTally {
    blocks: u64,
    frames: u64,
    degraded: u64,
    skipped: u64,
    alerts: u64,
}

impl SessionTally {
    fn summary(&self, stop_reason: StopReason, elapsed: Duration) -> RunSummary {
        RunSummary {
            stop_reason,
            blocks_received: self.blocks,
            frames_emitted: self.frames,
            degraded_frames: self.degraded,
            blocks_skipped: self.skipped,
            alerts_raised: self.alerts,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

struct StageHandles {
    source: Arc<StageMetrics>,
    spectral: Arc<StageMetrics>,
    peaks: Arc<StageMetrics>,
    waterfall: Arc<StageMetrics>,
    alerts: Arc<StageMetrics>,
    fanout: Arc<StageMetrics>,
}

impl StageHandles {
    fn register(collector: &mut MetricsCollector) -> Self {
        Self {
            source: collector.stage("source"),
            spectral: collector.stage("spectral"),
            peaks: collector.stage("peaks"),
            waterfall: collector.stage("waterfall"),
            alerts: collector.stage("alerts"),
            fanout: collector.stage("fanout"),
        }
    }
}

/// Reads served by the acquisition task between cycles
enum CoreRequest {
    Waterfall {
        window: TimeWindow,
        reply: oneshot::Sender<Vec<WaterfallRow>>,
    },
    Tracks {
        reply: oneshot::Sender<Vec<PeakTrack>>,
    },
    PeakHold {
        reply: oneshot::Sender<Option<Vec<f64>>>,
    },
}

/// All mutable processing state. Held by the controller while idle and moved
/// into the acquisition task for the length of a session.
struct PipelineCore {
    processor: SpectralProcessor,
    tracker: PeakTracker,
    alerts: AlertEngine,
    waterfall: WaterfallBuffer,
    fanout: Fanout,
    stages: StageHandles,
    counters: Arc<PipelineCounters>,
    acquisition: AcquisitionConfig,
}

impl PipelineCore {
    /// Each session starts from empty averages, tracks, alert state and history
    fn begin_session(&mut self) {
        self.processor.reset_averaging();
        self.processor.reset_peak_hold();
        self.tracker.clear();
        self.alerts.reset();
        self.waterfall.clear();
        self.fanout.accept_pending();
    }

    fn serve(&self, request: CoreRequest) {
        match request {
            CoreRequest::Waterfall { window, reply } => {
                let _ = reply.send(self.waterfall.query(window));
            }
            CoreRequest::Tracks { reply } => {
                let _ = reply.send(self.tracker.snapshot());
            }
            CoreRequest::PeakHold { reply } => {
                let _ = reply.send(self.processor.peak_hold().map(|hold| hold.to_vec()));
            }
        }
    }

    async fn acquire(
        &mut self,
        source: &mut ManagedSource,
        requests: &mut mpsc::Receiver<CoreRequest>,
        shutdown_rx: &mut broadcast::Receiver<()>,
        tally: &mut SessionTally,
    ) -> Result<StopReason, PipelineError> {
        let timeout = self.acquisition.source_timeout();
        let mut retry = RetryTracker::new(self.acquisition.retry);

        loop {
            while let Ok(request) = requests.try_recv() {
                self.serve(request);
            }
            self.fanout.accept_pending();

            if stop_requested(shutdown_rx) {
                return Ok(StopReason::Requested);
            }

            let start = self.stages.source.start_processing();
            let gaps_before = source.gaps_detected();
            match source.next_block(timeout).await {
                Ok(SourceEvent::Block(block)) => {
                    self.stages.source.finish_processing(start);
                    retry.on_success();
                    let lost_samples = source.gaps_detected() > gaps_before;
                    self.process_block(block, lost_samples, tally)?;
                }
                Ok(SourceEvent::Empty) => {
                    self.counters.record_timeout();
                    match retry.on_failure() {
                        Some(delay) => {
                            log::warn!(
                                "No block within {:?} (attempt {}), retrying in {:?}",
                                timeout,
                                retry.consecutive(),
                                delay
                            );
                            if backoff(delay, shutdown_rx).await {
                                return Ok(StopReason::Requested);
                            }
                        }
                        None => {
                            return Err(PipelineError::SourceTimeout {
                                attempts: retry.consecutive(),
                            })
                        }
                    }
                }
                Err(e) => {
                    self.stages.source.record_error();
                    self.counters.record_read_error();
                    match retry.on_failure() {
                        Some(delay) => {
                            log::warn!(
                                "Source read failed (attempt {}): {}, retrying in {:?}",
                                retry.consecutive(),
                                e,
                                delay
                            );
                            if backoff(delay, shutdown_rx).await {
                                return Ok(StopReason::Requested);
                            }
                        }
                        None => {
                            return Err(PipelineError::SourceRead {
                                attempts: retry.consecutive(),
                                reason: e.to_string(),
                            })
                        }
                    }
                }
                Ok(SourceEvent::Disconnected(reason)) => {
                    return Err(PipelineError::DeviceLost(reason));
                }
                Ok(SourceEvent::EndOfStream) => {
                    log::info!("Source reached end of stream");
                    return Ok(StopReason::EndOfStream);
                }
            }
        }
    }

    fn process_block(
        &mut self,
        block: SampleBlock,
        lost_samples: bool,
        tally: &mut SessionTally,
    ) -> Result<(), PipelineError> {
        let sequence = block.sequence;
        self.counters.record_block(block.gap_flag, lost_samples);
        tally.blocks += 1;
        if lost_samples {
            log::warn!("Block {} follows lost samples, frame marked degraded", sequence);
        } else if block.gap_flag {
            log::warn!("Block {} follows a source interruption, frame marked degraded", sequence);
        }

        let start = self.stages.spectral.start_processing();
        let frame = match self.processor.process(&block) {
            Ok(frame) => {
                self.stages.spectral.finish_processing(start);
                Arc::new(frame)
            }
            Err(source) => {
                self.stages.spectral.record_error();
                return match self.acquisition.processing_error_policy {
                    ErrorPolicy::SkipBlock => {
                        log::error!("Skipping block {}: {}", sequence, source);
                        self.counters.record_skipped();
                        tally.skipped += 1;
                        Ok(())
                    }
                    ErrorPolicy::Fault => Err(PipelineError::Processing { sequence, source }),
                };
            }
        };
        if frame.degraded {
            tally.degraded += 1;
        }

        let start = self.stages.fanout.start_processing();
        self.fanout.publish(PipelineEvent::Frame(frame.clone()));
        self.stages.fanout.finish_processing(start);

        let start = self.stages.peaks.start_processing();
        let tracks = self.tracker.update(&frame);
        self.stages.peaks.finish_processing(start);

        let start = self.stages.waterfall.start_processing();
        match self.waterfall.append(&frame) {
            Ok(()) => self.stages.waterfall.finish_processing(start),
            Err(e) => {
                self.stages.waterfall.record_error();
                log::warn!("Waterfall rejected frame {}: {}", sequence, e);
            }
        }

        let start = self.stages.alerts.start_processing();
        let alerts = self.alerts.evaluate(&frame, &tracks);
        self.stages.alerts.finish_processing(start);

        let start = self.stages.fanout.start_processing();
        self.fanout.publish(PipelineEvent::Tracks(Arc::new(TrackSnapshot {
            sequence,
            timestamp_us: frame.timestamp_us,
            tracks,
        })));
        let raised = alerts.len();
        for alert in alerts {
            log::info!("[{}] {}", alert.severity, alert.message);
            self.fanout.publish(PipelineEvent::Alert(Arc::new(alert)));
        }
        self.stages.fanout.finish_processing(start);

        self.counters.record_frame();
        self.counters.record_alerts(raised);
        tally.frames += 1;
        tally.alerts += raised as u64;
        log::debug!(
            "Frame {} done: {} tracks, {} alerts",
            sequence,
            self.tracker.len(),
            raised
        );
        Ok(())
    }
}

fn stop_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        shutdown_rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}

/// Sleep for `delay` unless a stop arrives first. Returns true on stop.
async fn backoff(delay: Duration, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    if delay.is_zero() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown_rx.recv() => true,
    }
}

/// Apply a transition if the state machine allows it
fn transition(
    state_tx: &watch::Sender<PipelineState>,
    target: PipelineState,
) -> Result<(), PipelineError> {
    let to = target.name().to_string();
    let mut from = String::new();
    let changed = state_tx.send_if_modified(|state| {
        if state.can_transition_to(&target) {
            log::info!("Pipeline {} -> {}", state.name(), target.name());
            *state = target;
            true
        } else {
            from = state.name().to_string();
            false
        }
    });

    if changed {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition { from, to })
    }
}

struct SessionOutcome {
    core: PipelineCore,
    source: ManagedSource,
    result: Result<RunSummary, PipelineError>,
}

async fn run_session(
    mut core: PipelineCore,
    mut source: ManagedSource,
    mut requests: mpsc::Receiver<CoreRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
    state_tx: Arc<watch::Sender<PipelineState>>,
) -> SessionOutcome {
    let started = Instant::now();
    let mut tally = SessionTally::default();
    let result = core
        .acquire(&mut source, &mut requests, &mut shutdown_rx, &mut tally)
        .await;

    if let Ok(StopReason::EndOfStream) = result {
        // A controller stop may already have moved us to Stopping
        let _ = transition(&state_tx, PipelineState::Stopping);
    }

    // The source is released on every exit path, fault included
    if let Err(e) = source.close().await {
        log::warn!("Failed to close sample source: {}", e);
    }

    requests.close();
    while let Ok(request) = requests.try_recv() {
        core.serve(request);
    }

    let result = result.map(|reason| tally.summary(reason, started.elapsed()));
    match &result {
        Ok(summary) => {
            log::info!(
                "Acquisition stopped ({:?}): {} frames, {} alerts",
                summary.stop_reason,
                summary.frames_emitted,
                summary.alerts_raised
            );
            if let Err(e) = transition(&state_tx, PipelineState::Idle) {
                log::warn!("{}", e);
            }
        }
        Err(e) => {
            log::error!("Acquisition faulted: {}", e);
            let faulted = PipelineState::Faulted {
                error_msg: e.to_string(),
            };
            if transition(&state_tx, faulted).is_err() {
                // Fault raced with a requested stop
                let _ = transition(&state_tx, PipelineState::Idle);
            }
        }
    }

    SessionOutcome {
        core,
        source,
        result,
    }
}

/// Owns a SampleSource and every processing stage, and runs them on a
/// dedicated tokio task between `start` and `stop`.
pub struct PipelineController {
    config: PipelineConfig,
    core: Option<PipelineCore>,
    source: Option<ManagedSource>,
    registry: SubscriptionRegistry,
    state_tx: Arc<watch::Sender<PipelineState>>,
    requests_tx: Option<mpsc::Sender<CoreRequest>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    handle: Option<JoinHandle<SessionOutcome>>,
    finished: Option<Result<RunSummary, PipelineError>>,
    monitor: PipelineMonitor,
}

impl PipelineController {
    /// Validate the configuration against itself and the source. Nothing is
    /// opened until `start`.
    pub fn new(config: PipelineConfig, source: Box<dyn SampleSource>) -> Result<Self, PipelineError> {
        config.validate()?;
        let source = ManagedSource::new(source);
        config.check_source(&source.capabilities())?;

        let processor = SpectralProcessor::new(config.spectrum.clone())?;
        let tracker = PeakTracker::new(config.tracker.clone())?;
        let alerts = AlertEngine::new(config.alert_rules.clone(), config.spectrum.power_floor_dbm)?;
        let waterfall = WaterfallBuffer::with_width(&config.waterfall, config.spectrum.frame_len())?;
        let (fanout, registry) = Fanout::new(config.acquisition.subscriber_capacity);

        let mut collector = MetricsCollector::new();
        let stages = StageHandles::register(&mut collector);
        let counters = Arc::new(PipelineCounters::new());
        let monitor = PipelineMonitor::new(collector, counters.clone());

        let core = PipelineCore {
            processor,
            tracker,
            alerts,
            waterfall,
            fanout,
            stages,
            counters,
            acquisition: config.acquisition.clone(),
        };
        let (state_tx, _) = watch::channel(PipelineState::Idle);

        Ok(Self {
            config,
            core: Some(core),
            source: Some(source),
            registry,
            state_tx: Arc::new(state_tx),
            requests_tx: None,
            shutdown_tx: None,
            handle: None,
            finished: None,
            monitor,
        })
    }

    pub fn from_json(config: Value, source: Box<dyn SampleSource>) -> Result<Self, PipelineError> {
        Self::new(PipelineConfig::from_json(config)?, source)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get current pipeline state
    pub fn state(&self) -> PipelineState {
        self.state_tx.borrow().clone()
    }

    /// Follow state changes, including ones made by the acquisition task
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    pub fn monitor(&self) -> &PipelineMonitor {
        &self.monitor
    }

    /// Subscribe with the configured default queue length. Works in any state;
    /// events flow from the next cycle onwards.
    pub fn subscribe(&self, name: impl Into<String>, filter: EventFilter) -> Subscription {
        self.registry.subscribe(name, filter)
    }

    pub fn subscribe_with_capacity(
        &self,
        name: impl Into<String>,
        capacity: usize,
        filter: EventFilter,
    ) -> Subscription {
        self.registry.subscribe_with_capacity(name, capacity, filter)
    }

    /// Open the source and spawn the acquisition task
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        self.reap_if_finished().await;
        if self.handle.is_some() {
            return Err(PipelineError::Busy(self.state().name().to_string()));
        }
        if let PipelineState::Faulted { .. } = self.state() {
            transition(&self.state_tx, PipelineState::Idle)?;
        }

        let running = PipelineState::running();
        let current = self.state();
        if !current.can_transition_to(&running) {
            return Err(PipelineError::InvalidTransition {
                from: current.name().to_string(),
                to: running.name().to_string(),
            });
        }

        let (mut core, mut source) = match (self.core.take(), self.source.take()) {
            (Some(core), Some(source)) => (core, source),
            (core, source) => {
                self.core = core;
                self.source = source;
                return Err(PipelineError::TaskFailed(
                    "processing state was lost when a previous session crashed".to_string(),
                ));
            }
        };

        if let Err(e) = source.open().await {
            let reason = format!("{}: {}", source.capabilities().name, e);
            self.core = Some(core);
            self.source = Some(source);
            return Err(PipelineError::SourceOpen(reason));
        }

        core.begin_session();
        transition(&self.state_tx, running)?;

        let (requests_tx, requests_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let state_tx = self.state_tx.clone();
        log::info!("Acquisition started from '{}'", source.capabilities().name);

        self.handle = Some(tokio::spawn(run_session(
            core,
            source,
            requests_rx,
            shutdown_rx,
            state_tx,
        )));
        self.requests_tx = Some(requests_tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.finished = None;
        Ok(())
    }

    /// Ask the task to finish its current cycle and release the source, then
    /// wait for it. Returns the session's outcome.
    pub async fn stop(&mut self) -> Result<RunSummary, PipelineError> {
        if self.handle.is_none() && self.finished.is_none() {
            return Err(PipelineError::InvalidTransition {
                from: self.state().name().to_string(),
                to: PipelineState::Stopping.name().to_string(),
            });
        }

        if self.state().is_running() {
            // The task may have left Running on its own in the meantime
            if transition(&self.state_tx, PipelineState::Stopping).is_ok() {
                if let Some(shutdown_tx) = &self.shutdown_tx {
                    let _ = shutdown_tx.send(());
                }
            }
        }
        self.wait().await
    }

    /// Wait for the session to end by itself (end of stream or fault)
    pub async fn wait(&mut self) -> Result<RunSummary, PipelineError> {
        if let Some(finished) = self.finished.take() {
            return finished;
        }
        let handle = self.handle.take().ok_or_else(|| PipelineError::InvalidTransition {
            from: self.state().name().to_string(),
            to: PipelineState::Idle.name().to_string(),
        })?;
        self.join(handle).await
    }

    /// Clear a fault so the pipeline can be started again
    pub async fn reset(&mut self) -> Result<(), PipelineError> {
        self.reap_if_finished().await;
        self.finished = None;
        transition(&self.state_tx, PipelineState::Idle)
    }

    async fn join(&mut self, handle: JoinHandle<SessionOutcome>) -> Result<RunSummary, PipelineError> {
        let joined = handle.await;
        self.shutdown_tx = None;
        self.requests_tx = None;

        match joined {
            Ok(outcome) => {
                self.core = Some(outcome.core);
                self.source = Some(outcome.source);
                outcome.result
            }
            Err(e) => {
                let msg = e.to_string();
                log::error!("Acquisition task failed: {}", msg);
                self.state_tx.send_replace(PipelineState::Faulted {
                    error_msg: msg.clone(),
                });
                Err(PipelineError::TaskFailed(msg))
            }
        }
    }

    async fn reap_if_finished(&mut self) {
        let finished = self.handle.as_ref().is_some_and(|handle| handle.is_finished());
        if finished {
            if let Some(handle) = self.handle.take() {
                let result = self.join(handle).await;
                self.finished = Some(result);
            }
        }
    }

    async fn request<T>(
        &mut self,
        local: impl FnOnce(&PipelineCore) -> T,
        make: impl FnOnce(oneshot::Sender<T>) -> CoreRequest,
    ) -> Result<T, PipelineError> {
        self.reap_if_finished().await;
        if let Some(core) = &self.core {
            return Ok(local(core));
        }

        let requests_tx = self
            .requests_tx
            .as_ref()
            .ok_or_else(|| PipelineError::TaskFailed("processing state is unavailable".to_string()))?;
        let (reply, rx) = oneshot::channel();
        requests_tx
            .send(make(reply))
            .await
            .map_err(|_| PipelineError::TaskFailed("acquisition task is gone".to_string()))?;
        rx.await
            .map_err(|_| PipelineError::TaskFailed("acquisition task dropped the request".to_string()))
    }

    /// Waterfall rows inside `window`, oldest first
    pub async fn query_waterfall(&mut self, window: TimeWindow) -> Result<Vec<WaterfallRow>, PipelineError> {
        self.request(
            move |core| core.waterfall.query(window),
            move |reply| CoreRequest::Waterfall { window, reply },
        )
        .await
    }

    /// Current track table, oldest track first
    pub async fn tracks(&mut self) -> Result<Vec<PeakTrack>, PipelineError> {
        self.request(
            |core| core.tracker.snapshot(),
            |reply| CoreRequest::Tracks { reply },
        )
        .await
    }

    pub async fn peak_hold(&mut self) -> Result<Option<Vec<f64>>, PipelineError> {
        self.request(
            |core| core.processor.peak_hold().map(|hold| hold.to_vec()),
            |reply| CoreRequest::PeakHold { reply },
        )
        .await
    }
}
