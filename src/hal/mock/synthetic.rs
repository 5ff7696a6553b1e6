use crate::core::{sample_block::block_timestamp_us, IqSample, SampleBlock};
use crate::hal::traits::SampleSource;
use crate::hal::types::{SourceCapabilities, SourceConfig, SourceEvent, SourceKind, SourceState};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Duration;

/// One complex tone, placed `offset_hz` away from the center frequency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSpec {
    pub offset_hz: f64,
    /// Linear amplitude; 1.0 reads as 0 dB full scale
    pub amplitude: f64,
    pub drift_hz_per_block: f64,
    /// Per-block amplitudes indexed by sequence. The last entry holds once the
    /// schedule runs out; empty means `amplitude` throughout.
    pub amplitude_schedule: Vec<f64>,
}

impl Default for ToneSpec {
    fn default() -> Self {
        Self {
            offset_hz: 100_000.0,
            amplitude: 0.5,
            drift_hz_per_block: 0.0,
            amplitude_schedule: Vec::new(),
        }
    }
}

impl ToneSpec {
    pub fn new(offset_hz: f64, amplitude: f64) -> Self {
        Self {
            offset_hz,
            amplitude,
            ..Default::default()
        }
    }

    pub fn with_drift(mut self, hz_per_block: f64) -> Self {
        self.drift_hz_per_block = hz_per_block;
        self
    }

    pub fn with_schedule(mut self, schedule: Vec<f64>) -> Self {
        self.amplitude_schedule = schedule;
        self
    }

    fn amplitude_at(&self, sequence: u64) -> f64 {
        if self.amplitude_schedule.is_empty() {
            return self.amplitude;
        }
        let index = (sequence as usize).min(self.amplitude_schedule.len() - 1);
        self.amplitude_schedule[index]
    }

    fn frequency_at(&self, sequence: u64) -> f64 {
        self.offset_hz + self.drift_hz_per_block * sequence as f64
    }
}

/// Link failure injected on a given read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InjectedFault {
    /// Lose `dropped_blocks` blocks; the next block carries the gap flag
    Gap { dropped_blocks: u64 },
    /// Nothing arrives before the read timeout
    Timeout,
    /// The read fails part-way and its block is lost
    ShortRead,
    /// The link goes away for good
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledFault {
    /// Zero-based index of the `next_block` call the fault replaces
    pub at_read: u64,
    pub fault: InjectedFault,
}

/// Full description of a synthetic capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticScript {
    pub source: SourceConfig,
    pub tones: Vec<ToneSpec>,
    /// RMS of complex white noise; 0 disables it
    pub noise_rms: f64,
    pub seed: u64,
    pub faults: Vec<ScheduledFault>,
    /// End the stream after this many blocks
    pub max_blocks: Option<u64>,
    /// Pace blocks at the configured sample rate
    pub realtime: bool,
}

impl Default for SyntheticScript {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            tones: Vec::new(),
            noise_rms: 0.0,
            seed: 0,
            faults: Vec::new(),
            max_blocks: None,
            realtime: false,
        }
    }
}

/// Deterministic I/Q generator for tests and demos.
///
/// Tones are complex exponentials, so a positive offset lands in the bin at
/// `offset / bin_width` and a negative one folds onto the same bin.
pub struct SyntheticGenerator {
    config: SourceConfig,
    tones: Vec<ToneSpec>,
    noise_rms: f64,
    seed: u64,
    faults: BTreeMap<u64, InjectedFault>,
    max_blocks: Option<u64>,
    realtime: bool,

    state: SourceState,
    rng: StdRng,
    noise: Option<Normal<f64>>,
    phases: Vec<f64>,
    sequence: u64,
    reads: u64,
    emitted: u64,
    pending_gap: bool,
    disconnected: bool,
}

impl SyntheticGenerator {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            tones: Vec::new(),
            noise_rms: 0.0,
            seed: 0,
            faults: BTreeMap::new(),
            max_blocks: None,
            realtime: false,
            state: SourceState::Unopened,
            rng: StdRng::seed_from_u64(0),
            noise: None,
            phases: Vec::new(),
            sequence: 0,
            reads: 0,
            emitted: 0,
            pending_gap: false,
            disconnected: false,
        }
    }

    pub fn from_script(script: SyntheticScript) -> Self {
        let mut generator = Self::new(script.source)
            .with_noise(script.noise_rms, script.seed)
            .with_realtime(script.realtime);
        generator.tones = script.tones;
        generator.max_blocks = script.max_blocks;
        for scheduled in script.faults {
            generator.faults.insert(scheduled.at_read, scheduled.fault);
        }
        generator
    }

    /// Build from a JSON script, e.g.
    /// `{"tones": [{"offset_hz": 2e5, "amplitude": 0.1}], "noise_rms": 1e-3}`
    pub fn from_json(config: Value) -> Result<Self> {
        let script: SyntheticScript = serde_json::from_value(config)?;
        Ok(Self::from_script(script))
    }

    pub fn with_tone(mut self, tone: ToneSpec) -> Self {
        self.tones.push(tone);
        self
    }

    pub fn with_noise(mut self, rms: f64, seed: u64) -> Self {
        self.noise_rms = rms;
        self.seed = seed;
        self
    }

    pub fn with_fault(mut self, at_read: u64, fault: InjectedFault) -> Self {
        self.faults.insert(at_read, fault);
        self
    }

    pub fn with_max_blocks(mut self, max_blocks: u64) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    /// Move every tone's phase forward by `samples` without producing output
    fn advance(&mut self, samples: usize) {
        let sequence = self.sequence;
        let sample_rate = self.config.sample_rate_hz;
        for (tone, phase) in self.tones.iter().zip(self.phases.iter_mut()) {
            let step = 2.0 * PI * tone.frequency_at(sequence) / sample_rate;
            *phase = (*phase + step * samples as f64).rem_euclid(2.0 * PI);
        }
    }

    fn generate_block(&mut self) -> SampleBlock {
        let block_size = self.config.block_size;
        let sample_rate = self.config.sample_rate_hz;
        let sequence = self.sequence;
        let mut samples = vec![IqSample::new(0.0, 0.0); block_size];

        for (tone, phase) in self.tones.iter().zip(self.phases.iter_mut()) {
            let amplitude = tone.amplitude_at(sequence);
            let step = 2.0 * PI * tone.frequency_at(sequence) / sample_rate;
            for sample in samples.iter_mut() {
                *sample += IqSample::from_polar(amplitude, *phase);
                *phase += step;
            }
            *phase = phase.rem_euclid(2.0 * PI);
        }

        if let Some(noise) = &self.noise {
            for sample in samples.iter_mut() {
                sample.re += noise.sample(&mut self.rng);
                sample.im += noise.sample(&mut self.rng);
            }
        }

        let timestamp_us = block_timestamp_us(sequence, block_size, sample_rate);
        let block = SampleBlock::new(sequence, timestamp_us, samples).with_gap(self.pending_gap);
        self.pending_gap = false;
        self.sequence += 1;
        self.emitted += 1;
        block
    }

    fn skip_blocks(&mut self, count: u64) {
        for _ in 0..count {
            self.advance(self.config.block_size);
            self.sequence += 1;
        }
        self.pending_gap = true;
    }
}

#[async_trait]
impl SampleSource for SyntheticGenerator {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            kind: SourceKind::SyntheticGenerator,
            name: "synthetic".to_string(),
            config: self.config.clone(),
            format: None,
        }
    }

    async fn open(&mut self) -> Result<()> {
        if self.state == SourceState::Open {
            return Err(anyhow!("Cannot open device in state {:?}", self.state));
        }
        if !self.noise_rms.is_finite() || self.noise_rms < 0.0 {
            bail!("noise_rms must be a non-negative number, got {}", self.noise_rms);
        }

        self.noise = if self.noise_rms > 0.0 {
            let sigma = self.noise_rms / 2f64.sqrt();
            Some(Normal::new(0.0, sigma).map_err(|e| anyhow!("invalid noise level: {}", e))?)
        } else {
            None
        };
        self.rng = StdRng::seed_from_u64(self.seed);
        self.phases = vec![0.0; self.tones.len()];
        self.sequence = 0;
        self.reads = 0;
        self.emitted = 0;
        self.pending_gap = false;
        self.disconnected = false;
        self.state = SourceState::Open;
        Ok(())
    }

    async fn next_block(&mut self, timeout: Duration) -> Result<SourceEvent> {
        if self.state != SourceState::Open {
            return Err(anyhow!("Device not open"));
        }
        if self.disconnected {
            return Ok(SourceEvent::Disconnected("synthetic link dropped".to_string()));
        }
        if let Some(max) = self.max_blocks {
            if self.emitted >= max {
                return Ok(SourceEvent::EndOfStream);
            }
        }

        let read = self.reads;
        self.reads += 1;

        match self.faults.get(&read).copied() {
            Some(InjectedFault::Timeout) => {
                tokio::time::sleep(timeout).await;
                return Ok(SourceEvent::Empty);
            }
            Some(InjectedFault::ShortRead) => {
                self.skip_blocks(1);
                bail!("short read on block {}", self.sequence - 1);
            }
            Some(InjectedFault::Disconnect) => {
                self.disconnected = true;
                return Ok(SourceEvent::Disconnected("synthetic link dropped".to_string()));
            }
            Some(InjectedFault::Gap { dropped_blocks }) => self.skip_blocks(dropped_blocks),
            None => {}
        }

        if self.realtime {
            tokio::time::sleep(self.config.block_period()).await;
        }

        Ok(SourceEvent::Block(self.generate_block()))
    }

    async fn close(&mut self) -> Result<()> {
        self.state = SourceState::Closed;
        Ok(())
    }
}
