//! Threshold rules evaluated against every frame and the current track table.

use crate::analysis::peaks::{PeakTrack, TrackId};
use crate::core::SpectrumFrame;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Highest threshold accepted by rule validation
pub const MAX_REPRESENTABLE_DBM: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerMode {
    /// Once per crossing from below to above the threshold
    Rising,
    /// Once for every `frames` consecutive frames above the threshold
    Sustained { frames: u32 },
    /// For every tracked peak inside the band, whatever its power
    AnyPeakInBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub low_hz: f64,
    pub high_hz: f64,
    pub threshold_dbm: f64,
    pub mode: TriggerMode,
    #[serde(default)]
    pub severity: Severity,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        low_hz: f64,
        high_hz: f64,
        threshold_dbm: f64,
        mode: TriggerMode,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            low_hz,
            high_hz,
            threshold_dbm,
            mode,
            severity,
        }
    }

    pub fn contains(&self, frequency_hz: f64) -> bool {
        frequency_hz >= self.low_hz && frequency_hz <= self.high_hz
    }

    /// `power_floor_dbm` is the lowest power a frame can report
    pub fn validate(&self, power_floor_dbm: f64) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            rule_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("rule id must not be empty".to_string()));
        }
        if !(self.low_hz.is_finite() && self.high_hz.is_finite() && self.low_hz < self.high_hz) {
            return Err(invalid(format!(
                "frequency range [{}, {}] is not a finite increasing range",
                self.low_hz, self.high_hz
            )));
        }
        if !(self.threshold_dbm >= power_floor_dbm && self.threshold_dbm <= MAX_REPRESENTABLE_DBM) {
            return Err(invalid(format!(
                "threshold {} dBm outside representable range [{}, {}]",
                self.threshold_dbm, power_floor_dbm, MAX_REPRESENTABLE_DBM
            )));
        }
        if let TriggerMode::Sustained { frames: 0 } = self.mode {
            return Err(invalid("sustained rules need at least one frame".to_string()));
        }
        Ok(())
    }
}

/// Alert raised by a rule. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule_id: String,
    pub severity: Severity,
    pub frequency_hz: f64,
    pub power_dbm: f64,
    pub timestamp_us: u64,
    pub sequence: u64,
    pub track_id: Option<TrackId>,
    pub message: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct RuleState {
    above: bool,
    run: u32,
}

pub struct AlertEngine {
    rules: Vec<AlertRule>,
    states: Vec<RuleState>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, power_floor_dbm: f64) -> Result<Self, ConfigError> {
        validate_rules(&rules, power_floor_dbm)?;
        Ok(Self {
            states: vec![RuleState::default(); rules.len()],
            rules,
        })
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate every rule in registration order.
    ///
    /// Degraded frames are skipped by level rules but peak rules still run
    /// against tracks established before the gap.
    pub fn evaluate(&mut self, frame: &SpectrumFrame, tracks: &[PeakTrack]) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        for (rule, state) in self.rules.iter().zip(self.states.iter_mut()) {
            let hit = || {
                frame
                    .max_in_range(rule.low_hz, rule.high_hz)
                    .filter(|&(_, _, power)| power > rule.threshold_dbm)
            };

            match rule.mode {
                TriggerMode::Rising => {
                    if frame.degraded {
                        continue;
                    }
                    match hit() {
                        Some((_, frequency, power)) if !state.above => {
                            state.above = true;
                            let message = format!(
                                "{:.1} dBm at {:.6} MHz rose above {:.1} dBm",
                                power,
                                frequency / 1e6,
                                rule.threshold_dbm
                            );
                            events.push(event(rule, frame, frequency, power, None, message));
                        }
                        Some(_) => {}
                        None => state.above = false,
                    }
                }
                TriggerMode::Sustained { frames } => {
                    if frame.degraded {
                        continue;
                    }
                    match hit() {
                        Some((_, frequency, power)) => {
                            state.run += 1;
                            if state.run >= frames {
                                state.run = 0;
                                let message = format!(
                                    "{:.1} dBm at {:.6} MHz above {:.1} dBm for {} frames",
                                    power,
                                    frequency / 1e6,
                                    rule.threshold_dbm,
                                    frames
                                );
                                events.push(event(rule, frame, frequency, power, None, message));
                            }
                        }
                        None => state.run = 0,
                    }
                }
                TriggerMode::AnyPeakInBand => {
                    for track in tracks {
                        if rule.contains(track.frequency_hz) {
                            let message = format!(
                                "peak {} at {:.6} MHz ({:.1} dBm) inside band",
                                track.id,
                                track.frequency_hz / 1e6,
                                track.power_dbm
                            );
                            events.push(event(
                                rule,
                                frame,
                                track.frequency_hz,
                                track.power_dbm,
                                Some(track.id),
                                message,
                            ));
                        }
                    }
                }
            }
        }

        events
    }

    /// Forget crossing and run-length state
    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(|s| *s = RuleState::default());
    }
}

fn event(
    rule: &AlertRule,
    frame: &SpectrumFrame,
    frequency_hz: f64,
    power_dbm: f64,
    track_id: Option<TrackId>,
    message: String,
) -> AlertEvent {
    AlertEvent {
        rule_id: rule.id.clone(),
        severity: rule.severity,
        frequency_hz,
        power_dbm,
        timestamp_us: frame.timestamp_us,
        sequence: frame.sequence,
        track_id,
        message,
    }
}

pub fn validate_rules(rules: &[AlertRule], power_floor_dbm: f64) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for rule in rules {
        rule.validate(power_floor_dbm)?;
        if !seen.insert(rule.id.as_str()) {
            return Err(ConfigError::DuplicateRule(rule.id.clone()));
        }
    }
    Ok(())
}
