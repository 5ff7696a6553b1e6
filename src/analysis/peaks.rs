//! Spectral peak extraction and frame-to-frame peak tracking.
//!
//! Candidates are local maxima that stand `noise_floor_offset_db` above the
//! median of a sliding bin window. Tracks live in an id-keyed table; ids come
//! from a counter that only moves forward, so an expired track's identity is
//! never handed to a later peak.

use crate::core::SpectrumFrame;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Required margin above the local noise estimate
    pub noise_floor_offset_db: f64,

    /// Width of the sliding median used as the local noise estimate
    pub noise_window_bins: usize,

    /// Candidates closer than this are merged, keeping the stronger one
    pub peak_min_separation_hz: f64,

    /// Maximum frequency jump between frames for a candidate to continue a track
    pub peak_track_tolerance_hz: f64,

    /// Consecutive unmatched frames a track survives
    pub peak_miss_tolerance: u32,

    pub history_len: usize,

    /// Strongest candidates kept per frame
    pub max_peaks: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            noise_floor_offset_db: 10.0,
            noise_window_bins: 32,
            peak_min_separation_hz: 10_000.0,
            peak_track_tolerance_hz: 25_000.0,
            peak_miss_tolerance: 3,
            history_len: 64,
            max_peaks: 16,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.noise_floor_offset_db.is_finite() {
            return Err(ConfigError::out_of_range(
                "noise_floor_offset_db",
                self.noise_floor_offset_db,
                "finite",
            ));
        }
        if self.noise_window_bins < 3 {
            return Err(ConfigError::out_of_range(
                "noise_window_bins",
                self.noise_window_bins as f64,
                "at least 3",
            ));
        }
        if !(self.peak_min_separation_hz.is_finite() && self.peak_min_separation_hz >= 0.0) {
            return Err(ConfigError::out_of_range(
                "peak_min_separation_hz",
                self.peak_min_separation_hz,
                "a non-negative finite number",
            ));
        }
        if !(self.peak_track_tolerance_hz.is_finite() && self.peak_track_tolerance_hz > 0.0) {
            return Err(ConfigError::out_of_range(
                "peak_track_tolerance_hz",
                self.peak_track_tolerance_hz,
                "a positive finite number",
            ));
        }
        if self.history_len == 0 {
            return Err(ConfigError::out_of_range("history_len", 0.0, "at least 1"));
        }
        if self.max_peaks == 0 {
            return Err(ConfigError::out_of_range("max_peaks", 0.0, "at least 1"));
        }
        Ok(())
    }
}

/// Local maximum found in a single frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakCandidate {
    pub frequency_hz: f64,
    pub power_dbm: f64,
    pub bin_index: usize,
    /// Median power of the surrounding bins
    pub noise_dbm: f64,
    pub snr_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp_us: u64,
    pub frequency_hz: f64,
    pub power_dbm: f64,
}

/// A peak followed across frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakTrack {
    pub id: TrackId,
    pub frequency_hz: f64,
    pub power_dbm: f64,
    pub snr_db: f64,
    pub bin_index: usize,

    /// Frames in which the track was matched, including the one that spawned it
    pub age: u32,

    /// Consecutive non-degraded frames without a match
    pub misses: u32,

    pub first_seen_us: u64,
    pub last_seen_us: u64,
    pub history: VecDeque<TrackPoint>,
}

impl PeakTrack {
    fn spawn(id: TrackId, candidate: &PeakCandidate, timestamp_us: u64, history_len: usize) -> Self {
        let mut track = Self {
            id,
            frequency_hz: candidate.frequency_hz,
            power_dbm: candidate.power_dbm,
            snr_db: candidate.snr_db,
            bin_index: candidate.bin_index,
            age: 0,
            misses: 0,
            first_seen_us: timestamp_us,
            last_seen_us: timestamp_us,
            history: VecDeque::with_capacity(history_len),
        };
        track.observe(candidate, timestamp_us, history_len);
        track
    }

    fn observe(&mut self, candidate: &PeakCandidate, timestamp_us: u64, history_len: usize) {
        self.frequency_hz = candidate.frequency_hz;
        self.power_dbm = candidate.power_dbm;
        self.snr_db = candidate.snr_db;
        self.bin_index = candidate.bin_index;
        self.age += 1;
        self.misses = 0;
        self.last_seen_us = timestamp_us;

        if self.history.len() == history_len {
            self.history.pop_front();
        }
        self.history.push_back(TrackPoint {
            timestamp_us,
            frequency_hz: candidate.frequency_hz,
            power_dbm: candidate.power_dbm,
        });
    }

    /// Frequency change between the oldest and newest history entries
    pub fn drift_hz(&self) -> f64 {
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) => last.frequency_hz - first.frequency_hz,
            _ => 0.0,
        }
    }
}

pub struct PeakTracker {
    config: TrackerConfig,
    tracks: BTreeMap<TrackId, PeakTrack>,
    next_id: u64,
}

impl PeakTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Local maxima above the local noise estimate, merged by minimum separation
    pub fn find_candidates(&self, frame: &SpectrumFrame) -> Vec<PeakCandidate> {
        let power = &frame.power_dbm;
        let n = power.len();
        if n < 3 {
            return Vec::new();
        }

        let half = self.config.noise_window_bins / 2;
        let mut window = Vec::with_capacity(self.config.noise_window_bins + 1);
        let mut raw = Vec::new();

        for i in 1..n - 1 {
            let p = power[i];
            if !(p > power[i - 1] && p > power[i + 1]) {
                continue;
            }

            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            window.clear();
            window.extend_from_slice(&power[lo..hi]);
            let noise = median(&mut window);

            if p > noise + self.config.noise_floor_offset_db {
                raw.push(PeakCandidate {
                    frequency_hz: frame.frequency_at(i),
                    power_dbm: p,
                    bin_index: i,
                    noise_dbm: noise,
                    snr_db: p - noise,
                });
            }
        }

        self.merge_candidates(raw)
    }

    fn merge_candidates(&self, mut raw: Vec<PeakCandidate>) -> Vec<PeakCandidate> {
        // Strongest first, lower frequency wins ties
        raw.sort_by(|a, b| {
            b.power_dbm
                .total_cmp(&a.power_dbm)
                .then(a.frequency_hz.total_cmp(&b.frequency_hz))
        });

        let separation = self.config.peak_min_separation_hz;
        let mut kept: Vec<PeakCandidate> = Vec::new();
        for candidate in raw {
            if kept.len() == self.config.max_peaks {
                break;
            }
            let too_close = kept
                .iter()
                .any(|k| (k.frequency_hz - candidate.frequency_hz).abs() < separation);
            if !too_close {
                kept.push(candidate);
            }
        }

        kept.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        kept
    }

    /// Advance the track table by one frame and return a snapshot of it.
    ///
    /// Degraded frames leave the table untouched: nothing spawns, nothing
    /// ages and no miss is counted.
    pub fn update(&mut self, frame: &SpectrumFrame) -> Vec<PeakTrack> {
        if frame.degraded {
            log::debug!("Frame {} degraded, track table unchanged", frame.sequence);
            return self.snapshot();
        }

        let candidates = self.find_candidates(frame);
        let tolerance = self.config.peak_track_tolerance_hz;

        // Every (track, candidate) pair inside the tolerance window
        let mut pairs: Vec<(f64, TrackId, usize)> = Vec::new();
        for (id, track) in &self.tracks {
            for (index, candidate) in candidates.iter().enumerate() {
                let delta = (candidate.frequency_hz - track.frequency_hz).abs();
                if delta <= tolerance {
                    pairs.push((delta, *id, index));
                }
            }
        }

        // Smallest delta first; older (lower) id wins ties
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut claimed = vec![false; candidates.len()];
        let mut matched: BTreeMap<TrackId, usize> = BTreeMap::new();
        for (_, id, index) in pairs {
            if claimed[index] || matched.contains_key(&id) {
                continue;
            }
            claimed[index] = true;
            matched.insert(id, index);
        }

        let history_len = self.config.history_len;
        let miss_tolerance = self.config.peak_miss_tolerance;
        self.tracks.retain(|id, track| match matched.get(id) {
            Some(&index) => {
                track.observe(&candidates[index], frame.timestamp_us, history_len);
                true
            }
            None => {
                track.misses += 1;
                if track.misses > miss_tolerance {
                    log::debug!(
                        "Track {} lost at {:.0} Hz after {} frames",
                        id,
                        track.frequency_hz,
                        track.age
                    );
                    false
                } else {
                    true
                }
            }
        });

        for (index, candidate) in candidates.iter().enumerate() {
            if claimed[index] {
                continue;
            }
            let id = TrackId(self.next_id);
            self.next_id += 1;
            self.tracks
                .insert(id, PeakTrack::spawn(id, candidate, frame.timestamp_us, history_len));
        }

        self.snapshot()
    }

    /// Current tracks ordered by id (oldest first)
    pub fn snapshot(&self) -> Vec<PeakTrack> {
        self.tracks.values().cloned().collect()
    }

    pub fn get(&self, id: TrackId) -> Option<&PeakTrack> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop every track; ids keep counting from where they were
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn test_track_id_display() {
        assert_eq!(TrackId(42).to_string(), "T42");
    }
}
