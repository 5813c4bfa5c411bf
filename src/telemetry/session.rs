use std::collections::BTreeMap;

use itertools::Itertools;
use log::{info, warn};
use serde::Serialize;

use super::{Lap, NormalizerConfig, RawSample, normalize};
use crate::errors::LapsyncError;

/// Laps with fewer samples are not considered for best lap selection
pub const MIN_LAP_SAMPLES: usize = 10;
/// Consistency score points lost per second of lap time standard deviation
const CONSISTENCY_PENALTY_PER_SECOND: f64 = 10.0;

/// A lap that could not be normalized, kept with the reason.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLap {
    pub lap_number: u32,
    pub reason: String,
}

/// Per-lap statistics returned alongside the lap list.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapSummary {
    pub lap_number: u32,
    pub lap_time: f64,
    pub distance: f64,
    pub sample_count: usize,
    pub average_speed: f64,
    pub max_speed: f64,
    pub average_throttle: f64,
    pub max_brake: f64,
}

impl LapSummary {
    pub fn from_lap(lap: &Lap) -> Self {
        let n = lap.samples.len().max(1) as f64;
        Self {
            lap_number: lap.lap_number,
            lap_time: lap.lap_time,
            distance: lap.distance(),
            sample_count: lap.samples.len(),
            average_speed: lap.samples.iter().map(|s| s.speed).sum::<f64>() / n,
            max_speed: lap.samples.iter().map(|s| s.speed).fold(0.0, f64::max),
            average_throttle: lap.samples.iter().map(|s| s.throttle).sum::<f64>() / n,
            max_brake: lap
                .samples
                .iter()
                .map(|s| s.brake_pressure_front)
                .fold(0.0, f64::max),
        }
    }
}

/// All laps recorded in one telemetry file.
#[derive(Clone, Debug, Default)]
pub struct Session {
    laps: BTreeMap<u32, Lap>,
    rejected: Vec<RejectedLap>,
}

impl Session {
    /// Groups samples by lap number, keeping capture order within each lap,
    /// and normalizes every lap. Samples without a lap number belong to lap 0.
    ///
    /// Laps that fail normalization are kept in [`Session::rejected`] rather
    /// than failing the whole session.
    pub fn from_samples(samples: Vec<RawSample>, config: &NormalizerConfig) -> Self {
        let grouped = samples
            .into_iter()
            .into_group_map_by(|s| s.lap_number.unwrap_or(0));

        let mut session = Session::default();
        for (lap_number, raw) in grouped.into_iter().sorted_by_key(|(n, _)| *n) {
            match normalize(lap_number, &raw, config) {
                Ok(lap) => {
                    session.laps.insert(lap_number, lap);
                }
                Err(e) => {
                    warn!("Skipping lap {}: {}", lap_number, e);
                    session.rejected.push(RejectedLap {
                        lap_number,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Session has {} usable laps, {} rejected",
            session.laps.len(),
            session.rejected.len()
        );
        session
    }

    pub fn from_laps(laps: impl IntoIterator<Item = Lap>) -> Self {
        Self {
            laps: laps.into_iter().map(|l| (l.lap_number, l)).collect(),
            rejected: Vec::new(),
        }
    }

    pub fn lap_numbers(&self) -> Vec<u32> {
        self.laps.keys().copied().collect()
    }

    pub fn laps(&self) -> impl Iterator<Item = &Lap> {
        self.laps.values()
    }

    pub fn rejected(&self) -> &[RejectedLap] {
        &self.rejected
    }

    pub fn lap(&self, lap_number: u32) -> Result<&Lap, LapsyncError> {
        self.laps
            .get(&lap_number)
            .ok_or(LapsyncError::LapNotFound { lap_number })
    }

    pub fn summary(&self, lap_number: u32) -> Result<LapSummary, LapsyncError> {
        self.lap(lap_number).map(LapSummary::from_lap)
    }

    pub fn summaries(&self) -> Vec<LapSummary> {
        self.laps.values().map(LapSummary::from_lap).collect()
    }

    /// Fastest lap among those with enough samples to be a complete lap.
    pub fn best_lap(&self) -> Option<&Lap> {
        self.timed_laps().min_by(|a, b| a.lap_time.total_cmp(&b.lap_time))
    }

    /// The requested lap, or the best lap when none is given.
    pub fn reference_lap(&self, lap_number: Option<u32>) -> Result<&Lap, LapsyncError> {
        match lap_number {
            Some(lap_number) => self.lap(lap_number),
            None => self.best_lap().ok_or_else(|| LapsyncError::NoBaselineLap {
                role: "reference".to_string(),
                reason: format!(
                    "no lap has {} samples and a positive lap time",
                    MIN_LAP_SAMPLES
                ),
            }),
        }
    }

    /// Every lap except `lap_number`, for building a statistical baseline.
    pub fn history_laps(&self, lap_number: u32) -> Result<Vec<&Lap>, LapsyncError> {
        let history: Vec<&Lap> = self
            .laps
            .values()
            .filter(|l| l.lap_number != lap_number)
            .collect();
        if history.is_empty() {
            return Err(LapsyncError::NoBaselineLap {
                role: "history".to_string(),
                reason: format!("lap {} is the only lap in the session", lap_number),
            });
        }
        Ok(history)
    }

    /// 100 minus ten points per second of lap time standard deviation,
    /// clamped to 0-100. `None` with fewer than two timed laps.
    pub fn consistency_score(&self) -> Option<f64> {
        let times: Vec<f64> = self.timed_laps().map(|l| l.lap_time).collect();
        if times.len() < 2 {
            return None;
        }
        let mean = times.iter().sum::<f64>() / times.len() as f64;
        let variance =
            times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / (times.len() - 1) as f64;
        Some((100.0 - variance.sqrt() * CONSISTENCY_PENALTY_PER_SECOND).clamp(0.0, 100.0))
    }

    fn timed_laps(&self) -> impl Iterator<Item = &Lap> {
        self.laps
            .values()
            .filter(|l| l.samples.len() >= MIN_LAP_SAMPLES && l.lap_time > 0.0)
    }
}
