use std::collections::BTreeSet;

use serde::Serialize;

use crate::errors::LapsyncError;
use crate::telemetry::{Channel, TelemetrySample};

pub mod resampler;

pub use resampler::{ResamplerConfig, resample, resample_onto};

/// An aligned sample has the same shape as a recorded one; only its distance
/// is a grid checkpoint instead of a capture position.
pub type AlignedSample = TelemetrySample;

/// Relative tolerance used when checking two aligned laps share a grid
const GRID_STEP_TOLERANCE: f64 = 1e-9;

/// Evenly spaced distance checkpoints from 0 to the track length, inclusive.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialGrid {
    track_length: f64,
    step: f64,
    #[serde(skip)]
    points: Vec<f64>,
}

impl SpatialGrid {
    pub fn new(size: usize, track_length: f64) -> Result<Self, LapsyncError> {
        if size <= 1 {
            return Err(LapsyncError::GridMismatch {
                reason: format!("grid needs at least 2 points, got {}", size),
            });
        }
        if !(track_length.is_finite() && track_length > 0.0) {
            return Err(LapsyncError::GridMismatch {
                reason: format!("total distance must be positive, got {}", track_length),
            });
        }
        let last = (size - 1) as f64;
        let mut points: Vec<f64> = (0..size)
            .map(|i| track_length * i as f64 / last)
            .collect();
        // Pin the final checkpoint so it never drifts past the recorded distance
        points[size - 1] = track_length;
        Ok(Self {
            track_length,
            step: track_length / last,
            points,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn track_length(&self) -> f64 {
        self.track_length
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }
}

/// Compares two grids given as (point count, step).
pub(crate) fn same_grid(a: (usize, f64), b: (usize, f64)) -> bool {
    a.0 == b.0 && (a.1 - b.1).abs() <= GRID_STEP_TOLERANCE * a.1.abs().max(1.0)
}

/// One lap resampled onto a [`SpatialGrid`].
///
/// `samples[i]` sits at grid point `i`. A lap that ends before the track
/// length only defines a prefix of the grid, so `samples.len()` can be
/// smaller than `grid_len`; the missing tail is undefined, never synthesized.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedLap {
    pub lap_number: u32,
    pub lap_time: f64,
    pub grid_len: usize,
    pub grid_step: f64,
    pub track_length: f64,
    pub samples: Vec<AlignedSample>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub absent_channels: BTreeSet<Channel>,
}

impl AlignedLap {
    /// Number of grid points with a defined value
    pub fn defined_len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_truncated(&self) -> bool {
        self.samples.len() < self.grid_len
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        !self.absent_channels.contains(&channel)
    }

    pub fn speeds(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.speed)
    }

    /// Values of one channel at every defined grid point. Missing optional
    /// channel values read as 0.
    pub fn channel(&self, channel: Channel) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| s.channel(channel).unwrap_or_default())
            .collect()
    }

    pub fn shares_grid_with(&self, other: &AlignedLap) -> bool {
        same_grid(
            (self.grid_len, self.grid_step),
            (other.grid_len, other.grid_step),
        )
    }

    pub(crate) fn ensure_same_grid(&self, other: &AlignedLap) -> Result<(), LapsyncError> {
        if self.shares_grid_with(other) {
            Ok(())
        } else {
            Err(LapsyncError::GridMismatch {
                reason: format!(
                    "lap {} uses {} points every {:.3} m, lap {} uses {} points every {:.3} m",
                    self.lap_number,
                    self.grid_len,
                    self.grid_step,
                    other.lap_number,
                    other.grid_len,
                    other.grid_step
                ),
            })
        }
    }
}
