use log::debug;
use serde::{Deserialize, Serialize};

use super::{AlignedLap, AlignedSample, SpatialGrid};
use crate::errors::LapsyncError;
use crate::telemetry::Lap;

/// Default number of grid points per lap
pub const DEFAULT_GRID_SIZE: usize = 500;
/// Grid points this close past the last recorded sample still count as recorded
const EDGE_TOLERANCE_M: f64 = 1e-6;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplerConfig {
    pub grid_size: usize,
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
        }
    }
}

impl ResamplerConfig {
    pub fn validate(&self) -> Result<(), LapsyncError> {
        if self.grid_size <= 1 {
            return Err(LapsyncError::InvalidConfig {
                field: "resampler.grid_size".to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        Ok(())
    }
}

/// Builds one grid spanning the longest lap and resamples every lap onto it,
/// so that index `i` refers to the same track position in every result.
pub fn resample(
    laps: &[Lap],
    grid_size: usize,
) -> Result<(SpatialGrid, Vec<AlignedLap>), LapsyncError> {
    let track_length = laps.iter().map(Lap::distance).fold(0.0, f64::max);
    if laps.is_empty() {
        return Err(LapsyncError::GridMismatch {
            reason: "no laps to resample".to_string(),
        });
    }
    let grid = SpatialGrid::new(grid_size, track_length)?;
    debug!(
        "Resampling {} laps onto {} points every {:.2} m",
        laps.len(),
        grid.len(),
        grid.step()
    );
    let aligned = laps.iter().map(|lap| resample_onto(lap, &grid)).collect();
    Ok((grid, aligned))
}

/// Resamples a lap onto an existing grid with linear interpolation between
/// the two samples bracketing each checkpoint.
///
/// Checkpoints before the first sample take the first sample's values.
/// Checkpoints past the last sample are left undefined.
pub fn resample_onto(lap: &Lap, grid: &SpatialGrid) -> AlignedLap {
    let mut samples = Vec::with_capacity(grid.len());
    if let (Some(first), Some(last)) = (lap.samples.first(), lap.samples.last()) {
        let mut cursor = 0;
        for &distance in grid.points() {
            if distance > last.distance + EDGE_TOLERANCE_M {
                break;
            }
            if distance <= first.distance {
                samples.push(at_distance(first, distance));
                continue;
            }
            if distance >= last.distance {
                samples.push(at_distance(last, distance));
                continue;
            }
            while cursor + 1 < lap.samples.len() && lap.samples[cursor + 1].distance < distance {
                cursor += 1;
            }
            let (a, b) = (&lap.samples[cursor], &lap.samples[cursor + 1]);
            let span = b.distance - a.distance;
            let frac = if span > 0.0 {
                ((distance - a.distance) / span).clamp(0.0, 1.0)
            } else {
                0.0
            };
            samples.push(interpolate(a, b, frac, distance));
        }
    }

    AlignedLap {
        lap_number: lap.lap_number,
        lap_time: lap.lap_time,
        grid_len: grid.len(),
        grid_step: grid.step(),
        track_length: grid.track_length(),
        samples,
        absent_channels: lap.absent_channels.clone(),
    }
}

fn at_distance(sample: &AlignedSample, distance: f64) -> AlignedSample {
    AlignedSample {
        distance,
        ..sample.clone()
    }
}

fn interpolate(a: &AlignedSample, b: &AlignedSample, frac: f64, distance: f64) -> AlignedSample {
    let lerp = |x: f64, y: f64| x + (y - x) * frac;
    let lerp_opt = |x: Option<f64>, y: Option<f64>| match (x, y) {
        (Some(x), Some(y)) => Some(lerp(x, y)),
        (x, y) => x.or(y),
    };
    AlignedSample {
        distance,
        timestamp: lerp_opt(a.timestamp, b.timestamp),
        speed: lerp(a.speed, b.speed),
        throttle: lerp(a.throttle, b.throttle),
        brake_pressure_front: lerp(a.brake_pressure_front, b.brake_pressure_front),
        steering_angle: lerp(a.steering_angle, b.steering_angle),
        // Gear is discrete, hold the lower bracket until the next sample
        gear: if frac < 1.0 { a.gear } else { b.gear },
        rpm: lerp(a.rpm, b.rpm),
        position_x: lerp(a.position_x, b.position_x),
        position_y: lerp(a.position_y, b.position_y),
        longitudinal_accel: lerp_opt(a.longitudinal_accel, b.longitudinal_accel),
        lateral_accel: lerp_opt(a.lateral_accel, b.lateral_accel),
    }
}
