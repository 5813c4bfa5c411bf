use log::debug;
use serde::Serialize;

use crate::errors::LapsyncError;
use crate::sync::AlignedLap;
use crate::units;

/// The grid range both laps define. Deltas are only computed inside it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaRange {
    pub start_index: usize,
    /// Exclusive
    pub end_index: usize,
    pub start_distance: Option<f64>,
    pub end_distance: Option<f64>,
    /// True when either lap stops before the end of the grid
    pub truncated: bool,
}

/// The grid segment where the subject gained or lost the most time.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPoint {
    pub grid_index: usize,
    pub distance: f64,
    /// Subject minus reference time over the segment, seconds
    pub time_delta: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapDelta {
    pub subject_lap: u32,
    pub reference_lap: u32,
    pub distance: Vec<f64>,
    /// Subject minus reference speed at each grid point, km/h
    pub speed_delta: Vec<f64>,
    /// Running subject minus reference time, seconds. Positive means the
    /// subject is behind.
    pub cumulative_time_delta: Vec<f64>,
    /// Subject lap time minus reference lap time
    pub time_difference: f64,
    pub range: DeltaRange,
    pub biggest_gain: Option<KeyPoint>,
    pub biggest_loss: Option<KeyPoint>,
}

impl LapDelta {
    /// Final value of the integrated time delta
    pub fn integrated_time_delta(&self) -> f64 {
        self.cumulative_time_delta.last().copied().unwrap_or(0.0)
    }
}

/// Speed and cumulative time difference between two laps on the same grid.
///
/// The cumulative series integrates `step / speed` per segment for both laps.
/// It is not forced to match `time_difference`; both are reported.
pub fn compute_delta(
    subject: &AlignedLap,
    reference: &AlignedLap,
    subject_lap_time: f64,
    reference_lap_time: f64,
) -> Result<LapDelta, LapsyncError> {
    subject.ensure_same_grid(reference)?;

    let overlap = subject.defined_len().min(reference.defined_len());
    let pairs = || subject.samples[..overlap].iter().zip(&reference.samples[..overlap]);

    let speed_delta: Vec<f64> = pairs().map(|(s, r)| s.speed - r.speed).collect();
    let distance: Vec<f64> = pairs().map(|(s, _)| s.distance).collect();

    let segment_deltas: Vec<f64> = subject.samples[..overlap]
        .windows(2)
        .zip(reference.samples[..overlap].windows(2))
        .map(|(s, r)| {
            let step = s[1].distance - s[0].distance;
            units::segment_time(step, s[0].speed, s[1].speed)
                - units::segment_time(step, r[0].speed, r[1].speed)
        })
        .collect();

    let mut cumulative_time_delta = Vec::with_capacity(overlap);
    if overlap > 0 {
        cumulative_time_delta.push(0.0);
    }
    let mut running = 0.0;
    for delta in &segment_deltas {
        running += delta;
        cumulative_time_delta.push(running);
    }

    let key_point = |index: usize| KeyPoint {
        grid_index: index,
        distance: distance[index],
        time_delta: segment_deltas[index],
    };
    let biggest_gain = (0..segment_deltas.len())
        .min_by(|a, b| segment_deltas[*a].total_cmp(&segment_deltas[*b]))
        .map(key_point);
    let biggest_loss = (0..segment_deltas.len())
        .max_by(|a, b| segment_deltas[*a].total_cmp(&segment_deltas[*b]))
        .map(key_point);

    let range = DeltaRange {
        start_index: 0,
        end_index: overlap,
        start_distance: distance.first().copied(),
        end_distance: distance.last().copied(),
        truncated: overlap < subject.grid_len,
    };
    if range.truncated {
        debug!(
            "Delta between laps {} and {} truncated to {} of {} grid points",
            subject.lap_number, reference.lap_number, overlap, subject.grid_len
        );
    }

    Ok(LapDelta {
        subject_lap: subject.lap_number,
        reference_lap: reference.lap_number,
        distance,
        speed_delta,
        cumulative_time_delta,
        time_difference: subject_lap_time - reference_lap_time,
        range,
        biggest_gain,
        biggest_loss,
    })
}
