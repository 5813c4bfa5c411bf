use std::collections::BTreeSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{Channel, Lap, RawSample, TelemetrySample};
use crate::errors::LapsyncError;
use crate::units;

/// Samples closer than this many meters are merged into one
const DEFAULT_MERGE_EPSILON_M: f64 = 0.05;
/// Distance going backwards by more than this counts as a capture order disagreement
const DEFAULT_ORDER_TOLERANCE_M: f64 = 1.0;
const MAX_THROTTLE_PCT: f64 = 100.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub merge_epsilon_m: f64,
    pub order_tolerance_m: f64,
    /// Shift every lap so its first sample sits at 0 m
    pub rebase_distance: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            merge_epsilon_m: DEFAULT_MERGE_EPSILON_M,
            order_tolerance_m: DEFAULT_ORDER_TOLERANCE_M,
            rebase_distance: true,
        }
    }
}

impl NormalizerConfig {
    pub fn validate(&self) -> Result<(), LapsyncError> {
        if !(self.merge_epsilon_m.is_finite() && self.merge_epsilon_m > 0.0) {
            return Err(LapsyncError::InvalidConfig {
                field: "normalizer.merge_epsilon_m".to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        if !(self.order_tolerance_m.is_finite() && self.order_tolerance_m >= 0.0) {
            return Err(LapsyncError::InvalidConfig {
                field: "normalizer.order_tolerance_m".to_string(),
                reason: "must be zero or positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Column-major working copy of one lap's samples
struct Columns {
    distance: Vec<Option<f64>>,
    values: Vec<Vec<Option<f64>>>,
}

impl Columns {
    fn from_raw(raw: &[RawSample]) -> Self {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        Self {
            distance: raw.iter().map(|r| finite(r.distance)).collect(),
            values: Channel::ALL
                .iter()
                .map(|c| raw.iter().map(|r| finite(r.channel(*c))).collect())
                .collect(),
        }
    }

    fn column(&self, channel: Channel) -> &[Option<f64>] {
        &self.values[channel_index(channel)]
    }

    fn len(&self) -> usize {
        self.distance.len()
    }

    fn reorder(&mut self, order: &[usize]) {
        self.distance = order.iter().map(|&i| self.distance[i]).collect();
        for column in self.values.iter_mut() {
            *column = order.iter().map(|&i| column[i]).collect();
        }
    }
}

fn channel_index(channel: Channel) -> usize {
    Channel::ALL
        .iter()
        .position(|c| *c == channel)
        .unwrap_or_default()
}

/// Turns one lap of raw samples into a [`Lap`] with strictly increasing
/// distance and every required channel filled.
///
/// Steps, in order:
/// 1. derive distance by integrating speed over time when the lap carries none
/// 2. interpolate missing distance values between neighbouring captures
/// 3. sort by distance, warning when capture order disagreed
/// 4. interpolate missing channel values over distance, holding the nearest
///    value at the edges; channels never recorded are zero-filled and listed
///    in [`Lap::absent_channels`]
/// 5. clamp channels into their physical ranges
/// 6. merge samples closer than `merge_epsilon_m` by averaging them
///
/// Fails with [`LapsyncError::InsufficientData`] when fewer than two samples remain.
pub fn normalize(
    lap_number: u32,
    raw: &[RawSample],
    config: &NormalizerConfig,
) -> Result<Lap, LapsyncError> {
    let mut columns = Columns::from_raw(raw);

    if columns.distance.iter().all(Option::is_none) {
        derive_distance(&mut columns);
    }

    // Missing distance is filled from neighbouring captures before sorting
    let capture_index: Vec<f64> = (0..columns.len()).map(|i| i as f64).collect();
    interpolate_gaps(&capture_index, &mut columns.distance);

    let keep: Vec<usize> = (0..columns.len())
        .filter(|&i| columns.distance[i].is_some())
        .collect();
    columns.reorder(&keep);
    let distance: Vec<f64> = columns.distance.iter().flatten().copied().collect();
    if distance.len() < 2 {
        return Err(LapsyncError::InsufficientData {
            lap_number,
            valid_samples: distance.len(),
        });
    }

    let out_of_order = distance
        .windows(2)
        .filter(|w| w[1] < w[0] - config.order_tolerance_m)
        .count();
    if out_of_order > 0 {
        warn!(
            "Lap {}: {} samples were captured out of distance order, using distance order",
            lap_number, out_of_order
        );
    }

    let mut order: Vec<usize> = (0..distance.len()).collect();
    order.sort_by(|a, b| distance[*a].total_cmp(&distance[*b]));
    columns.reorder(&order);
    let distance: Vec<f64> = order.iter().map(|&i| distance[i]).collect();

    if columns.column(Channel::Speed).iter().all(Option::is_none) {
        return Err(LapsyncError::MissingChannel {
            lap_number,
            channel: Channel::Speed.to_string(),
        });
    }

    let mut absent_channels = BTreeSet::new();
    for channel in Channel::ALL {
        let column = &mut columns.values[channel_index(channel)];
        if column.iter().all(Option::is_none) {
            absent_channels.insert(channel);
            if !channel.is_optional() {
                warn!(
                    "Lap {}: channel {} was never recorded, filling with 0",
                    lap_number, channel
                );
                column.iter_mut().for_each(|v| *v = Some(0.0));
            }
            continue;
        }
        interpolate_gaps(&distance, column);
    }

    let samples: Vec<TelemetrySample> = (0..distance.len())
        .map(|i| build_sample(distance[i], |c| columns.column(c)[i]))
        .collect();
    let mut samples = merge_close_samples(samples, config.merge_epsilon_m);
    if samples.len() < 2 {
        return Err(LapsyncError::InsufficientData {
            lap_number,
            valid_samples: samples.len(),
        });
    }

    if config.rebase_distance {
        let start = samples[0].distance;
        samples.iter_mut().for_each(|s| s.distance -= start);
    }

    let lap_time = lap_time(&samples);
    debug!(
        "Normalized lap {}: {} raw samples -> {} samples over {:.1} m in {:.3} s",
        lap_number,
        raw.len(),
        samples.len(),
        samples.last().map(|s| s.distance).unwrap_or(0.0),
        lap_time
    );

    Ok(Lap {
        lap_number,
        lap_time,
        samples,
        absent_channels,
    })
}

/// Integrates speed over elapsed time, in timestamp order, to produce a
/// distance for every sample that has a timestamp.
fn derive_distance(columns: &mut Columns) {
    let timestamps = columns.column(Channel::Timestamp).to_vec();
    let speeds = columns.column(Channel::Speed).to_vec();
    let mut timed: Vec<usize> = (0..columns.len())
        .filter(|&i| timestamps[i].is_some())
        .collect();
    if timed.len() < 2 {
        return;
    }
    timed.sort_by(|a, b| {
        timestamps[*a]
            .unwrap_or_default()
            .total_cmp(&timestamps[*b].unwrap_or_default())
    });

    debug!("Deriving distance from speed over {} timed samples", timed.len());
    let mut travelled = 0.0;
    columns.distance[timed[0]] = Some(0.0);
    for pair in timed.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        let dt = timestamps[cur].unwrap_or_default() - timestamps[prev].unwrap_or_default();
        let speed = match (speeds[prev], speeds[cur]) {
            (Some(a), Some(b)) => (a + b) / 2.0,
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => 0.0,
        };
        travelled += units::distance_travelled(speed, dt.max(0.0));
        columns.distance[cur] = Some(travelled);
    }
}

/// Linear interpolation of missing values against `xs`. Values missing at
/// either end hold the nearest known value.
pub(crate) fn interpolate_gaps(xs: &[f64], ys: &mut [Option<f64>]) {
    let known: Vec<usize> = (0..ys.len()).filter(|&i| ys[i].is_some()).collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return;
    };
    let first_value = ys[first];
    let last_value = ys[last];
    ys[..first].iter_mut().for_each(|y| *y = first_value);
    ys[last + 1..].iter_mut().for_each(|y| *y = last_value);

    for pair in known.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if right - left < 2 {
            continue;
        }
        let (Some(y0), Some(y1)) = (ys[left], ys[right]) else {
            continue;
        };
        let span = xs[right] - xs[left];
        for i in left + 1..right {
            let frac = if span > 0.0 {
                ((xs[i] - xs[left]) / span).clamp(0.0, 1.0)
            } else {
                0.0
            };
            ys[i] = Some(y0 + (y1 - y0) * frac);
        }
    }
}

fn build_sample(distance: f64, value: impl Fn(Channel) -> Option<f64>) -> TelemetrySample {
    let filled = |c: Channel| value(c).unwrap_or_default();
    TelemetrySample {
        distance,
        timestamp: value(Channel::Timestamp),
        speed: filled(Channel::Speed).max(0.0),
        throttle: filled(Channel::Throttle).clamp(0.0, MAX_THROTTLE_PCT),
        brake_pressure_front: filled(Channel::BrakePressureFront).max(0.0),
        steering_angle: filled(Channel::SteeringAngle),
        gear: filled(Channel::Gear).round().max(0.0) as u32,
        rpm: filled(Channel::Rpm).max(0.0),
        position_x: filled(Channel::PositionX),
        position_y: filled(Channel::PositionY),
        longitudinal_accel: value(Channel::LongitudinalAccel),
        lateral_accel: value(Channel::LateralAccel),
    }
}

/// Averages runs of consecutive samples that sit less than `epsilon` apart.
fn merge_close_samples(samples: Vec<TelemetrySample>, epsilon: f64) -> Vec<TelemetrySample> {
    let mut merged = Vec::with_capacity(samples.len());
    let mut group: Vec<TelemetrySample> = Vec::new();
    for sample in samples {
        let starts_new_group = group
            .last()
            .is_some_and(|last| sample.distance - last.distance >= epsilon);
        if starts_new_group {
            merged.push(average(&group));
            group.clear();
        }
        group.push(sample);
    }
    if !group.is_empty() {
        merged.push(average(&group));
    }
    merged
}

fn average(group: &[TelemetrySample]) -> TelemetrySample {
    if let [single] = group {
        return single.clone();
    }
    let n = group.len() as f64;
    let mean = |f: fn(&TelemetrySample) -> f64| group.iter().map(f).sum::<f64>() / n;
    let mean_opt = |f: fn(&TelemetrySample) -> Option<f64>| {
        let values: Vec<f64> = group.iter().filter_map(f).collect();
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };
    TelemetrySample {
        distance: mean(|s| s.distance),
        timestamp: mean_opt(|s| s.timestamp),
        speed: mean(|s| s.speed),
        throttle: mean(|s| s.throttle),
        brake_pressure_front: mean(|s| s.brake_pressure_front),
        steering_angle: mean(|s| s.steering_angle),
        gear: mean(|s| s.gear as f64).round() as u32,
        rpm: mean(|s| s.rpm),
        position_x: mean(|s| s.position_x),
        position_y: mean(|s| s.position_y),
        longitudinal_accel: mean_opt(|s| s.longitudinal_accel),
        lateral_accel: mean_opt(|s| s.lateral_accel),
    }
}

/// Timestamp span when the lap is timed, otherwise the integrated traversal time.
fn lap_time(samples: &[TelemetrySample]) -> f64 {
    let timestamps: Vec<f64> = samples.iter().filter_map(|s| s.timestamp).collect();
    let span = match (
        timestamps.iter().copied().reduce(f64::min),
        timestamps.iter().copied().reduce(f64::max),
    ) {
        (Some(min), Some(max)) => max - min,
        _ => 0.0,
    };
    if span > 0.0 {
        return span;
    }
    samples
        .windows(2)
        .map(|w| units::segment_time(w[1].distance - w[0].distance, w[0].speed, w[1].speed))
        .sum()
}
