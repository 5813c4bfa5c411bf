use std::collections::BTreeMap;
use std::fmt::Display;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::zone_aggregator::{self, ZoneSpec};
use crate::errors::LapsyncError;
use crate::sync::{AlignedLap, AlignedSample, SpatialGrid, resample_onto};
use crate::telemetry::{Channel, Lap};
use crate::units;

/// Score substituted for a component whose input channel is missing
pub const NEUTRAL_SCORE: f64 = 50.0;
/// Allowed drift of the weight sum from 1.0
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// The six CPI components, serialized with their fixed keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreComponent {
    Speed,
    BrakeEfficiency,
    ThrottleSmoothness,
    TireStress,
    TurnEntry,
    Consistency,
}

impl ScoreComponent {
    pub const ALL: [ScoreComponent; 6] = [
        ScoreComponent::Speed,
        ScoreComponent::BrakeEfficiency,
        ScoreComponent::ThrottleSmoothness,
        ScoreComponent::TireStress,
        ScoreComponent::TurnEntry,
        ScoreComponent::Consistency,
    ];
}

impl Display for ScoreComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreComponent::Speed => write!(f, "Speed Efficiency"),
            ScoreComponent::BrakeEfficiency => write!(f, "Brake Efficiency"),
            ScoreComponent::ThrottleSmoothness => write!(f, "Throttle Smoothness"),
            ScoreComponent::TireStress => write!(f, "Tire Management"),
            ScoreComponent::TurnEntry => write!(f, "Turn Entry"),
            ScoreComponent::Consistency => write!(f, "Consistency"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpiWeights {
    pub speed: f64,
    pub brake_efficiency: f64,
    pub throttle_smoothness: f64,
    pub tire_stress: f64,
    pub turn_entry: f64,
    pub consistency: f64,
}

impl Default for CpiWeights {
    fn default() -> Self {
        Self {
            speed: 0.30,
            brake_efficiency: 0.20,
            throttle_smoothness: 0.15,
            tire_stress: 0.15,
            turn_entry: 0.10,
            consistency: 0.10,
        }
    }
}

impl CpiWeights {
    pub fn weight(&self, component: ScoreComponent) -> f64 {
        match component {
            ScoreComponent::Speed => self.speed,
            ScoreComponent::BrakeEfficiency => self.brake_efficiency,
            ScoreComponent::ThrottleSmoothness => self.throttle_smoothness,
            ScoreComponent::TireStress => self.tire_stress,
            ScoreComponent::TurnEntry => self.turn_entry,
            ScoreComponent::Consistency => self.consistency,
        }
    }

    pub fn sum(&self) -> f64 {
        ScoreComponent::ALL.iter().map(|c| self.weight(*c)).sum()
    }

    pub fn validate(&self) -> Result<(), LapsyncError> {
        let sum = self.sum();
        let all_valid = ScoreComponent::ALL
            .iter()
            .map(|c| self.weight(*c))
            .all(|w| w.is_finite() && w >= 0.0);
        if !all_valid || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(LapsyncError::InvalidWeights { sum });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CpiConfig {
    /// Average speed that earns a full speed score, km/h
    pub reference_speed_kmh: f64,
    /// Brake pressure above which a segment counts as braking
    pub brake_active_threshold: f64,
    /// Optimal share of lap time spent braking
    pub brake_band_low: f64,
    pub brake_band_high: f64,
    /// Points lost per percentage point outside the band
    pub brake_penalty_per_pct: f64,
    /// Throttle rate variance, in (%/m)², that halves the smoothness score
    pub throttle_variance_scale: f64,
    /// Mean |steering| x |lateral g| per meter that halves the tire score
    pub tire_load_scale: f64,
    /// Score tire stress from steering and speed when lateral acceleration
    /// was not recorded, instead of substituting the neutral score
    pub tire_stress_steering_proxy: bool,
    /// Mean |steering| x speed / 150 that halves the proxy tire score
    pub tire_proxy_scale: f64,
    pub corner_steering_threshold_deg: f64,
    pub corner_min_points: usize,
    /// Steering rate, per grid step, that counts towards a correction
    pub turn_entry_correction_deg: f64,
    /// Points lost per correction per corner
    pub turn_entry_penalty: f64,
    pub consistency_zones: usize,
    /// Coefficient of variation of zone times that halves the consistency score
    pub consistency_cv_scale: f64,
}

impl Default for CpiConfig {
    fn default() -> Self {
        Self {
            reference_speed_kmh: 230.0,
            brake_active_threshold: 5.0,
            brake_band_low: 0.15,
            brake_band_high: 0.20,
            brake_penalty_per_pct: 4.0,
            throttle_variance_scale: 1.0,
            tire_load_scale: 15.0,
            tire_stress_steering_proxy: false,
            tire_proxy_scale: 20.0,
            corner_steering_threshold_deg: 10.0,
            corner_min_points: 3,
            turn_entry_correction_deg: 5.0,
            turn_entry_penalty: 10.0,
            consistency_zones: 3,
            consistency_cv_scale: 0.25,
        }
    }
}

impl CpiConfig {
    pub fn validate(&self) -> Result<(), LapsyncError> {
        let positive = [
            ("reference_speed_kmh", self.reference_speed_kmh),
            ("throttle_variance_scale", self.throttle_variance_scale),
            ("tire_load_scale", self.tire_load_scale),
            ("tire_proxy_scale", self.tire_proxy_scale),
            ("consistency_cv_scale", self.consistency_cv_scale),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(LapsyncError::InvalidConfig {
                    field: format!("cpi.{}", field),
                    reason: "must be a positive number".to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.brake_band_low)
            || !(self.brake_band_low..=1.0).contains(&self.brake_band_high)
        {
            return Err(LapsyncError::InvalidConfig {
                field: "cpi.brake_band".to_string(),
                reason: "band must satisfy 0 <= low <= high <= 1".to_string(),
            });
        }
        if self.consistency_zones < 2 {
            return Err(LapsyncError::InvalidConfig {
                field: "cpi.consistency_zones".to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScore {
    pub score: f64,
    /// Rounded to one decimal for display
    pub rounded: f64,
    pub weight: f64,
    /// True when the neutral score stands in for missing data
    pub substituted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeScore {
    pub lap_number: u32,
    /// Weighted sum, rounded and clamped to 0-100
    pub total: f64,
    pub unrounded_total: f64,
    pub grade: String,
    pub rating: String,
    pub components: BTreeMap<ScoreComponent, ComponentScore>,
    pub substituted: Vec<ScoreComponent>,
    /// Best three components, best first
    pub strengths: Vec<ScoreComponent>,
    /// Worst three components, worst first
    pub weaknesses: Vec<ScoreComponent>,
    pub recommendations: Vec<String>,
}

impl CompositeScore {
    pub fn component(&self, component: ScoreComponent) -> Option<f64> {
        self.components.get(&component).map(|c| c.score)
    }
}

pub fn grade(total: f64) -> &'static str {
    if total >= 90.0 {
        "A"
    } else if total >= 80.0 {
        "B"
    } else if total >= 70.0 {
        "C"
    } else if total >= 60.0 {
        "D"
    } else {
        "F"
    }
}

pub fn rating(total: f64) -> &'static str {
    if total >= 85.0 {
        "Elite Performance"
    } else if total >= 75.0 {
        "Excellent"
    } else if total >= 65.0 {
        "Good"
    } else if total >= 50.0 {
        "Average"
    } else {
        "Needs Improvement"
    }
}

struct SubScore {
    score: f64,
    substituted: bool,
    note: Option<String>,
}

impl SubScore {
    fn measured(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 100.0),
            substituted: false,
            note: None,
        }
    }

    fn measured_with_note(score: f64, note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::measured(score)
        }
    }

    fn neutral(note: impl Into<String>) -> Self {
        Self {
            score: NEUTRAL_SCORE,
            substituted: true,
            note: Some(note.into()),
        }
    }
}

/// Composite Performance Index scorer. Weights and configuration are
/// validated once, at construction.
pub struct CpiScorer {
    weights: CpiWeights,
    config: CpiConfig,
    corners: Option<Vec<(f64, f64)>>,
}

impl CpiScorer {
    pub fn new(weights: CpiWeights, config: CpiConfig) -> Result<Self, LapsyncError> {
        weights.validate()?;
        config.validate()?;
        Ok(Self {
            weights,
            config,
            corners: None,
        })
    }

    /// Uses known corner distance ranges instead of detecting corners from
    /// steering input.
    pub fn with_corners(mut self, corners: Vec<(f64, f64)>) -> Self {
        self.corners = Some(corners);
        self
    }

    pub fn weights(&self) -> &CpiWeights {
        &self.weights
    }

    pub fn score(&self, lap: &AlignedLap) -> CompositeScore {
        let sub_scores = [
            (ScoreComponent::Speed, self.speed_score(lap)),
            (ScoreComponent::BrakeEfficiency, self.brake_score(lap)),
            (ScoreComponent::ThrottleSmoothness, self.throttle_score(lap)),
            (ScoreComponent::TireStress, self.tire_score(lap)),
            (ScoreComponent::TurnEntry, self.turn_entry_score(lap)),
            (ScoreComponent::Consistency, self.consistency_score(lap)),
        ];

        let unrounded_total: f64 = sub_scores
            .iter()
            .map(|(component, sub)| self.weights.weight(*component) * sub.score)
            .sum();
        let total = unrounded_total.round().clamp(0.0, 100.0);

        let substituted: Vec<ScoreComponent> = sub_scores
            .iter()
            .filter(|(_, sub)| sub.substituted)
            .map(|(component, _)| *component)
            .collect();
        for component in &substituted {
            debug!(
                "Lap {}: {} scored neutral for missing data",
                lap.lap_number, component
            );
        }

        let components: BTreeMap<ScoreComponent, ComponentScore> = sub_scores
            .into_iter()
            .map(|(component, sub)| {
                (
                    component,
                    ComponentScore {
                        score: sub.score,
                        rounded: (sub.score * 10.0).round() / 10.0,
                        weight: self.weights.weight(component),
                        substituted: sub.substituted,
                        note: sub.note,
                    },
                )
            })
            .collect();

        let mut ranked: Vec<(ScoreComponent, f64)> =
            components.iter().map(|(c, s)| (*c, s.score)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let strengths: Vec<ScoreComponent> = ranked.iter().take(3).map(|(c, _)| *c).collect();
        let weaknesses: Vec<ScoreComponent> =
            ranked.iter().rev().take(3).map(|(c, _)| *c).collect();
        let recommendations = self.recommendations(&ranked);

        info!("Lap {} CPI {}/100", lap.lap_number, total);
        CompositeScore {
            lap_number: lap.lap_number,
            total,
            unrounded_total,
            grade: grade(total).to_string(),
            rating: rating(total).to_string(),
            components,
            substituted,
            strengths,
            weaknesses,
            recommendations,
        }
    }

    /// Scores a normalized lap on its own grid of `grid_size` points.
    pub fn score_lap(&self, lap: &Lap, grid_size: usize) -> Result<CompositeScore, LapsyncError> {
        let grid = SpatialGrid::new(grid_size, lap.distance())?;
        Ok(self.score(&resample_onto(lap, &grid)))
    }

    fn recommendations(&self, ranked: &[(ScoreComponent, f64)]) -> Vec<String> {
        let mut recommendations = Vec::new();
        if let Some((weakest, score)) = ranked.last() {
            if *score < 70.0 {
                recommendations.push(format!(
                    "Focus on {} to improve CPI by ~{:.1} points",
                    weakest,
                    (100.0 - score) * self.weights.weight(*weakest)
                ));
            } else {
                recommendations.push("Maintain current performance level".to_string());
            }
        }
        if let Some((strongest, _)) = ranked.first() {
            recommendations.push(format!("Excellent {} - keep this consistent", strongest));
        }
        recommendations
    }

    fn speed_score(&self, lap: &AlignedLap) -> SubScore {
        if lap.samples.is_empty() {
            return SubScore::neutral("no samples on the grid");
        }
        let mean = lap.speeds().sum::<f64>() / lap.samples.len() as f64;
        SubScore::measured((mean / self.config.reference_speed_kmh * 100.0).min(100.0))
    }

    /// Share of lap time spent braking against the optimal band.
    fn brake_score(&self, lap: &AlignedLap) -> SubScore {
        if !lap.has_channel(Channel::BrakePressureFront) {
            return SubScore::neutral("brakePressureFront channel absent");
        }
        let mut total_time = 0.0;
        let mut braking_time = 0.0;
        for pair in lap.samples.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let time = units::segment_time(b.distance - a.distance, a.speed, b.speed);
            total_time += time;
            if (a.brake_pressure_front + b.brake_pressure_front) / 2.0
                > self.config.brake_active_threshold
            {
                braking_time += time;
            }
        }
        if total_time <= 0.0 {
            return SubScore::neutral("lap too short to time");
        }

        let fraction = braking_time / total_time;
        let outside = if fraction < self.config.brake_band_low {
            self.config.brake_band_low - fraction
        } else if fraction > self.config.brake_band_high {
            fraction - self.config.brake_band_high
        } else {
            0.0
        };
        SubScore::measured_with_note(
            100.0 - outside * 100.0 * self.config.brake_penalty_per_pct,
            format!("{:.1}% of lap time under braking", fraction * 100.0),
        )
    }

    /// Inverse of the variance of the throttle rate of change.
    fn throttle_score(&self, lap: &AlignedLap) -> SubScore {
        if !lap.has_channel(Channel::Throttle) {
            return SubScore::neutral("throttle channel absent");
        }
        let rates: Vec<f64> = lap
            .samples
            .windows(2)
            .filter(|w| w[1].distance > w[0].distance)
            .map(|w| (w[1].throttle - w[0].throttle) / (w[1].distance - w[0].distance))
            .collect();
        if rates.is_empty() {
            return SubScore::neutral("lap too short to measure throttle rate");
        }
        let scale = self.config.throttle_variance_scale;
        SubScore::measured(100.0 * scale / (scale + variance(&rates)))
    }

    /// Inverse of the integrated |steering| x lateral load per meter.
    fn tire_score(&self, lap: &AlignedLap) -> SubScore {
        if !lap.has_channel(Channel::SteeringAngle) {
            return SubScore::neutral("steeringAngle channel absent");
        }
        let (load, scale, note): (fn(&AlignedSample) -> f64, f64, Option<&str>) =
            if lap.has_channel(Channel::LateralAccel) {
                (
                    |s: &AlignedSample| {
                        s.steering_angle.abs() * s.lateral_accel.unwrap_or_default().abs()
                    },
                    self.config.tire_load_scale,
                    None,
                )
            } else if self.config.tire_stress_steering_proxy {
                (
                    |s: &AlignedSample| s.steering_angle.abs() * s.speed / 150.0,
                    self.config.tire_proxy_scale,
                    Some("lateralAccel absent, scored from steering and speed"),
                )
            } else {
                return SubScore::neutral("lateralAccel channel absent");
            };

        let mut integral = 0.0;
        let mut length = 0.0;
        for pair in lap.samples.windows(2) {
            let step = pair[1].distance - pair[0].distance;
            integral += (load(&pair[0]) + load(&pair[1])) / 2.0 * step;
            length += step;
        }
        if length <= 0.0 {
            return SubScore::neutral("lap too short to integrate tire load");
        }
        let score = 100.0 * scale / (scale + integral / length);
        match note {
            Some(note) => SubScore::measured_with_note(score, note),
            None => SubScore::measured(score),
        }
    }

    /// Penalizes steering corrections in the first half of each corner.
    fn turn_entry_score(&self, lap: &AlignedLap) -> SubScore {
        if !lap.has_channel(Channel::SteeringAngle) {
            return SubScore::neutral("steeringAngle channel absent");
        }
        let steering = lap.channel(Channel::SteeringAngle);
        let corners = match &self.corners {
            Some(ranges) => corner_indices(lap, ranges),
            None => detect_corners(
                &steering,
                self.config.corner_steering_threshold_deg,
                self.config.corner_min_points,
            ),
        };
        if corners.is_empty() {
            return SubScore::measured_with_note(100.0, "no corners found");
        }

        let threshold = self.config.turn_entry_correction_deg;
        let corrections: usize = corners
            .iter()
            .map(|&(start, end)| {
                let entry_end = start + (end - start + 1).div_ceil(2);
                (start.max(1)..entry_end.min(steering.len().saturating_sub(1)))
                    .filter(|&i| {
                        let before = steering[i] - steering[i - 1];
                        let after = steering[i + 1] - steering[i];
                        before * after < 0.0 && before.abs() > threshold && after.abs() > threshold
                    })
                    .count()
            })
            .sum();

        let per_corner = corrections as f64 / corners.len() as f64;
        SubScore::measured_with_note(
            100.0 - self.config.turn_entry_penalty * per_corner,
            format!("{} corrections over {} corners", corrections, corners.len()),
        )
    }

    /// Inverse of the coefficient of variation of zone times.
    fn consistency_score(&self, lap: &AlignedLap) -> SubScore {
        let spec = ZoneSpec::Count(self.config.consistency_zones);
        let times: Vec<f64> = match zone_aggregator::aggregate_zones(lap, &spec) {
            Ok(zones) => zones.iter().filter_map(|z| z.elapsed_time).collect(),
            Err(_) => Vec::new(),
        };
        if times.len() < 2 {
            return SubScore::neutral("fewer than two timed zones");
        }
        let mean = times.iter().sum::<f64>() / times.len() as f64;
        if mean <= 0.0 {
            return SubScore::neutral("zero zone times");
        }
        let cv = variance(&times).sqrt() / mean;
        let scale = self.config.consistency_cv_scale;
        SubScore::measured(100.0 * scale / (scale + cv))
    }
}

/// Score with default configuration and the given weights.
pub fn compute_cpi(lap: &AlignedLap, weights: CpiWeights) -> Result<CompositeScore, LapsyncError> {
    Ok(CpiScorer::new(weights, CpiConfig::default())?.score(lap))
}

/// Population variance
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Inclusive index ranges where |steering| stays above the threshold for at
/// least `min_points` grid points.
fn detect_corners(steering: &[f64], threshold_deg: f64, min_points: usize) -> Vec<(usize, usize)> {
    let mut corners = Vec::new();
    let mut start = None;
    for (i, angle) in steering.iter().enumerate() {
        match (angle.abs() > threshold_deg, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= min_points {
                    corners.push((s, i - 1));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start.filter(|s| steering.len() - s >= min_points) {
        corners.push((s, steering.len() - 1));
    }
    corners
}

/// Grid index ranges of known corners. Corners outside the lap's defined
/// range are skipped.
fn corner_indices(lap: &AlignedLap, ranges: &[(f64, f64)]) -> Vec<(usize, usize)> {
    ranges
        .iter()
        .filter_map(|&(from, to)| {
            let start = lap.samples.iter().position(|s| s.distance >= from)?;
            let end = lap.samples.iter().rposition(|s| s.distance <= to)?;
            (start <= end).then_some((start, end))
        })
        .collect()
}
