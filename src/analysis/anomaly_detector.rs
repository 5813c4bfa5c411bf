use std::fmt::Display;

use log::debug;
use serde::{Deserialize, Serialize};

use super::baseline::BaselineStats;
use crate::errors::LapsyncError;
use crate::sync::AlignedLap;
use crate::telemetry::Channel;

/// Speed deficit versus a reference lap that counts as an anomaly, km/h
const DEFAULT_SPEED_THRESHOLD_KMH: f64 = 15.0;
/// Standard deviations below the learned norm that count as an anomaly
const DEFAULT_Z_SCORE_THRESHOLD: f64 = 3.0;
/// Lower bound on the learned speed deviation, km/h
const DEFAULT_MIN_BASELINE_STD_KMH: f64 = 2.0;
/// Consecutive grid points of throttle and brake overlap needed to flag it
const DEFAULT_OVERLAP_MIN_POINTS: usize = 3;
/// Absolute second difference of steering angle, degrees
const DEFAULT_STEERING_CORRECTION_DEG: f64 = 20.0;
/// Brake pressure rise between two grid points
const DEFAULT_SUDDEN_BRAKING_RISE: f64 = 30.0;
/// Throttle change that must reverse direction on the next point, %
const DEFAULT_ERRATIC_THROTTLE_PCT: f64 = 20.0;
/// Reference faults this many grid points away can still cancel a subject
/// fault, which may also run this many points longer than the reference one
const DEFAULT_REFERENCE_MATCH_WINDOW: usize = 2;

/// Kinds of deviation the detector reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Speed deficit versus the reference lap or the learned norm
    SpeedAnomaly,
    /// Throttle and brake applied together
    ThrottleBrakeOverlap,
    /// Throttle rate reversing direction with large swings
    ErraticThrottle,
    /// Oscillating steering input rather than a single turn
    SteeringCorrection,
    /// Brake pressure spiking within a single grid step
    SuddenBraking,
}

impl Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::SpeedAnomaly => write!(f, "Speed Anomaly"),
            AnomalyKind::ThrottleBrakeOverlap => write!(f, "Throttle/Brake Overlap"),
            AnomalyKind::ErraticThrottle => write!(f, "Erratic Throttle"),
            AnomalyKind::SteeringCorrection => write!(f, "Steering Correction"),
            AnomalyKind::SuddenBraking => write!(f, "Sudden Braking"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Warning,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Minor => write!(f, "minor"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Magnitudes above `warning` are warnings, above `critical` critical.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityBands {
    pub warning: f64,
    pub critical: f64,
}

impl SeverityBands {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    pub fn classify(&self, magnitude: f64) -> Severity {
        let magnitude = magnitude.abs();
        if magnitude > self.critical {
            Severity::Critical
        } else if magnitude > self.warning {
            Severity::Warning
        } else {
            Severity::Minor
        }
    }

    fn validate(&self, field: &str) -> Result<(), LapsyncError> {
        if !(self.warning.is_finite() && self.critical.is_finite())
            || self.warning < 0.0
            || self.critical < self.warning
        {
            return Err(LapsyncError::InvalidConfig {
                field: format!("anomaly.{}", field),
                reason: "bands must be non-negative with warning <= critical".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub speed_threshold_kmh: f64,
    pub z_score_threshold: f64,
    pub min_baseline_std_kmh: f64,
    pub overlap_min_points: usize,
    pub overlap_throttle_min: f64,
    pub overlap_brake_min: f64,
    pub steering_correction_deg: f64,
    pub sudden_braking_rise: f64,
    pub erratic_throttle_pct: f64,
    pub reference_match_window: usize,
    /// Speed deficit in km/h
    pub speed_severity: SeverityBands,
    /// Speed deficit relative to the expected speed
    pub speed_ratio_severity: SeverityBands,
    /// Peak throttle x brake / 100
    pub overlap_severity: SeverityBands,
    pub erratic_throttle_severity: SeverityBands,
    pub steering_severity: SeverityBands,
    pub sudden_braking_severity: SeverityBands,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            speed_threshold_kmh: DEFAULT_SPEED_THRESHOLD_KMH,
            z_score_threshold: DEFAULT_Z_SCORE_THRESHOLD,
            min_baseline_std_kmh: DEFAULT_MIN_BASELINE_STD_KMH,
            overlap_min_points: DEFAULT_OVERLAP_MIN_POINTS,
            overlap_throttle_min: 0.0,
            overlap_brake_min: 0.0,
            steering_correction_deg: DEFAULT_STEERING_CORRECTION_DEG,
            sudden_braking_rise: DEFAULT_SUDDEN_BRAKING_RISE,
            erratic_throttle_pct: DEFAULT_ERRATIC_THROTTLE_PCT,
            reference_match_window: DEFAULT_REFERENCE_MATCH_WINDOW,
            speed_severity: SeverityBands::new(20.0, 30.0),
            speed_ratio_severity: SeverityBands::new(0.15, 0.25),
            overlap_severity: SeverityBands::new(10.0, 25.0),
            erratic_throttle_severity: SeverityBands::new(40.0, 60.0),
            steering_severity: SeverityBands::new(30.0, 45.0),
            sudden_braking_severity: SeverityBands::new(40.0, 60.0),
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<(), LapsyncError> {
        let positive = [
            ("speed_threshold_kmh", self.speed_threshold_kmh),
            ("z_score_threshold", self.z_score_threshold),
            ("min_baseline_std_kmh", self.min_baseline_std_kmh),
            ("steering_correction_deg", self.steering_correction_deg),
            ("sudden_braking_rise", self.sudden_braking_rise),
            ("erratic_throttle_pct", self.erratic_throttle_pct),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(LapsyncError::InvalidConfig {
                    field: format!("anomaly.{}", field),
                    reason: "must be a positive number".to_string(),
                });
            }
        }
        if self.overlap_min_points == 0 {
            return Err(LapsyncError::InvalidConfig {
                field: "anomaly.overlap_min_points".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        self.speed_severity.validate("speed_severity")?;
        self.speed_ratio_severity.validate("speed_ratio_severity")?;
        self.overlap_severity.validate("overlap_severity")?;
        self.erratic_throttle_severity
            .validate("erratic_throttle_severity")?;
        self.steering_severity.validate("steering_severity")?;
        self.sudden_braking_severity
            .validate("sudden_braking_severity")
    }
}

/// A detected deviation at one track location.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub grid_index: usize,
    pub distance: f64,
    pub kind: AnomalyKind,
    /// Signed deviation size in the unit of the kind's channel
    pub magnitude: f64,
    pub severity: Severity,
    pub reason: String,
    /// Grid points covered, 1 for pointwise deviations
    pub point_count: usize,
    pub position_x: f64,
    pub position_y: f64,
}

/// What the subject lap is compared against.
#[derive(Clone, Copy, Debug)]
pub enum Baseline<'a> {
    Reference(&'a AlignedLap),
    Statistics(&'a BaselineStats),
}

/// A run of consecutive grid points showing the same driving fault
#[derive(Clone, Copy, Debug)]
struct FaultRun {
    kind: AnomalyKind,
    start: usize,
    end: usize,
    peak: usize,
    magnitude: f64,
}

impl FaultRun {
    fn near(&self, other: &FaultRun, window: usize) -> bool {
        self.kind == other.kind
            && self.start <= other.end + window
            && other.start <= self.end + window
    }

    fn point_count(&self) -> usize {
        self.end - self.start + 1
    }
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Result<Self, LapsyncError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Flags locations where `subject` deviates from the baseline, ordered by
    /// ascending distance. An empty result is the normal outcome for a clean lap.
    ///
    /// A driving fault (overlap, erratic throttle, steering correction, sudden
    /// braking) is left out against a reference lap only when the reference
    /// shows the same fault at the same place, at least as severe and about as
    /// long. A worse fault where the reference has a milder one is reported
    /// with the reference's magnitude in its reason.
    pub fn detect(
        &self,
        subject: &AlignedLap,
        baseline: Baseline<'_>,
    ) -> Result<Vec<Anomaly>, LapsyncError> {
        let (mut anomalies, reference_faults) = match baseline {
            Baseline::Reference(reference) => {
                subject.ensure_same_grid(reference)?;
                (
                    self.speed_vs_reference(subject, reference),
                    self.driving_faults(reference),
                )
            }
            Baseline::Statistics(stats) => {
                stats.matches_grid(subject)?;
                (self.speed_vs_statistics(subject, stats), Vec::new())
            }
        };

        let window = self.config.reference_match_window;
        for fault in self.driving_faults(subject) {
            let nearby: Vec<&FaultRun> = reference_faults
                .iter()
                .filter(|r| r.near(&fault, window))
                .collect();
            if nearby.iter().any(|r| self.covers(r, &fault)) {
                continue;
            }
            let mut anomaly = self.describe_fault(subject, &fault);
            if let Some(worst) = nearby
                .iter()
                .max_by(|a, b| a.magnitude.abs().total_cmp(&b.magnitude.abs()))
            {
                anomaly.reason = format!(
                    "{}, reference peak {:.1} over {} grid points",
                    anomaly.reason,
                    worst.magnitude,
                    worst.point_count()
                );
            }
            anomalies.push(anomaly);
        }

        anomalies.sort_by(|a, b| {
            a.grid_index
                .cmp(&b.grid_index)
                .then(a.kind.cmp(&b.kind))
        });
        debug!(
            "Lap {}: {} anomalies detected",
            subject.lap_number,
            anomalies.len()
        );
        Ok(anomalies)
    }

    fn speed_vs_reference(&self, subject: &AlignedLap, reference: &AlignedLap) -> Vec<Anomaly> {
        subject
            .samples
            .iter()
            .zip(&reference.samples)
            .enumerate()
            .filter_map(|(i, (s, r))| {
                let deficit = r.speed - s.speed;
                if deficit <= self.config.speed_threshold_kmh {
                    return None;
                }
                let ratio = if r.speed > 0.0 { deficit / r.speed } else { 0.0 };
                let severity = self.speed_severity(deficit, ratio);
                Some(Anomaly {
                    grid_index: i,
                    distance: s.distance,
                    kind: AnomalyKind::SpeedAnomaly,
                    magnitude: deficit,
                    severity,
                    reason: reference_speed_reason(deficit, severity),
                    point_count: 1,
                    position_x: s.position_x,
                    position_y: s.position_y,
                })
            })
            .collect()
    }

    fn speed_vs_statistics(&self, subject: &AlignedLap, stats: &BaselineStats) -> Vec<Anomaly> {
        subject
            .samples
            .iter()
            .zip(&stats.speed)
            .enumerate()
            .filter_map(|(i, (s, norm))| {
                let deficit = norm.mean - s.speed;
                let z = deficit / norm.std.max(self.config.min_baseline_std_kmh);
                if z <= self.config.z_score_threshold {
                    return None;
                }
                let ratio = if norm.mean > 0.0 { deficit / norm.mean } else { 0.0 };
                Some(Anomaly {
                    grid_index: i,
                    distance: s.distance,
                    kind: AnomalyKind::SpeedAnomaly,
                    magnitude: deficit,
                    severity: self.speed_severity(deficit, ratio),
                    reason: format!(
                        "Speed {:.1} km/h below the learned norm ({:.1} standard deviations)",
                        deficit, z
                    ),
                    point_count: 1,
                    position_x: s.position_x,
                    position_y: s.position_y,
                })
            })
            .collect()
    }

    fn speed_severity(&self, deficit: f64, ratio: f64) -> Severity {
        self.config
            .speed_severity
            .classify(deficit)
            .max(self.config.speed_ratio_severity.classify(ratio))
    }

    fn driving_faults(&self, lap: &AlignedLap) -> Vec<FaultRun> {
        let throttle = lap.channel(Channel::Throttle);
        let brake = lap.channel(Channel::BrakePressureFront);
        let steering = lap.channel(Channel::SteeringAngle);
        let n = lap.defined_len();
        let mut faults = Vec::new();

        if lap.has_channel(Channel::Throttle) && lap.has_channel(Channel::BrakePressureFront) {
            let overlap: Vec<Option<f64>> = (0..n)
                .map(|i| {
                    (throttle[i] > self.config.overlap_throttle_min
                        && brake[i] > self.config.overlap_brake_min)
                        .then(|| throttle[i] * brake[i] / 100.0)
                })
                .collect();
            faults.extend(collect_runs(
                AnomalyKind::ThrottleBrakeOverlap,
                &overlap,
                self.config.overlap_min_points,
            ));
        }

        if lap.has_channel(Channel::Throttle) {
            let threshold = self.config.erratic_throttle_pct;
            let erratic: Vec<Option<f64>> = (0..n)
                .map(|i| {
                    if i == 0 || i + 1 >= n {
                        return None;
                    }
                    let before = throttle[i] - throttle[i - 1];
                    let after = throttle[i + 1] - throttle[i];
                    (before * after < 0.0 && before.abs() > threshold && after.abs() > threshold)
                        .then(|| before.abs().max(after.abs()))
                })
                .collect();
            faults.extend(collect_runs(AnomalyKind::ErraticThrottle, &erratic, 1));
        }

        if lap.has_channel(Channel::SteeringAngle) {
            let corrections: Vec<Option<f64>> = (0..n)
                .map(|i| {
                    if i == 0 || i + 1 >= n {
                        return None;
                    }
                    let second = steering[i + 1] - 2.0 * steering[i] + steering[i - 1];
                    (second.abs() > self.config.steering_correction_deg).then_some(second)
                })
                .collect();
            faults.extend(collect_runs(AnomalyKind::SteeringCorrection, &corrections, 1));
        }

        if lap.has_channel(Channel::BrakePressureFront) {
            let rises: Vec<Option<f64>> = (0..n)
                .map(|i| {
                    if i == 0 {
                        return None;
                    }
                    let rise = brake[i] - brake[i - 1];
                    (rise > self.config.sudden_braking_rise).then_some(rise)
                })
                .collect();
            faults.extend(collect_runs(AnomalyKind::SuddenBraking, &rises, 1));
        }

        faults
    }

    fn bands(&self, kind: AnomalyKind) -> &SeverityBands {
        match kind {
            AnomalyKind::SpeedAnomaly => &self.config.speed_severity,
            AnomalyKind::ThrottleBrakeOverlap => &self.config.overlap_severity,
            AnomalyKind::ErraticThrottle => &self.config.erratic_throttle_severity,
            AnomalyKind::SteeringCorrection => &self.config.steering_severity,
            AnomalyKind::SuddenBraking => &self.config.sudden_braking_severity,
        }
    }

    /// Whether a nearby reference fault is the same fault as `fault`: no
    /// milder by severity band and no more than the match window shorter.
    fn covers(&self, reference: &FaultRun, fault: &FaultRun) -> bool {
        let bands = self.bands(fault.kind);
        bands.classify(reference.magnitude) >= bands.classify(fault.magnitude)
            && fault.point_count() <= reference.point_count() + self.config.reference_match_window
    }

    fn describe_fault(&self, lap: &AlignedLap, fault: &FaultRun) -> Anomaly {
        let point_count = fault.point_count();
        let sample = &lap.samples[fault.peak];
        Anomaly {
            grid_index: fault.peak,
            distance: sample.distance,
            kind: fault.kind,
            magnitude: fault.magnitude,
            severity: self.bands(fault.kind).classify(fault.magnitude),
            reason: fault_reason(fault.kind, fault.magnitude, point_count),
            point_count,
            position_x: sample.position_x,
            position_y: sample.position_y,
        }
    }
}

/// Detection with default settings and a custom sensitivity. The threshold is
/// a speed deficit in km/h against a reference lap, or a z-score against
/// learned statistics.
pub fn detect_anomalies(
    subject: &AlignedLap,
    baseline: Baseline<'_>,
    threshold: f64,
) -> Result<Vec<Anomaly>, LapsyncError> {
    let mut config = AnomalyConfig::default();
    match baseline {
        Baseline::Reference(_) => config.speed_threshold_kmh = threshold,
        Baseline::Statistics(_) => config.z_score_threshold = threshold,
    }
    AnomalyDetector::new(config)?.detect(subject, baseline)
}

/// Groups consecutive flagged points into runs of at least `min_len` points.
/// The peak is the point with the largest absolute score.
fn collect_runs(kind: AnomalyKind, scores: &[Option<f64>], min_len: usize) -> Vec<FaultRun> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < scores.len() {
        if scores[i].is_none() {
            i += 1;
            continue;
        }
        let start = i;
        let mut peak = i;
        let mut magnitude = scores[i].unwrap_or_default();
        while i < scores.len() {
            let Some(score) = scores[i] else { break };
            if score.abs() > magnitude.abs() {
                peak = i;
                magnitude = score;
            }
            i += 1;
        }
        let end = i - 1;
        if end - start + 1 >= min_len {
            runs.push(FaultRun {
                kind,
                start,
                end,
                peak,
                magnitude,
            });
        }
    }
    runs
}

fn reference_speed_reason(deficit: f64, severity: Severity) -> String {
    let hint = match severity {
        Severity::Critical => "possible missed apex or heavy braking",
        Severity::Warning => "check braking point",
        Severity::Minor => "optimize racing line",
    };
    format!(
        "Speed deficit of {:.1} km/h versus reference, {}",
        deficit, hint
    )
}

fn fault_reason(kind: AnomalyKind, magnitude: f64, point_count: usize) -> String {
    match kind {
        AnomalyKind::SpeedAnomaly => format!("Speed deficit of {:.1} km/h", magnitude),
        AnomalyKind::ThrottleBrakeOverlap => format!(
            "Throttle and brake applied together over {} grid points (peak overlap {:.1})",
            point_count, magnitude
        ),
        AnomalyKind::ErraticThrottle => format!(
            "Throttle swinging by {:.1}% between consecutive points",
            magnitude
        ),
        AnomalyKind::SteeringCorrection => format!(
            "Steering correction, steering rate changed by {:.1} degrees",
            magnitude.abs()
        ),
        AnomalyKind::SuddenBraking => format!(
            "Brake pressure rose by {:.1} within one grid step",
            magnitude
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{AlignedSample, SpatialGrid};
    use proptest::prelude::*;

    fn aligned(lap_number: u32, grid: &SpatialGrid, speeds: &[f64]) -> AlignedLap {
        AlignedLap {
            lap_number,
            lap_time: 0.0,
            grid_len: grid.len(),
            grid_step: grid.step(),
            track_length: grid.track_length(),
            samples: speeds
                .iter()
                .zip(grid.points())
                .map(|(&speed, &distance)| AlignedSample {
                    distance,
                    speed,
                    ..Default::default()
                })
                .collect(),
            absent_channels: Default::default(),
        }
    }

    fn with_inputs(mut lap: AlignedLap, throttle: &[f64], brake: &[f64], steering: &[f64]) -> AlignedLap {
        for (i, sample) in lap.samples.iter_mut().enumerate() {
            sample.throttle = throttle.get(i).copied().unwrap_or_default();
            sample.brake_pressure_front = brake.get(i).copied().unwrap_or_default();
            sample.steering_angle = steering.get(i).copied().unwrap_or_default();
        }
        lap
    }

    #[test]
    fn test_reference_speed_anomaly() {
        let grid = SpatialGrid::new(4, 30.0).unwrap();
        let subject = aligned(2, &grid, &[100.0, 100.0, 80.0, 100.0]);
        let reference = aligned(1, &grid, &[100.0; 4]);

        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();
        assert_eq!(anomalies.len(), 1);
        let anomaly = &anomalies[0];
        assert_eq!(anomaly.grid_index, 2);
        assert_eq!(anomaly.distance, 20.0);
        assert_eq!(anomaly.kind, AnomalyKind::SpeedAnomaly);
        assert_eq!(anomaly.magnitude, 20.0);
        assert!(anomaly.reason.contains("20.0 km/h"));
    }

    #[test]
    fn test_no_anomalies_below_threshold() {
        let grid = SpatialGrid::new(4, 30.0).unwrap();
        let subject = aligned(2, &grid, &[100.0, 95.0, 90.0, 100.0]);
        let reference = aligned(1, &grid, &[100.0; 4]);
        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_speed_severity() {
        let grid = SpatialGrid::new(4, 30.0).unwrap();
        let subject = aligned(2, &grid, &[180.0, 165.0, 150.0, 100.0]);
        let reference = aligned(1, &grid, &[200.0; 4]);
        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();

        let severities: Vec<Severity> = anomalies.iter().map(|a| a.severity).collect();
        // 20 km/h (10%), 35 km/h, 50 km/h, 100 km/h
        assert_eq!(
            severities,
            vec![
                Severity::Minor,
                Severity::Critical,
                Severity::Critical,
                Severity::Critical
            ]
        );
    }

    #[test]
    fn test_throttle_brake_overlap_needs_consecutive_points() {
        let grid = SpatialGrid::new(10, 90.0).unwrap();
        let reference = aligned(1, &grid, &[100.0; 10]);

        let short = with_inputs(
            aligned(2, &grid, &[100.0; 10]),
            &[0.0, 50.0, 50.0, 0.0],
            &[0.0, 20.0, 20.0, 0.0],
            &[],
        );
        let anomalies = detect_anomalies(&short, Baseline::Reference(&reference), 15.0).unwrap();
        assert!(anomalies.is_empty());

        let long = with_inputs(
            aligned(2, &grid, &[100.0; 10]),
            &[0.0, 50.0, 60.0, 50.0, 0.0],
            &[0.0, 20.0, 30.0, 20.0, 0.0],
            &[],
        );
        let anomalies = detect_anomalies(&long, Baseline::Reference(&reference), 15.0).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::ThrottleBrakeOverlap);
        assert_eq!(anomalies[0].grid_index, 2);
        assert_eq!(anomalies[0].point_count, 3);
        assert!((anomalies[0].magnitude - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_steering_correction() {
        let grid = SpatialGrid::new(8, 70.0).unwrap();
        let reference = aligned(1, &grid, &[100.0; 8]);
        let subject = with_inputs(
            aligned(2, &grid, &[100.0; 8]),
            &[],
            &[],
            &[0.0, 0.0, 0.0, 25.0, 0.0, 0.0, 0.0, 0.0],
        );
        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();

        // Second differences: +25 at 2, -50 at 3, +25 at 4
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::SteeringCorrection);
        assert_eq!(anomalies[0].grid_index, 3);
        assert_eq!(anomalies[0].magnitude, -50.0);
        assert_eq!(anomalies[0].point_count, 3);
        assert_eq!(anomalies[0].severity, Severity::Critical);
    }

    #[test]
    fn test_smooth_turn_is_not_a_correction() {
        let grid = SpatialGrid::new(8, 70.0).unwrap();
        let reference = aligned(1, &grid, &[100.0; 8]);
        let subject = with_inputs(
            aligned(2, &grid, &[100.0; 8]),
            &[],
            &[],
            &[0.0, 10.0, 20.0, 30.0, 30.0, 20.0, 10.0, 0.0],
        );
        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_sudden_braking_and_erratic_throttle() {
        let grid = SpatialGrid::new(8, 70.0).unwrap();
        let reference = aligned(1, &grid, &[100.0; 8]);
        let subject = with_inputs(
            aligned(2, &grid, &[100.0; 8]),
            &[100.0, 100.0, 60.0, 100.0, 60.0, 100.0, 100.0, 100.0],
            &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 80.0],
            &[],
        );
        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();

        let kinds: Vec<AnomalyKind> = anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![AnomalyKind::ErraticThrottle, AnomalyKind::SuddenBraking]
        );
        assert_eq!(anomalies[0].point_count, 3);
        assert_eq!(anomalies[1].grid_index, 7);
        assert_eq!(anomalies[1].magnitude, 80.0);
        // Throttle and brake overlap at the final point only
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::ThrottleBrakeOverlap));
    }

    #[test]
    fn test_reference_with_same_fault_cancels_it() {
        let grid = SpatialGrid::new(10, 90.0).unwrap();
        let throttle = [0.0, 50.0, 60.0, 50.0, 40.0, 0.0];
        let brake = [0.0, 20.0, 30.0, 20.0, 10.0, 0.0];
        let subject = with_inputs(aligned(2, &grid, &[100.0; 10]), &throttle, &brake, &[]);
        let reference = with_inputs(aligned(1, &grid, &[100.0; 10]), &throttle[1..], &brake[1..], &[]);

        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_milder_reference_fault_does_not_hide_worse_one() {
        let grid = SpatialGrid::new(60, 590.0).unwrap();
        let mut throttle = vec![0.0; 60];
        let mut brake = vec![0.0; 60];
        throttle[10..50].fill(80.0);
        brake[10..50].fill(90.0);
        let subject = with_inputs(aligned(2, &grid, &[100.0; 60]), &throttle, &brake, &[]);

        let mut light_throttle = vec![0.0; 60];
        let mut light_brake = vec![0.0; 60];
        light_throttle[10..14].fill(5.0);
        light_brake[10..14].fill(2.0);
        let reference = with_inputs(
            aligned(1, &grid, &[100.0; 60]),
            &light_throttle,
            &light_brake,
            &[],
        );
        let clean = aligned(1, &grid, &[100.0; 60]);

        let overlaps = |baseline: &AlignedLap| -> Vec<Anomaly> {
            detect_anomalies(&subject, Baseline::Reference(baseline), 15.0)
                .unwrap()
                .into_iter()
                .filter(|a| a.kind == AnomalyKind::ThrottleBrakeOverlap)
                .collect()
        };
        let against_clean = overlaps(&clean);
        let against_light = overlaps(&reference);
        for anomalies in [&against_clean, &against_light] {
            assert_eq!(anomalies.len(), 1);
            assert_eq!(anomalies[0].kind, AnomalyKind::ThrottleBrakeOverlap);
            assert_eq!(anomalies[0].grid_index, 10);
            assert_eq!(anomalies[0].point_count, 40);
            assert!((anomalies[0].magnitude - 72.0).abs() < 1e-9);
            assert_eq!(anomalies[0].severity, Severity::Critical);
        }
        assert!(against_light[0].reason.contains("reference peak 0.1 over 4 grid points"));
    }

    #[test]
    fn test_longer_fault_of_same_severity_is_reported() {
        let grid = SpatialGrid::new(30, 290.0).unwrap();
        let mut throttle = vec![0.0; 30];
        let mut brake = vec![0.0; 30];
        throttle[5..20].fill(40.0);
        brake[5..20].fill(40.0);
        let subject = with_inputs(aligned(2, &grid, &[100.0; 30]), &throttle, &brake, &[]);
        // Same peak and band, but 4 points instead of 15
        let reference = with_inputs(
            aligned(1, &grid, &[100.0; 30]),
            &throttle[..9],
            &brake[..9],
            &[],
        );

        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].point_count, 15);
    }

    #[test]
    fn test_results_ordered_by_distance() {
        let grid = SpatialGrid::new(10, 90.0).unwrap();
        let reference = aligned(1, &grid, &[100.0; 10]);
        let subject = with_inputs(
            aligned(
                2,
                &grid,
                &[100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 50.0, 100.0, 100.0],
            ),
            &[],
            &[0.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.0],
            &[],
        );
        let anomalies = detect_anomalies(&subject, Baseline::Reference(&reference), 15.0).unwrap();
        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0].kind, AnomalyKind::SuddenBraking);
        assert_eq!(anomalies[1].kind, AnomalyKind::SpeedAnomaly);
        assert!(anomalies[0].distance < anomalies[1].distance);
    }

    #[test]
    fn test_statistics_baseline() {
        let grid = SpatialGrid::new(5, 40.0).unwrap();
        let history = vec![
            aligned(1, &grid, &[100.0, 120.0, 140.0, 120.0, 100.0]),
            aligned(2, &grid, &[104.0, 124.0, 144.0, 124.0, 104.0]),
            aligned(3, &grid, &[102.0, 122.0, 142.0, 122.0, 102.0]),
        ];
        let stats = BaselineStats::from_history(&history).unwrap();
        let subject = aligned(4, &grid, &[101.0, 121.0, 120.0, 121.0, 101.0]);

        let anomalies = detect_anomalies(&subject, Baseline::Statistics(&stats), 3.0).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].grid_index, 2);
        assert!((anomalies[0].magnitude - 22.0).abs() < 1e-9);
        assert!(anomalies[0].reason.contains("learned norm"));
    }

    #[test]
    fn test_rolling_baseline() {
        let grid = SpatialGrid::new(40, 390.0).unwrap();
        let mut speeds = vec![150.0; 40];
        speeds[30] = 100.0;
        let subject = aligned(1, &grid, &speeds);
        let stats = BaselineStats::rolling::<20>(&subject);

        let anomalies = detect_anomalies(&subject, Baseline::Statistics(&stats), 3.0).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].grid_index, 30);
    }

    #[test]
    fn test_grid_mismatch() {
        let subject = aligned(2, &SpatialGrid::new(4, 30.0).unwrap(), &[100.0; 4]);
        let reference = aligned(1, &SpatialGrid::new(5, 30.0).unwrap(), &[100.0; 5]);
        assert!(matches!(
            detect_anomalies(&subject, Baseline::Reference(&reference), 15.0),
            Err(LapsyncError::GridMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_config() {
        let grid = SpatialGrid::new(4, 30.0).unwrap();
        let lap = aligned(1, &grid, &[100.0; 4]);
        assert!(matches!(
            detect_anomalies(&lap, Baseline::Reference(&lap), 0.0),
            Err(LapsyncError::InvalidConfig { .. })
        ));

        let config = AnomalyConfig {
            speed_severity: SeverityBands::new(30.0, 20.0),
            ..Default::default()
        };
        assert!(AnomalyDetector::new(config).is_err());
    }

    #[test]
    fn test_severity_bands() {
        let bands = SeverityBands::new(20.0, 30.0);
        assert_eq!(bands.classify(10.0), Severity::Minor);
        assert_eq!(bands.classify(20.0), Severity::Minor);
        assert_eq!(bands.classify(25.0), Severity::Warning);
        assert_eq!(bands.classify(-35.0), Severity::Critical);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_lap_against_itself_has_no_anomalies(
            points in prop::collection::vec(
                (0.0f64..300.0, 0.0f64..100.0, 0.0f64..120.0, -180.0f64..180.0),
                2..120,
            ),
            threshold in 0.1f64..50.0,
        ) {
            let grid = SpatialGrid::new(points.len(), 2000.0).unwrap();
            let lap = with_inputs(
                aligned(1, &grid, &points.iter().map(|p| p.0).collect::<Vec<_>>()),
                &points.iter().map(|p| p.1).collect::<Vec<_>>(),
                &points.iter().map(|p| p.2).collect::<Vec<_>>(),
                &points.iter().map(|p| p.3).collect::<Vec<_>>(),
            );
            let anomalies = detect_anomalies(&lap, Baseline::Reference(&lap), threshold).unwrap();
            prop_assert!(anomalies.is_empty());
        }
    }
}
