use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::errors::LapsyncError;
use crate::sync;
use crate::telemetry::{Lap, TelemetrySample};

/// A risk value above this names the point's risk kind
const RISK_KIND_THRESHOLD: f64 = 30.0;
const HIGH_RISK_THRESHOLD: f64 = 50.0;
const CRITICAL_RISK_THRESHOLD: f64 = 75.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskKind {
    #[default]
    Low,
    Lockup,
    Spin,
    Oversteer,
}

impl Display for RiskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskKind::Low => write!(f, "low"),
            RiskKind::Lockup => write!(f, "lock-up"),
            RiskKind::Spin => write!(f, "spin"),
            RiskKind::Oversteer => write!(f, "oversteer"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskLevel::Critical
        } else if score >= 50.0 {
            RiskLevel::High
        } else if score >= 30.0 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

/// Incident risk at one sample, each component 0-100.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointRisk {
    pub distance: f64,
    /// Heavy braking at speed, worse with steering lock applied
    pub lockup: f64,
    /// Throttle with steering at low speed, typical of corner exits
    pub spin: f64,
    /// Steering change scaled by speed
    pub oversteer: f64,
    pub total: f64,
    pub kind: RiskKind,
}

/// Scores every sample. Oversteer compares each sample's steering magnitude
/// with the previous sample's.
pub fn point_risks(samples: &[TelemetrySample]) -> Vec<PointRisk> {
    let mut previous_steering = None;
    samples
        .iter()
        .map(|sample| {
            let steering = sample.steering_angle.abs();
            let speed = sample.speed;
            let lockup = ((sample.brake_pressure_front / 100.0)
                * (speed / 200.0)
                * (1.0 + steering / 200.0)
                * 100.0)
                .clamp(0.0, 100.0);
            let spin = ((sample.throttle / 100.0) * (steering / 100.0) * (1.0 - speed / 300.0) * 150.0)
                .clamp(0.0, 100.0);
            let steering_rate = previous_steering.map_or(0.0, |prev: f64| (steering - prev).abs());
            let oversteer = (steering_rate * speed / 150.0).clamp(0.0, 100.0);
            previous_steering = Some(steering);

            let total = lockup.max(spin).max(oversteer);
            let kind = if total <= RISK_KIND_THRESHOLD {
                RiskKind::Low
            } else if total == lockup {
                RiskKind::Lockup
            } else if total == spin {
                RiskKind::Spin
            } else {
                RiskKind::Oversteer
            };

            PointRisk {
                distance: sample.distance,
                lockup,
                spin,
                oversteer,
                total,
                kind,
            }
        })
        .collect()
}

/// Scores a lap on a grid of `grid_size` points. Resampling first makes the
/// oversteer term compare steering over the same distance whatever rate the
/// lap was recorded at.
pub fn lap_risks(lap: &Lap, grid_size: usize) -> Result<Vec<PointRisk>, LapsyncError> {
    let (_, aligned) = sync::resample(std::slice::from_ref(lap), grid_size)?;
    Ok(aligned
        .first()
        .map(|a| point_risks(&a.samples))
        .unwrap_or_default())
}

/// Most frequent risk kind, ties resolved towards the more severe kind.
pub fn dominant_kind<'a>(risks: impl IntoIterator<Item = &'a PointRisk>) -> RiskKind {
    risks
        .into_iter()
        .counts_by(|r| r.kind)
        .into_iter()
        .max_by(|(kind_a, count_a), (kind_b, count_b)| {
            count_a.cmp(count_b).then(kind_a.cmp(kind_b))
        })
        .map(|(kind, _)| kind)
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub average: f64,
    pub max: f64,
    pub level: RiskLevel,
    /// Points with total risk above 50
    pub high_risk_points: usize,
    /// Points with total risk above 75
    pub critical_points: usize,
    pub dominant: RiskKind,
}

pub fn summarize(risks: &[PointRisk]) -> RiskSummary {
    let average = if risks.is_empty() {
        0.0
    } else {
        risks.iter().map(|r| r.total).sum::<f64>() / risks.len() as f64
    };
    RiskSummary {
        average,
        max: risks.iter().map(|r| r.total).fold(0.0, f64::max),
        level: RiskLevel::from_score(average),
        high_risk_points: risks.iter().filter(|r| r.total > HIGH_RISK_THRESHOLD).count(),
        critical_points: risks
            .iter()
            .filter(|r| r.total > CRITICAL_RISK_THRESHOLD)
            .count(),
        dominant: dominant_kind(risks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(speed: f64, throttle: f64, brake: f64, steering: f64) -> TelemetrySample {
        TelemetrySample {
            speed,
            throttle,
            brake_pressure_front: brake,
            steering_angle: steering,
            ..Default::default()
        }
    }

    #[test]
    fn test_lockup_risk() {
        let risks = point_risks(&[sample(200.0, 0.0, 100.0, 0.0)]);
        assert_eq!(risks[0].lockup, 100.0);
        assert_eq!(risks[0].kind, RiskKind::Lockup);

        let risks = point_risks(&[sample(100.0, 0.0, 50.0, 0.0)]);
        assert!((risks[0].lockup - 25.0).abs() < 1e-9);
        assert_eq!(risks[0].kind, RiskKind::Low);
    }

    #[test]
    fn test_spin_risk_is_never_negative() {
        let risks = point_risks(&[sample(330.0, 100.0, 0.0, 90.0)]);
        assert_eq!(risks[0].spin, 0.0);

        let risks = point_risks(&[sample(60.0, 100.0, 0.0, 90.0)]);
        // 1.0 * 0.9 * 0.8 * 150 is capped
        assert_eq!(risks[0].spin, 100.0);
        assert_eq!(risks[0].kind, RiskKind::Spin);
    }

    #[test]
    fn test_oversteer_uses_steering_change() {
        let risks = point_risks(&[sample(150.0, 0.0, 0.0, 0.0), sample(150.0, 0.0, 0.0, -40.0)]);
        assert_eq!(risks[0].oversteer, 0.0);
        assert!((risks[1].oversteer - 40.0).abs() < 1e-9);
        assert_eq!(risks[1].kind, RiskKind::Oversteer);
    }

    fn steering_ramp(step_m: f64) -> Lap {
        let points = (1000.0 / step_m) as usize;
        Lap {
            lap_number: 1,
            lap_time: 24.0,
            samples: (0..=points)
                .map(|i| {
                    let distance = i as f64 * step_m;
                    TelemetrySample {
                        distance,
                        ..sample(150.0, 0.0, 0.0, distance / 10.0)
                    }
                })
                .collect(),
            absent_channels: Default::default(),
        }
    }

    #[test]
    fn test_lap_risks_do_not_depend_on_recording_rate() {
        let dense = steering_ramp(1.0);
        let sparse = steering_ramp(10.0);

        // Raw samples see a tenth of the steering change per step
        let raw_dense = summarize(&point_risks(&dense.samples));
        let raw_sparse = summarize(&point_risks(&sparse.samples));
        assert!((raw_sparse.max - raw_dense.max * 10.0).abs() < 1e-6);

        let dense = lap_risks(&dense, 101).unwrap();
        let sparse = lap_risks(&sparse, 101).unwrap();
        assert_eq!(dense.len(), 101);
        assert_eq!(sparse.len(), 101);
        for (d, s) in dense.iter().zip(&sparse) {
            assert!((d.distance - s.distance).abs() < 1e-9);
            assert!((d.oversteer - s.oversteer).abs() < 1e-6);
        }
        assert!((dense[50].oversteer - 1.0).abs() < 1e-6);
        assert!((summarize(&dense).average - summarize(&sparse).average).abs() < 1e-6);
    }

    #[test]
    fn test_summary() {
        let risks = point_risks(&[
            sample(200.0, 0.0, 100.0, 0.0),
            sample(200.0, 0.0, 100.0, 0.0),
            sample(100.0, 0.0, 0.0, 0.0),
            sample(100.0, 0.0, 0.0, 0.0),
        ]);
        let summary = summarize(&risks);
        assert!((summary.average - 50.0).abs() < 1e-9);
        assert_eq!(summary.max, 100.0);
        assert_eq!(summary.level, RiskLevel::High);
        assert_eq!(summary.high_risk_points, 2);
        assert_eq!(summary.critical_points, 2);
        // Two lock-up points tie with two low points
        assert_eq!(summary.dominant, RiskKind::Lockup);
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.average, 0.0);
        assert_eq!(summary.level, RiskLevel::Low);
        assert_eq!(summary.dominant, RiskKind::Low);
    }
}
