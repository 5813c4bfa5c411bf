// Driving style profile built from every lap of a session

use std::fmt::Display;

use itertools::Itertools;
use log::info;
use serde::Serialize;

use super::tire_stress::instant_stress;
use crate::errors::LapsyncError;
use crate::sync::AlignedLap;
use crate::telemetry::Channel;

/// Score used when the channels behind a trait were never recorded
const NEUTRAL_SCORE: f64 = 50.0;
/// Brake pressure change between grid points that counts as a stab
const SUDDEN_BRAKE_CHANGE: f64 = 50.0;
/// Steering beyond this many degrees counts as cornering
const CORNERING_STEERING_DEG: f64 = 10.0;
/// Brake pressure beyond this counts as a braking zone
const HEAVY_BRAKE: f64 = 50.0;
/// Laps compared at each end of the session for adaptability
const ADAPTABILITY_LAPS: usize = 3;

/// The six traits of a profile, each 0-100.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnaScores {
    /// Higher means sharper brake application
    pub brake_aggressiveness: f64,
    /// Higher means smaller throttle changes
    pub throttle_smoothness: f64,
    /// Higher means fewer steering reversals
    pub steering_precision: f64,
    /// Higher means more speed carried into corners and braking zones
    pub risk_tendency: f64,
    /// Higher means closer average speeds from lap to lap
    pub consistency: f64,
    /// Above 50 when the last laps are faster than the first ones
    pub adaptability: f64,
}

impl DnaScores {
    pub fn overall(&self) -> f64 {
        (self.brake_aggressiveness
            + self.throttle_smoothness
            + self.steering_precision
            + self.risk_tendency
            + self.consistency
            + self.adaptability)
            / 6.0
    }

    /// Traits inside their good range, and traits below or above it.
    pub fn strengths_and_weaknesses(&self) -> (Vec<String>, Vec<String>) {
        let traits = [
            ("Brake Control", self.brake_aggressiveness, 50.0, 70.0, false),
            ("Throttle Smoothness", self.throttle_smoothness, 75.0, 100.0, true),
            ("Steering Precision", self.steering_precision, 75.0, 100.0, true),
            ("Risk Management", self.risk_tendency, 40.0, 60.0, true),
            ("Consistency", self.consistency, 75.0, 100.0, true),
            ("Adaptability", self.adaptability, 60.0, 100.0, true),
        ];
        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();
        for (name, value, low, high, flag_high) in traits {
            if (low..=high).contains(&value) {
                strengths.push(format!("{} ({:.1}/100)", name, value));
            } else if value < low {
                weaknesses.push(format!("{} too low ({:.1}/100)", name, value));
            } else if flag_high {
                weaknesses.push(format!("{} too high ({:.1}/100)", name, value));
            }
        }
        if strengths.is_empty() {
            strengths.push("Keep working on fundamentals".to_string());
        }
        if weaknesses.is_empty() {
            weaknesses.push("Excellent all-around profile".to_string());
        }
        (strengths, weaknesses)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DriverType {
    AggressiveRacer,
    SmoothOperator,
    WildCard,
    ConservativeDriver,
    BalancedPerformer,
    TechnicalSpecialist,
    DevelopingDriver,
}

impl DriverType {
    /// First matching archetype, checked from the most distinctive one down.
    pub fn classify(scores: &DnaScores) -> Self {
        let DnaScores {
            brake_aggressiveness: aggressiveness,
            throttle_smoothness: smoothness,
            steering_precision: precision,
            risk_tendency: risk,
            consistency,
            ..
        } = *scores;

        if aggressiveness > 70.0 && risk > 70.0 {
            DriverType::AggressiveRacer
        } else if smoothness > 75.0 && consistency > 75.0 {
            DriverType::SmoothOperator
        } else if risk > 70.0 && consistency < 50.0 {
            DriverType::WildCard
        } else if risk < 40.0 && aggressiveness < 40.0 {
            DriverType::ConservativeDriver
        } else if aggressiveness > 50.0
            && aggressiveness < 70.0
            && smoothness > 50.0
            && smoothness < 70.0
        {
            DriverType::BalancedPerformer
        } else if precision > 75.0 && smoothness > 70.0 {
            DriverType::TechnicalSpecialist
        } else {
            DriverType::DevelopingDriver
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DriverType::AggressiveRacer => {
                "High-pressure braking, late apex, risk-taking approach. Exciting but tire-demanding style."
            }
            DriverType::SmoothOperator => {
                "Minimal input corrections, smooth transitions, excellent tire management. Ideal for endurance racing."
            }
            DriverType::WildCard => {
                "Unpredictable performance, high speed variance. Potential is there but needs consistency work."
            }
            DriverType::ConservativeDriver => {
                "Safe approach, early braking, prioritizes finishing over pace. Room for more aggression."
            }
            DriverType::BalancedPerformer => {
                "Well-rounded driving style with no major weaknesses. Solid foundation for improvement."
            }
            DriverType::TechnicalSpecialist => {
                "Precision steering, optimized racing lines. Strong technical skills, may benefit from more confidence."
            }
            DriverType::DevelopingDriver => {
                "Mixed characteristics, still finding optimal driving style. Focus on fundamentals."
            }
        }
    }
}

impl Display for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DriverType::AggressiveRacer => "Aggressive Racer",
            DriverType::SmoothOperator => "Smooth Operator",
            DriverType::WildCard => "Wild Card",
            DriverType::ConservativeDriver => "Conservative Driver",
            DriverType::BalancedPerformer => "Balanced Performer",
            DriverType::TechnicalSpecialist => "Technical Specialist",
            DriverType::DevelopingDriver => "Developing Driver",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDna {
    pub lap_count: usize,
    #[serde(flatten)]
    pub scores: DnaScores,
    pub overall: f64,
    pub driver_type: DriverType,
    pub driving_style: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

/// Profiles a driver from laps on one shared grid, ordered by lap number.
/// Input changes are measured between neighboring grid points, so laps
/// recorded at different rates are profiled alike.
pub fn profile(laps: &[AlignedLap]) -> Result<DriverDna, LapsyncError> {
    let Some(first) = laps.first() else {
        return Err(LapsyncError::NoBaselineLap {
            role: "profile".to_string(),
            reason: "the session has no laps".to_string(),
        });
    };
    for lap in &laps[1..] {
        first.ensure_same_grid(lap)?;
    }

    let scores = DnaScores {
        brake_aggressiveness: brake_aggressiveness(laps),
        throttle_smoothness: throttle_smoothness(laps),
        steering_precision: steering_precision(laps),
        risk_tendency: risk_tendency(laps),
        consistency: consistency(laps),
        adaptability: adaptability(laps),
    };
    let driver_type = DriverType::classify(&scores);
    let (strengths, weaknesses) = scores.strengths_and_weaknesses();
    info!("Driver profile over {} laps: {}", laps.len(), driver_type);

    Ok(DriverDna {
        lap_count: laps.len(),
        overall: scores.overall(),
        scores,
        driver_type,
        driving_style: driver_type.description().to_string(),
        strengths,
        weaknesses,
    })
}

fn recorded<'a>(laps: &'a [AlignedLap], channel: Channel) -> Vec<&'a AlignedLap> {
    laps.iter().filter(|l| l.has_channel(channel)).collect()
}

fn point_count(laps: &[&AlignedLap]) -> usize {
    laps.iter().map(|l| l.defined_len()).sum()
}

/// Changes between neighboring grid points, never across a lap boundary
fn steps(laps: &[&AlignedLap], channel: Channel) -> Vec<f64> {
    laps.iter()
        .flat_map(|l| l.channel(channel).into_iter().tuple_windows().map(|(a, b)| b - a))
        .collect()
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Linearly interpolated quantile, `q` in 0-1
fn quantile(mut values: Vec<f64>, q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let position = q * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    Some(values[lower] + (values[upper] - values[lower]) * (position - lower as f64))
}

fn brake_aggressiveness(laps: &[AlignedLap]) -> f64 {
    let braking = recorded(laps, Channel::BrakePressureFront);
    let points = point_count(&braking);
    if points == 0 {
        return NEUTRAL_SCORE;
    }
    let stabs = steps(&braking, Channel::BrakePressureFront)
        .into_iter()
        .filter(|change| change.abs() > SUDDEN_BRAKE_CHANGE)
        .count();
    let average_pressure = mean(
        braking
            .iter()
            .flat_map(|l| l.channel(Channel::BrakePressureFront))
            .filter(|&p| p > 0.0),
    )
    .unwrap_or(0.0);
    (stabs as f64 / points as f64 * 1000.0 + average_pressure / 2.0).min(100.0)
}

fn throttle_smoothness(laps: &[AlignedLap]) -> f64 {
    let throttle = recorded(laps, Channel::Throttle);
    match mean(steps(&throttle, Channel::Throttle).into_iter().map(f64::abs)) {
        Some(change) => (100.0 - change * 5.0).max(0.0),
        None => NEUTRAL_SCORE,
    }
}

fn steering_precision(laps: &[AlignedLap]) -> f64 {
    let steering = recorded(laps, Channel::SteeringAngle);
    let points = point_count(&steering);
    if points == 0 {
        return NEUTRAL_SCORE;
    }
    let reversals: usize = steering
        .iter()
        .map(|l| {
            l.channel(Channel::SteeringAngle)
                .into_iter()
                .tuple_windows()
                .map(|(a, b)| b - a)
                .tuple_windows()
                .filter(|(before, after)| before * after < 0.0)
                .count()
        })
        .sum();
    (100.0 - reversals as f64 / points as f64 * 500.0).max(0.0)
}

/// Average of up to three factors: speed carried through corners relative
/// to the lap average, speed at heavy braking against the fastest quarter of
/// the lap, and mean tire stress.
fn risk_tendency(laps: &[AlignedLap]) -> f64 {
    let samples = || laps.iter().flat_map(|l| l.samples.iter());
    let mut factors = Vec::new();

    if let Some(overall_speed) = mean(samples().map(|s| s.speed)).filter(|&s| s > 0.0) {
        let cornering = mean(
            recorded(laps, Channel::SteeringAngle)
                .iter()
                .flat_map(|l| l.samples.iter())
                .filter(|s| s.steering_angle.abs() > CORNERING_STEERING_DEG)
                .map(|s| s.speed),
        );
        if let Some(cornering) = cornering {
            factors.push((cornering / overall_speed - 0.7) * 200.0);
        }
    }

    let braking = mean(
        recorded(laps, Channel::BrakePressureFront)
            .iter()
            .flat_map(|l| l.samples.iter())
            .filter(|s| s.brake_pressure_front > HEAVY_BRAKE)
            .map(|s| s.speed),
    );
    if let (Some(braking), Some(fast)) = (braking, quantile(samples().map(|s| s.speed).collect(), 0.75)) {
        factors.push(if braking > fast { 50.0 } else { 20.0 });
    }

    if let Some(stress) = mean(samples().map(|s| {
        instant_stress(s.speed, s.throttle, s.brake_pressure_front, s.steering_angle).mean()
    })) {
        factors.push(stress);
    }

    mean(factors)
        .map(|risk| risk.clamp(0.0, 100.0))
        .unwrap_or(NEUTRAL_SCORE)
}

fn consistency(laps: &[AlignedLap]) -> f64 {
    let averages: Vec<f64> = laps.iter().filter_map(|l| mean(l.speeds())).collect();
    if averages.len() < 2 {
        return NEUTRAL_SCORE;
    }
    let session_mean = averages.iter().sum::<f64>() / averages.len() as f64;
    if session_mean <= 0.0 {
        return NEUTRAL_SCORE;
    }
    let variance = averages
        .iter()
        .map(|a| (a - session_mean).powi(2))
        .sum::<f64>()
        / (averages.len() - 1) as f64;
    (100.0 - variance.sqrt() / session_mean * 100.0).max(0.0)
}

/// Average speed of the last laps against the first ones.
fn adaptability(laps: &[AlignedLap]) -> f64 {
    let window = ADAPTABILITY_LAPS.min(laps.len());
    let first = mean(laps[..window].iter().flat_map(|l| l.speeds()));
    let last = mean(laps[laps.len() - window..].iter().flat_map(|l| l.speeds()));
    match (first, last) {
        (Some(first), Some(last)) if first > 0.0 => {
            (50.0 + (last - first) / first * 500.0).clamp(0.0, 100.0)
        }
        _ => NEUTRAL_SCORE,
    }
}
