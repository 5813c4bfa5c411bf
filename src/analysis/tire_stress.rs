use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::grip_analyzer::DEFAULT_TRACK_TEMP_C;
use crate::errors::LapsyncError;
use crate::sync::AlignedLap;
use crate::telemetry::WeatherConditions;

/// Track temperature at which the wear multiplier is 1, °C
const NEUTRAL_TRACK_TEMP_C: f64 = 30.0;
/// Running tires sit roughly this much above the track surface, °C
const TIRE_OVER_TRACK_TEMP_C: f64 = 40.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TireConfig {
    /// Wear multiplier change per °C of track temperature above neutral
    pub temp_wear_per_c: f64,
    /// Wear accumulated over a lap by a constant stress of 100
    pub wear_per_lap_at_full_stress: f64,
}

impl Default for TireConfig {
    fn default() -> Self {
        Self {
            temp_wear_per_c: 0.02,
            wear_per_lap_at_full_stress: 100.0,
        }
    }
}

impl TireConfig {
    pub fn validate(&self) -> Result<(), LapsyncError> {
        let values = [
            ("tires.temp_wear_per_c", self.temp_wear_per_c),
            (
                "tires.wear_per_lap_at_full_stress",
                self.wear_per_lap_at_full_stress,
            ),
        ];
        for (field, value) in values {
            if !(value.is_finite() && value >= 0.0) {
                return Err(LapsyncError::InvalidConfig {
                    field: field.to_string(),
                    reason: "must be a non-negative number".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tire {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl Display for Tire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tire::FrontLeft => write!(f, "FL"),
            Tire::FrontRight => write!(f, "FR"),
            Tire::RearLeft => write!(f, "RL"),
            Tire::RearRight => write!(f, "RR"),
        }
    }
}

/// One value per corner of the car.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TireValues {
    pub front_left: f64,
    pub front_right: f64,
    pub rear_left: f64,
    pub rear_right: f64,
}

impl TireValues {
    pub fn get(&self, tire: Tire) -> f64 {
        match tire {
            Tire::FrontLeft => self.front_left,
            Tire::FrontRight => self.front_right,
            Tire::RearLeft => self.rear_left,
            Tire::RearRight => self.rear_right,
        }
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            front_left: f(self.front_left),
            front_right: f(self.front_right),
            rear_left: f(self.rear_left),
            rear_right: f(self.rear_right),
        }
    }

    pub fn mean(&self) -> f64 {
        (self.front_left + self.front_right + self.rear_left + self.rear_right) / 4.0
    }

    /// Tire with the largest value, the first one in FL, FR, RL, RR order on ties
    pub fn max_tire(&self) -> Tire {
        [Tire::FrontLeft, Tire::FrontRight, Tire::RearLeft, Tire::RearRight]
            .into_iter()
            .fold(Tire::FrontLeft, |best, tire| {
                if self.get(tire) > self.get(best) {
                    tire
                } else {
                    best
                }
            })
    }

    fn add_scaled(&mut self, other: &TireValues, scale: f64) {
        self.front_left += other.front_left * scale;
        self.front_right += other.front_right * scale;
        self.rear_left += other.rear_left * scale;
        self.rear_right += other.rear_right * scale;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StressLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl StressLevel {
    /// Level from the average remaining tire condition, 0-100
    pub fn from_condition(condition: f64) -> Self {
        if condition < 30.0 {
            StressLevel::Critical
        } else if condition < 50.0 {
            StressLevel::High
        } else if condition < 70.0 {
            StressLevel::Moderate
        } else {
            StressLevel::Low
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            StressLevel::Critical => "Pit now, critical tire wear",
            StressLevel::High => "Consider pitting soon",
            StressLevel::Moderate => "Tires holding up, monitor closely",
            StressLevel::Low => "Tires in good condition",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TireStressPoint {
    pub distance: f64,
    pub instant_stress: TireValues,
    pub cumulative_wear: TireValues,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TireStressReport {
    pub lap_number: u32,
    pub track_temp: f64,
    pub temp_multiplier: f64,
    pub points: Vec<TireStressPoint>,
    pub wear: TireValues,
    /// 100 for a new tire, 0 for a worn out one
    pub condition: TireValues,
    pub estimated_temp: TireValues,
    pub most_stressed: Tire,
    pub overall_stress: f64,
    pub level: StressLevel,
    pub recommendation: String,
}

/// Wear multiplier for a track temperature. Never negative.
pub fn temp_multiplier(track_temp: f64, config: &TireConfig) -> f64 {
    (1.0 + (track_temp - NEUTRAL_TRACK_TEMP_C) * config.temp_wear_per_c).max(0.0)
}

/// Stress on each tire at one instant, before the temperature multiplier.
///
/// Positive steering is a right turn and loads the left side. Braking loads
/// the fronts and throttle the rears.
pub fn instant_stress(speed: f64, throttle: f64, brake: f64, steering: f64) -> TireValues {
    let lateral = steering.abs() * (speed / 150.0) * 0.5;
    let traction = throttle * (speed / 200.0) * 0.3 * 0.6;
    let braking = brake * 0.8 * 0.6;
    let (outer_front, inner_front, outer_rear, inner_rear) =
        (lateral * 1.2, lateral * 0.8, lateral * 1.0, lateral * 0.6);

    if steering > 0.0 {
        TireValues {
            front_left: outer_front + braking,
            front_right: inner_front + braking,
            rear_left: outer_rear + traction,
            rear_right: inner_rear + traction,
        }
    } else {
        TireValues {
            front_left: inner_front + braking,
            front_right: outer_front + braking,
            rear_left: inner_rear + traction,
            rear_right: outer_rear + traction,
        }
    }
}

/// Per-tire stress along an aligned lap and the wear it adds up to.
///
/// Wear accrues per grid point in proportion to one grid step of the full
/// grid, so a lap's total does not depend on how many points the grid has.
pub fn analyze_tires(
    lap: &AlignedLap,
    weather: &WeatherConditions,
    config: &TireConfig,
) -> TireStressReport {
    let track_temp = weather.track_temp.unwrap_or(DEFAULT_TRACK_TEMP_C);
    let multiplier = temp_multiplier(track_temp, config);
    let wear_scale = if lap.grid_len > 0 {
        config.wear_per_lap_at_full_stress / 100.0 / lap.grid_len as f64
    } else {
        0.0
    };

    let mut wear = TireValues::default();
    let points: Vec<TireStressPoint> = lap
        .samples
        .iter()
        .map(|s| {
            let stress = instant_stress(s.speed, s.throttle, s.brake_pressure_front, s.steering_angle)
                .map(|v| v * multiplier);
            wear.add_scaled(&stress, wear_scale);
            TireStressPoint {
                distance: s.distance,
                instant_stress: stress,
                cumulative_wear: wear,
            }
        })
        .collect();

    let condition = wear.map(|w| (100.0 - w).max(0.0));
    let average_condition = condition.mean();
    let level = StressLevel::from_condition(average_condition);

    TireStressReport {
        lap_number: lap.lap_number,
        track_temp,
        temp_multiplier: multiplier,
        points,
        wear,
        condition,
        estimated_temp: condition
            .map(|c| track_temp + TIRE_OVER_TRACK_TEMP_C + (100.0 - c) * 0.3),
        most_stressed: wear.max_tire(),
        overall_stress: 100.0 - average_condition,
        level,
        recommendation: level.recommendation().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{AlignedSample, SpatialGrid};

    fn aligned(grid: &SpatialGrid, sample: impl Fn(f64) -> AlignedSample) -> AlignedLap {
        AlignedLap {
            lap_number: 4,
            lap_time: 60.0,
            grid_len: grid.len(),
            grid_step: grid.step(),
            track_length: grid.track_length(),
            samples: grid.points().iter().map(|&d| sample(d)).collect(),
            absent_channels: Default::default(),
        }
    }

    #[test]
    fn test_turn_direction_loads_outside_tires() {
        let right = instant_stress(150.0, 0.0, 0.0, 40.0);
        assert!((right.front_left - 24.0).abs() < 1e-9);
        assert!((right.front_right - 16.0).abs() < 1e-9);
        assert!((right.rear_left - 20.0).abs() < 1e-9);
        assert!((right.rear_right - 12.0).abs() < 1e-9);
        assert_eq!(right.max_tire(), Tire::FrontLeft);

        let left = instant_stress(150.0, 0.0, 0.0, -40.0);
        assert_eq!(left.front_right, right.front_left);
        assert_eq!(left.rear_right, right.rear_left);
        assert_eq!(left.max_tire(), Tire::FrontRight);
    }

    #[test]
    fn test_braking_and_traction() {
        let braking = instant_stress(100.0, 0.0, 50.0, 0.0);
        assert!((braking.front_left - 24.0).abs() < 1e-9);
        assert_eq!(braking.front_left, braking.front_right);
        assert_eq!(braking.rear_left, 0.0);

        let traction = instant_stress(200.0, 100.0, 0.0, 0.0);
        assert!((traction.rear_left - 18.0).abs() < 1e-9);
        assert_eq!(traction.front_left, 0.0);
    }

    #[test]
    fn test_temp_multiplier() {
        let config = TireConfig::default();
        assert_eq!(temp_multiplier(30.0, &config), 1.0);
        assert!((temp_multiplier(45.0, &config) - 1.3).abs() < 1e-9);
        assert_eq!(temp_multiplier(-40.0, &config), 0.0);
    }

    #[test]
    fn test_wear_independent_of_grid_density() {
        let braking = |d: f64| AlignedSample {
            distance: d,
            speed: 100.0,
            brake_pressure_front: 50.0,
            ..Default::default()
        };
        let weather = WeatherConditions {
            track_temp: Some(30.0),
            ..Default::default()
        };
        let coarse = analyze_tires(
            &aligned(&SpatialGrid::new(11, 1000.0).unwrap(), braking),
            &weather,
            &TireConfig::default(),
        );
        let fine = analyze_tires(
            &aligned(&SpatialGrid::new(1001, 1000.0).unwrap(), braking),
            &weather,
            &TireConfig::default(),
        );

        // A constant 24 on the fronts wears them by 24 over the lap
        assert!((coarse.wear.front_left - 24.0).abs() < 1e-9);
        assert!((fine.wear.front_left - 24.0).abs() < 1e-9);
        assert_eq!(coarse.wear.rear_left, 0.0);
        assert!((coarse.condition.front_right - 76.0).abs() < 1e-9);
        assert_eq!(coarse.condition.rear_right, 100.0);
        // Average condition 88
        assert!((coarse.overall_stress - 12.0).abs() < 1e-9);
        assert_eq!(coarse.level, StressLevel::Low);
        assert_eq!(coarse.most_stressed, Tire::FrontLeft);
        assert!((coarse.estimated_temp.front_left - (30.0 + 40.0 + 24.0 * 0.3)).abs() < 1e-9);
        assert_eq!(coarse.points.len(), 11);
        assert!(
            coarse
                .points
                .windows(2)
                .all(|w| w[1].cumulative_wear.front_left >= w[0].cumulative_wear.front_left)
        );
    }

    #[test]
    fn test_hot_track_wears_out_tires() {
        let grid = SpatialGrid::new(101, 1000.0).unwrap();
        let lap = aligned(&grid, |d| AlignedSample {
            distance: d,
            speed: 150.0,
            throttle: 100.0,
            brake_pressure_front: 120.0,
            steering_angle: 90.0,
            ..Default::default()
        });
        let weather = WeatherConditions {
            track_temp: Some(55.0),
            ..Default::default()
        };
        let report = analyze_tires(&lap, &weather, &TireConfig::default());

        assert!((report.temp_multiplier - 1.5).abs() < 1e-9);
        assert_eq!(report.condition.front_left, 0.0);
        assert_eq!(report.level, StressLevel::Critical);
        assert_eq!(report.recommendation, "Pit now, critical tire wear");
    }

    #[test]
    fn test_invalid_config() {
        let config = TireConfig {
            temp_wear_per_c: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LapsyncError::InvalidConfig { .. })
        ));
        assert!(TireConfig::default().validate().is_ok());
    }
}
