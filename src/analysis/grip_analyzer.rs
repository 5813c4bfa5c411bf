use serde::{Deserialize, Serialize};

use crate::errors::LapsyncError;
use crate::sync;
use crate::telemetry::{Lap, TelemetrySample, WeatherConditions};

pub(crate) const DEFAULT_TRACK_TEMP_C: f64 = 35.0;
const DEFAULT_AMBIENT_TEMP_C: f64 = 25.0;
const DEFAULT_HUMIDITY_PCT: f64 = 50.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GripConfig {
    /// Track temperature with the best grip, °C
    pub optimal_track_temp_c: f64,
    /// Grip points lost per °C away from the optimum
    pub temp_penalty_per_c: f64,
    /// Points with a smaller grip margin are critical
    pub critical_margin: f64,
    /// Share of grip lost by the end of the lap as the tires go off
    pub wear_factor: f64,
}

impl Default for GripConfig {
    fn default() -> Self {
        Self {
            optimal_track_temp_c: 37.5,
            temp_penalty_per_c: 2.0,
            critical_margin: 10.0,
            wear_factor: 0.1,
        }
    }
}

impl GripConfig {
    pub fn validate(&self) -> Result<(), LapsyncError> {
        if !(0.0..=1.0).contains(&self.wear_factor) {
            return Err(LapsyncError::InvalidConfig {
                field: "grip.wear_factor".to_string(),
                reason: "must be between 0 and 1".to_string(),
            });
        }
        if !(self.temp_penalty_per_c.is_finite() && self.temp_penalty_per_c >= 0.0) {
            return Err(LapsyncError::InvalidConfig {
                field: "grip.temp_penalty_per_c".to_string(),
                reason: "must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherFactors {
    pub track_temp: f64,
    pub ambient_temp: f64,
    pub humidity: f64,
    pub temp_factor: f64,
    pub humidity_factor: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GripPoint {
    pub distance: f64,
    pub grip_demand: f64,
    pub grip_available: f64,
    /// Positive means grip to spare, negative means sliding
    pub grip_margin: f64,
    pub lateral_load: f64,
    pub position_x: f64,
    pub position_y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GripReport {
    pub lap_number: u32,
    /// Grip the weather allows, 0-100
    pub overall_grip_index: f64,
    pub weather_factors: WeatherFactors,
    pub points: Vec<GripPoint>,
    pub critical_points: usize,
    pub recommendation: String,
}

/// Weather-derived grip index. Missing weather values fall back to typical
/// race conditions.
pub fn weather_grip(weather: &WeatherConditions, config: &GripConfig) -> WeatherFactors {
    let track_temp = weather.track_temp.unwrap_or(DEFAULT_TRACK_TEMP_C);
    let humidity = weather.humidity.unwrap_or(DEFAULT_HUMIDITY_PCT);
    WeatherFactors {
        track_temp,
        ambient_temp: weather.ambient_temp.unwrap_or(DEFAULT_AMBIENT_TEMP_C),
        humidity,
        temp_factor: (100.0
            - (track_temp - config.optimal_track_temp_c).abs() * config.temp_penalty_per_c)
            .clamp(0.0, 100.0),
        humidity_factor: (100.0 - humidity * 0.5).clamp(0.0, 100.0),
    }
}

/// Compares the grip each sample demands with the grip the conditions allow.
pub fn analyze_grip(
    lap_number: u32,
    samples: &[TelemetrySample],
    weather: &WeatherConditions,
    config: &GripConfig,
) -> GripReport {
    let factors = weather_grip(weather, config);
    let overall = factors.temp_factor * 0.6 + factors.humidity_factor * 0.4;
    let max_distance = samples.last().map(|s| s.distance).unwrap_or(0.0);

    let points: Vec<GripPoint> = samples
        .iter()
        .map(|s| {
            let lateral_load = (s.speed / 200.0) * (s.steering_angle.abs() / 100.0) * 100.0;
            let longitudinal_load = s.brake_pressure_front * 1.5;
            let grip_demand = lateral_load.hypot(longitudinal_load).min(100.0);
            let grip_available =
                overall * (1.0 - s.distance / (max_distance + 1.0) * config.wear_factor);
            GripPoint {
                distance: s.distance,
                grip_demand,
                grip_available,
                grip_margin: grip_available - grip_demand,
                lateral_load,
                position_x: s.position_x,
                position_y: s.position_y,
            }
        })
        .collect();

    let recommendation = if overall > 70.0 {
        "Good grip conditions"
    } else if overall > 50.0 {
        "Caution: Reduced grip"
    } else {
        "Warning: Low grip conditions"
    };

    GripReport {
        lap_number,
        overall_grip_index: overall,
        weather_factors: factors,
        critical_points: points
            .iter()
            .filter(|p| p.grip_margin < config.critical_margin)
            .count(),
        points,
        recommendation: recommendation.to_string(),
    }
}

/// [`analyze_grip`] on the lap resampled to `grid_size` points.
pub fn analyze_lap_grip(
    lap: &Lap,
    weather: &WeatherConditions,
    config: &GripConfig,
    grid_size: usize,
) -> Result<GripReport, LapsyncError> {
    let (_, aligned) = sync::resample(std::slice::from_ref(lap), grid_size)?;
    let samples = aligned.first().map(|a| a.samples.as_slice()).unwrap_or_default();
    Ok(analyze_grip(lap.lap_number, samples, weather, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weather() {
        let factors = weather_grip(&WeatherConditions::default(), &GripConfig::default());
        assert_eq!(factors.track_temp, 35.0);
        assert_eq!(factors.temp_factor, 95.0);
        assert_eq!(factors.humidity_factor, 75.0);
    }

    #[test]
    fn test_cold_track_has_low_grip() {
        let weather = WeatherConditions {
            track_temp: Some(-20.0),
            ambient_temp: Some(2.0),
            humidity: Some(90.0),
        };
        let report = analyze_grip(1, &[], &weather, &GripConfig::default());
        assert_eq!(report.weather_factors.temp_factor, 0.0);
        assert!((report.overall_grip_index - 22.0).abs() < 1e-9);
        assert_eq!(report.recommendation, "Warning: Low grip conditions");
        assert!(report.points.is_empty());
    }

    #[test]
    fn test_grip_margin() {
        let samples = vec![
            TelemetrySample {
                distance: 0.0,
                speed: 100.0,
                ..Default::default()
            },
            TelemetrySample {
                distance: 99.0,
                speed: 200.0,
                steering_angle: -60.0,
                brake_pressure_front: 80.0,
                ..Default::default()
            },
        ];
        let weather = WeatherConditions {
            track_temp: Some(37.5),
            ambient_temp: None,
            humidity: Some(0.0),
        };
        let report = analyze_grip(1, &samples, &weather, &GripConfig::default());

        assert_eq!(report.overall_grip_index, 100.0);
        assert_eq!(report.recommendation, "Good grip conditions");
        assert_eq!(report.points[0].grip_demand, 0.0);
        assert_eq!(report.points[0].grip_available, 100.0);
        // hypot(60, 120) is capped at 100
        assert_eq!(report.points[1].grip_demand, 100.0);
        assert!((report.points[1].grip_available - 90.1).abs() < 1e-9);
        assert_eq!(report.critical_points, 1);
    }

    #[test]
    fn test_lap_grip_on_grid() {
        let lap_at = |step: usize| Lap {
            lap_number: 3,
            lap_time: 30.0,
            samples: (0..=1000)
                .step_by(step)
                .map(|d| TelemetrySample {
                    distance: d as f64,
                    speed: 150.0,
                    steering_angle: d as f64 / 20.0,
                    ..Default::default()
                })
                .collect(),
            absent_channels: Default::default(),
        };
        let config = GripConfig::default();
        let dense = analyze_lap_grip(&lap_at(1), &WeatherConditions::default(), &config, 101).unwrap();
        let sparse = analyze_lap_grip(&lap_at(20), &WeatherConditions::default(), &config, 101).unwrap();

        assert_eq!(dense.lap_number, 3);
        assert_eq!(dense.points.len(), 101);
        assert_eq!(sparse.points.len(), 101);
        // 0.75 * 25 degrees at 500 m
        assert!((dense.points[50].grip_demand - 18.75).abs() < 1e-9);
        assert!((sparse.points[50].grip_demand - 18.75).abs() < 1e-9);
    }
}
