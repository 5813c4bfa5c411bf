use std::collections::BTreeMap;

use log::debug;

use crate::analysis::anomaly_detector::{Anomaly, AnomalyKind};
use crate::errors::LapsyncError;
use crate::telemetry::LapSummary;

/// What a suggestion is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionType {
    /// Overall assessment of the lap
    General,
    /// A stretch of track where speed was lost
    Zone,
    /// Throttle application over the lap
    Throttle,
    /// Brake usage over the lap
    Braking,
    /// Pedal or steering technique faults found by the anomaly detector
    Technique,
}

impl std::fmt::Display for SuggestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestionType::General => write!(f, "General"),
            SuggestionType::Zone => write!(f, "Zone"),
            SuggestionType::Throttle => write!(f, "Throttle"),
            SuggestionType::Braking => write!(f, "Braking"),
            SuggestionType::Technique => write!(f, "Technique"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A single improvement suggestion for the driver.
///
/// Zone suggestions carry the distance span they refer to and the average
/// speed lost inside it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub suggestion_type: SuggestionType,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_delta: Option<f64>,
}

impl Suggestion {
    fn general(
        suggestion_type: SuggestionType,
        title: &str,
        description: String,
        priority: Priority,
    ) -> Self {
        Self {
            suggestion_type,
            title: title.to_string(),
            description,
            priority,
            distance_start: None,
            distance_end: None,
            speed_delta: None,
        }
    }
}

/// Thresholds used to turn lap analysis into suggestions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CoachingConfig {
    /// Length of the track buckets speed anomalies are grouped into, meters
    pub bucket_length_m: f64,
    /// Average speed loss in a bucket that makes it high priority, km/h
    pub critical_deficit_kmh: f64,
    /// Average speed loss in a bucket that earns a suggestion at all, km/h
    pub improvement_deficit_kmh: f64,
    /// Average throttle below this suggests more aggressive acceleration, %
    pub low_average_throttle_pct: f64,
    /// Peak brake pressure above this suggests lighter braking
    pub heavy_brake_pressure: f64,
}

impl Default for CoachingConfig {
    fn default() -> Self {
        Self {
            bucket_length_m: 500.0,
            critical_deficit_kmh: 25.0,
            improvement_deficit_kmh: 15.0,
            low_average_throttle_pct: 60.0,
            heavy_brake_pressure: 80.0,
        }
    }
}

impl CoachingConfig {
    pub fn validate(&self) -> Result<(), LapsyncError> {
        if !(self.bucket_length_m.is_finite() && self.bucket_length_m > 0.0) {
            return Err(LapsyncError::InvalidConfig {
                field: "coaching.bucket_length_m".to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        if self.critical_deficit_kmh < self.improvement_deficit_kmh {
            return Err(LapsyncError::InvalidConfig {
                field: "coaching.critical_deficit_kmh".to_string(),
                reason: "must not be below improvement_deficit_kmh".to_string(),
            });
        }
        Ok(())
    }
}

/// Builds improvement suggestions from a lap's anomalies and statistics.
///
/// Speed anomalies are bucketed along the track; each bucket whose average
/// loss crosses a threshold becomes a zone suggestion. Technique faults and
/// lap-wide pedal statistics add general suggestions. The result is ordered
/// by priority, then by distance.
pub fn suggestions(
    anomalies: &[Anomaly],
    summary: &LapSummary,
    config: &CoachingConfig,
) -> Vec<Suggestion> {
    let mut output = Vec::new();

    if anomalies.is_empty() {
        output.push(Suggestion::general(
            SuggestionType::General,
            "Good Performance",
            "No significant anomalies detected. Focus on consistency.".to_string(),
            Priority::Low,
        ));
    }

    // Bucket index -> speed deficits inside it
    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for anomaly in anomalies.iter().filter(|a| a.kind == AnomalyKind::SpeedAnomaly) {
        let bucket = (anomaly.distance / config.bucket_length_m).floor() as i64;
        buckets.entry(bucket).or_default().push(anomaly.magnitude);
    }
    for (bucket, deficits) in buckets {
        let average = deficits.iter().sum::<f64>() / deficits.len() as f64;
        let start = bucket as f64 * config.bucket_length_m;
        let end = start + config.bucket_length_m;
        let (priority, title, description) = if average > config.critical_deficit_kmh {
            (
                Priority::High,
                format!("Critical Zone: {:.0}m - {:.0}m", start, end),
                format!(
                    "Average speed loss of {:.1} km/h. Check braking point and apex.",
                    average
                ),
            )
        } else if average > config.improvement_deficit_kmh {
            (
                Priority::Medium,
                format!("Improvement Zone: {:.0}m - {:.0}m", start, end),
                format!("Speed loss of {:.1} km/h. Optimize racing line.", average),
            )
        } else {
            debug!("Bucket {:.0}m skipped, average loss {:.1} km/h", start, average);
            continue;
        };
        output.push(Suggestion {
            suggestion_type: SuggestionType::Zone,
            title,
            description,
            priority,
            distance_start: Some(start),
            distance_end: Some(end),
            speed_delta: Some(average),
        });
    }

    let count = |kind: AnomalyKind| anomalies.iter().filter(|a| a.kind == kind).count();
    let overlaps = count(AnomalyKind::ThrottleBrakeOverlap);
    if overlaps > 0 {
        output.push(Suggestion::general(
            SuggestionType::Technique,
            "Pedal Overlap",
            format!(
                "Throttle and brake applied together in {} places. Release the throttle fully before braking.",
                overlaps
            ),
            Priority::Medium,
        ));
    }
    let corrections = count(AnomalyKind::SteeringCorrection);
    if corrections > 0 {
        output.push(Suggestion::general(
            SuggestionType::Technique,
            "Steering Corrections",
            format!(
                "{} steering corrections detected. Aim for a single, progressive turn-in.",
                corrections
            ),
            Priority::Low,
        ));
    }

    if summary.average_throttle < config.low_average_throttle_pct {
        output.push(Suggestion::general(
            SuggestionType::Throttle,
            "Throttle Application",
            format!(
                "Average throttle is {:.1}%. Consider more aggressive acceleration.",
                summary.average_throttle
            ),
            Priority::Medium,
        ));
    }
    if summary.max_brake > config.heavy_brake_pressure {
        output.push(Suggestion::general(
            SuggestionType::Braking,
            "Braking Intensity",
            format!(
                "Max brake pressure is {:.1}. Try earlier, lighter braking.",
                summary.max_brake
            ),
            Priority::Low,
        ));
    }

    // Stable, so zones stay in distance order within a priority
    output.sort_by_key(|s| s.priority);
    output
}
