// Track layout data: official sector markers and corner distance ranges

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::analysis::zone_aggregator::ZoneSpec;
use crate::errors::LapsyncError;

/// Static description of a circuit, loaded from a JSON file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackLayout {
    /// Human-readable track name (e.g., "Barber Motorsports Park")
    pub track_name: String,
    /// Official lap length in meters, if known
    #[serde(default)]
    pub track_length_m: Option<f64>,
    /// Distances in meters where each sector after the first begins
    #[serde(default)]
    pub sector_boundaries: Vec<f64>,
    /// Corner annotations with their distance ranges
    #[serde(default)]
    pub corners: Vec<CornerAnnotation>,
}

impl TrackLayout {
    pub fn new(track_name: String) -> Self {
        Self {
            track_name,
            track_length_m: None,
            sector_boundaries: Vec::new(),
            corners: Vec::new(),
        }
    }

    /// Get corner annotation by corner number
    pub fn get_corner(&self, corner_number: u32) -> Option<&CornerAnnotation> {
        self.corners
            .iter()
            .find(|c| c.corner_number == corner_number)
    }

    /// Validate sector markers and corners
    pub fn validate(&self) -> Result<(), LapsyncError> {
        if let Some(length) = self.track_length_m {
            if !(length.is_finite() && length > 0.0) {
                return Err(LapsyncError::TrackLayoutValidationError {
                    reason: format!("track length must be positive, got {}", length),
                });
            }
        }
        if self
            .sector_boundaries
            .windows(2)
            .any(|w| w[1] <= w[0])
            || self.sector_boundaries.iter().any(|b| !b.is_finite())
        {
            return Err(LapsyncError::TrackLayoutValidationError {
                reason: "sector boundaries must be finite and strictly increasing".to_string(),
            });
        }
        for corner in &self.corners {
            corner.validate()?;
        }
        self.validate_corners()
    }

    /// Validate that corner numbers are unique and ranges don't overlap
    pub fn validate_corners(&self) -> Result<(), LapsyncError> {
        let mut corner_numbers = HashSet::new();
        for corner in &self.corners {
            if !corner_numbers.insert(corner.corner_number) {
                return Err(LapsyncError::TrackLayoutValidationError {
                    reason: format!("Duplicate corner number: {}", corner.corner_number),
                });
            }
        }

        for (i, corner1) in self.corners.iter().enumerate() {
            for corner2 in self.corners.iter().skip(i + 1) {
                if corner1.overlaps_with(corner2) {
                    return Err(LapsyncError::TrackLayoutValidationError {
                        reason: format!(
                            "Corner {} overlaps with corner {}",
                            corner1.corner_number, corner2.corner_number
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Corner distance ranges sorted by where they start
    pub fn corner_ranges(&self) -> Vec<(f64, f64)> {
        let mut ranges: Vec<(f64, f64)> = self
            .corners
            .iter()
            .map(|c| (c.distance_start, c.distance_end))
            .collect();
        ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranges
    }

    /// Sector markers as zone boundaries, or `None` when the layout has none
    pub fn zone_spec(&self) -> Option<ZoneSpec> {
        (!self.sector_boundaries.is_empty())
            .then(|| ZoneSpec::Boundaries(self.sector_boundaries.clone()))
    }
}

/// Annotation for a specific corner on the track
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CornerAnnotation {
    /// Unique corner number within the track
    pub corner_number: u32,
    /// Distance in meters where the corner begins
    pub distance_start: f64,
    /// Distance in meters where the corner ends
    pub distance_end: f64,
    /// Type/classification of the corner
    pub corner_type: CornerType,
    /// Optional description or notes about the corner
    #[serde(default)]
    pub description: Option<String>,
}

impl CornerAnnotation {
    pub fn new(
        corner_number: u32,
        distance_start: f64,
        distance_end: f64,
        corner_type: CornerType,
    ) -> Result<Self, LapsyncError> {
        let corner = Self {
            corner_number,
            distance_start,
            distance_end,
            corner_type,
            description: None,
        };
        corner.validate()?;
        Ok(corner)
    }

    fn validate(&self) -> Result<(), LapsyncError> {
        if !(self.distance_start.is_finite() && self.distance_end.is_finite())
            || self.distance_start < 0.0
        {
            return Err(LapsyncError::TrackLayoutValidationError {
                reason: format!(
                    "corner {} must start at a non-negative distance",
                    self.corner_number
                ),
            });
        }
        if self.distance_start >= self.distance_end {
            return Err(LapsyncError::TrackLayoutValidationError {
                reason: format!(
                    "corner {} must start before it ends",
                    self.corner_number
                ),
            });
        }
        Ok(())
    }

    /// Set optional description for the corner
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    /// Check if this corner's range overlaps with another corner
    pub fn overlaps_with(&self, other: &CornerAnnotation) -> bool {
        self.distance_start < other.distance_end && other.distance_start < self.distance_end
    }

    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.distance_start && distance <= self.distance_end
    }

    /// Length of the corner in meters
    pub fn length(&self) -> f64 {
        self.distance_end - self.distance_start
    }
}

/// Classification of corner types
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum CornerType {
    /// Left-hand turn
    LeftHand,
    /// Right-hand turn
    RightHand,
    /// Series of alternating turns
    Chicane,
    /// Very tight turn (typically > 90 degrees)
    Hairpin,
}

impl CornerType {
    /// Get a human-readable description of the corner type
    pub fn description(&self) -> &'static str {
        match self {
            CornerType::LeftHand => "Left-hand turn",
            CornerType::RightHand => "Right-hand turn",
            CornerType::Chicane => "Chicane",
            CornerType::Hairpin => "Hairpin turn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner(number: u32, start: f64, end: f64) -> CornerAnnotation {
        CornerAnnotation::new(number, start, end, CornerType::LeftHand).unwrap()
    }

    #[test]
    fn test_corner_validation() {
        assert!(CornerAnnotation::new(1, 200.0, 100.0, CornerType::Hairpin).is_err());
        assert!(CornerAnnotation::new(1, -5.0, 100.0, CornerType::Hairpin).is_err());
        assert!(CornerAnnotation::new(1, 100.0, 100.0, CornerType::Hairpin).is_err());

        let c = corner(1, 100.0, 250.0);
        assert_eq!(c.length(), 150.0);
        assert!(c.contains(100.0));
        assert!(c.contains(250.0));
        assert!(!c.contains(251.0));
    }

    #[test]
    fn test_duplicate_and_overlapping_corners() {
        let mut layout = TrackLayout::new("Test Track".to_string());
        layout.corners = vec![corner(1, 100.0, 200.0), corner(1, 300.0, 400.0)];
        assert!(layout.validate_corners().is_err());

        layout.corners = vec![corner(1, 100.0, 200.0), corner(2, 150.0, 400.0)];
        assert!(layout.validate_corners().is_err());

        // Touching ranges do not overlap
        layout.corners = vec![corner(1, 100.0, 200.0), corner(2, 200.0, 400.0)];
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn test_sector_boundaries_must_increase() {
        let mut layout = TrackLayout::new("Test Track".to_string());
        layout.sector_boundaries = vec![1200.0, 800.0];
        assert!(matches!(
            layout.validate(),
            Err(LapsyncError::TrackLayoutValidationError { .. })
        ));
    }

    #[test]
    fn test_zone_spec_and_ranges() {
        let mut layout = TrackLayout::new("Test Track".to_string());
        assert_eq!(layout.zone_spec(), None);

        layout.sector_boundaries = vec![1300.0, 2600.0];
        layout.corners = vec![corner(2, 900.0, 1000.0), corner(1, 100.0, 200.0)];
        assert_eq!(
            layout.zone_spec(),
            Some(ZoneSpec::Boundaries(vec![1300.0, 2600.0]))
        );
        assert_eq!(layout.corner_ranges(), vec![(100.0, 200.0), (900.0, 1000.0)]);
        assert_eq!(layout.get_corner(2).map(|c| c.distance_start), Some(900.0));
    }
}
