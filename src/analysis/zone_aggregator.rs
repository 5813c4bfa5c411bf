use log::debug;
use serde::{Deserialize, Serialize};

use super::risk_analyzer::{self, PointRisk, RiskKind};
use crate::errors::LapsyncError;
use crate::sync::AlignedLap;
use crate::telemetry::{Lap, TelemetrySample};
use crate::units;

/// Slack when checking that samples reach a zone edge
const COVERAGE_TOLERANCE_M: f64 = 1e-6;

/// How the distance axis is cut into zones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoneSpec {
    /// Equal-width zones
    Count(usize),
    /// Interior cut points in meters, e.g. official sector markers
    Boundaries(Vec<f64>),
}

/// Mean incident risk of the samples inside a zone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRisk {
    pub score: f64,
    pub dominant: RiskKind,
}

/// A span of the distance axis with its aggregates. Every aggregate is `None`
/// when no sample falls inside the span. `elapsed_time` is also `None` when
/// the recorded samples only cover part of the span.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub zone_id: usize,
    pub distance_start: f64,
    /// Exclusive, except for the last zone
    pub distance_end: f64,
    pub sample_count: usize,
    pub mean_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub min_speed: Option<f64>,
    /// Seconds spent inside the zone
    pub elapsed_time: Option<f64>,
    pub risk: Option<ZoneRisk>,
}

impl Zone {
    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }

    fn contains(&self, distance: f64, is_last: bool) -> bool {
        distance >= self.distance_start
            && (distance < self.distance_end || (is_last && distance <= self.distance_end))
    }
}

/// Cuts `[0, total]` into consecutive spans with no gaps or overlaps.
///
/// Explicit boundaries must be finite and strictly increasing; those outside
/// `(0, total)` are ignored.
pub fn zone_spans(spec: &ZoneSpec, total: f64) -> Result<Vec<(f64, f64)>, LapsyncError> {
    if !(total.is_finite() && total > 0.0) {
        return Err(LapsyncError::InvalidZoneBoundaries {
            reason: format!("total distance must be positive, got {}", total),
        });
    }
    let cuts: Vec<f64> = match spec {
        ZoneSpec::Count(0) => {
            return Err(LapsyncError::InvalidZoneBoundaries {
                reason: "zone count must be at least 1".to_string(),
            });
        }
        ZoneSpec::Count(count) => (1..*count)
            .map(|k| total * k as f64 / *count as f64)
            .collect(),
        ZoneSpec::Boundaries(boundaries) => {
            if boundaries.iter().any(|b| !b.is_finite()) {
                return Err(LapsyncError::InvalidZoneBoundaries {
                    reason: "boundaries must be finite".to_string(),
                });
            }
            if boundaries.windows(2).any(|w| w[1] <= w[0]) {
                return Err(LapsyncError::InvalidZoneBoundaries {
                    reason: format!("boundaries must be strictly increasing: {:?}", boundaries),
                });
            }
            boundaries
                .iter()
                .copied()
                .filter(|&b| {
                    let inside = b > 0.0 && b < total;
                    if !inside {
                        debug!("Ignoring zone boundary {} outside (0, {})", b, total);
                    }
                    inside
                })
                .collect()
        }
    };

    let mut edges = Vec::with_capacity(cuts.len() + 2);
    edges.push(0.0);
    edges.extend(cuts);
    edges.push(total);
    Ok(edges.windows(2).map(|w| (w[0], w[1])).collect())
}

/// Aggregates distance-ordered samples over zones of `[0, total]`.
///
/// Elapsed time integrates segment times like the delta engine. A segment
/// crossing a zone edge is split in proportion to the distance on each side.
pub fn aggregate_samples(
    samples: &[TelemetrySample],
    total: f64,
    spec: &ZoneSpec,
) -> Result<Vec<Zone>, LapsyncError> {
    let spans = zone_spans(spec, total)?;
    let last = spans.len() - 1;
    let mut zones: Vec<Zone> = spans
        .iter()
        .enumerate()
        .map(|(zone_id, &(start, end))| Zone {
            zone_id,
            distance_start: start,
            distance_end: end,
            sample_count: 0,
            mean_speed: None,
            max_speed: None,
            min_speed: None,
            elapsed_time: None,
            risk: None,
        })
        .collect();

    let risks = risk_analyzer::point_risks(samples);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); zones.len()];
    for (i, sample) in samples.iter().enumerate() {
        if let Some(k) = zones
            .iter()
            .enumerate()
            .position(|(k, zone)| zone.contains(sample.distance, k == last))
        {
            members[k].push(i);
        }
    }

    let covered = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first.distance, last.distance),
        _ => (f64::INFINITY, f64::NEG_INFINITY),
    };
    let mut times = vec![0.0; zones.len()];
    for pair in samples.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let length = b.distance - a.distance;
        if length <= 0.0 {
            continue;
        }
        let time = units::segment_time(length, a.speed, b.speed);
        for (k, zone) in zones.iter().enumerate() {
            let overlap = b.distance.min(zone.distance_end) - a.distance.max(zone.distance_start);
            if overlap > 0.0 {
                times[k] += time * overlap / length;
            }
        }
    }

    for (k, zone) in zones.iter_mut().enumerate() {
        let indices = &members[k];
        if indices.is_empty() {
            debug!(
                "Zone {} ({:.1}-{:.1} m) has no samples",
                zone.zone_id, zone.distance_start, zone.distance_end
            );
            continue;
        }
        let speeds = || indices.iter().map(|&i| samples[i].speed);
        let zone_risks: Vec<&PointRisk> = indices.iter().map(|&i| &risks[i]).collect();

        zone.sample_count = indices.len();
        zone.mean_speed = Some(speeds().sum::<f64>() / indices.len() as f64);
        zone.max_speed = speeds().reduce(f64::max);
        zone.min_speed = speeds().reduce(f64::min);
        zone.elapsed_time = (covered.0 <= zone.distance_start + COVERAGE_TOLERANCE_M
            && covered.1 >= zone.distance_end - COVERAGE_TOLERANCE_M)
            .then_some(times[k]);
        zone.risk = Some(ZoneRisk {
            score: zone_risks.iter().map(|r| r.total).sum::<f64>() / indices.len() as f64,
            dominant: risk_analyzer::dominant_kind(zone_risks.iter().copied()),
        });
    }

    Ok(zones)
}

/// Zones over the full grid. Zones past the end of a truncated lap have no data.
pub fn aggregate_zones(lap: &AlignedLap, spec: &ZoneSpec) -> Result<Vec<Zone>, LapsyncError> {
    aggregate_samples(&lap.samples, lap.track_length, spec)
}

/// Zones over a normalized lap's own recorded distance.
pub fn aggregate_lap_zones(lap: &Lap, spec: &ZoneSpec) -> Result<Vec<Zone>, LapsyncError> {
    aggregate_samples(&lap.samples, lap.distance(), spec)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorBest {
    pub sector_id: usize,
    pub lap_number: u32,
    pub time: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapSectors {
    pub lap_number: u32,
    pub sector_times: Vec<Option<f64>>,
    /// Sum of sector times, `None` when any sector has no data
    pub total: Option<f64>,
    /// Time lost against the theoretical best lap
    pub potential_gain: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorReport {
    pub sectors: Vec<(f64, f64)>,
    pub laps: Vec<LapSectors>,
    pub best: Vec<Option<SectorBest>>,
    /// Sum of the best time in every sector
    pub theoretical_best: Option<f64>,
}

/// Sector times of several laps on the same grid, with the best time per
/// sector and the theoretical best lap built from them.
pub fn compare_sectors(laps: &[AlignedLap], spec: &ZoneSpec) -> Result<SectorReport, LapsyncError> {
    let Some(first) = laps.first() else {
        return Err(LapsyncError::GridMismatch {
            reason: "no laps to compare".to_string(),
        });
    };
    for lap in &laps[1..] {
        first.ensure_same_grid(lap)?;
    }

    let sectors = zone_spans(spec, first.track_length)?;
    let mut per_lap = Vec::with_capacity(laps.len());
    for lap in laps {
        let zones = aggregate_zones(lap, spec)?;
        let sector_times: Vec<Option<f64>> = zones.iter().map(|z| z.elapsed_time).collect();
        let total = sector_times.iter().copied().sum::<Option<f64>>();
        per_lap.push(LapSectors {
            lap_number: lap.lap_number,
            sector_times,
            total,
            potential_gain: None,
        });
    }

    let best: Vec<Option<SectorBest>> = (0..sectors.len())
        .map(|k| {
            per_lap
                .iter()
                .filter_map(|lap| {
                    lap.sector_times[k].map(|time| SectorBest {
                        sector_id: k,
                        lap_number: lap.lap_number,
                        time,
                    })
                })
                .min_by(|a, b| a.time.total_cmp(&b.time))
        })
        .collect();
    let theoretical_best = best
        .iter()
        .map(|b| b.as_ref().map(|b| b.time))
        .sum::<Option<f64>>();

    for lap in &mut per_lap {
        lap.potential_gain = lap.total.zip(theoretical_best).map(|(t, best)| t - best);
    }

    Ok(SectorReport {
        sectors,
        laps: per_lap,
        best,
        theoretical_best,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{AlignedSample, SpatialGrid};

    fn lap(points: &[(f64, f64)]) -> Lap {
        Lap {
            lap_number: 1,
            lap_time: 60.0,
            samples: points
                .iter()
                .map(|&(distance, speed)| TelemetrySample {
                    distance,
                    speed,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

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

    #[test]
    fn test_equal_zones_cover_lap() {
        let lap = lap(&[(0.0, 100.0), (700.0, 120.0), (1500.0, 140.0)]);
        let zones = aggregate_lap_zones(&lap, &ZoneSpec::Count(3)).unwrap();

        let spans: Vec<(f64, f64)> = zones
            .iter()
            .map(|z| (z.distance_start, z.distance_end))
            .collect();
        assert_eq!(spans, vec![(0.0, 500.0), (500.0, 1000.0), (1000.0, 1500.0)]);
        for pair in zones.windows(2) {
            assert_eq!(pair[0].distance_end, pair[1].distance_start);
        }
    }

    #[test]
    fn test_last_zone_includes_end() {
        let lap = lap(&[(0.0, 100.0), (1000.0, 150.0)]);
        let zones = aggregate_lap_zones(&lap, &ZoneSpec::Count(2)).unwrap();
        assert_eq!(zones[0].sample_count, 1);
        assert_eq!(zones[1].sample_count, 1);
        assert_eq!(zones[1].max_speed, Some(150.0));
    }

    #[test]
    fn test_empty_zone_has_no_aggregates() {
        let lap = lap(&[(0.0, 100.0), (100.0, 120.0), (1000.0, 150.0)]);
        let zones = aggregate_lap_zones(&lap, &ZoneSpec::Count(10)).unwrap();

        let empty = &zones[5];
        assert_eq!(empty.sample_count, 0);
        assert_eq!(empty.mean_speed, None);
        assert_eq!(empty.elapsed_time, None);
        assert_eq!(empty.risk, None);
        assert!(zones[0].has_data());
    }

    #[test]
    fn test_zone_times_sum_to_lap_time() {
        let grid = SpatialGrid::new(21, 2000.0).unwrap();
        let speeds: Vec<f64> = (0..21).map(|i| 100.0 + 5.0 * i as f64).collect();
        let lap = aligned(1, &grid, &speeds);
        let zones = aggregate_zones(&lap, &ZoneSpec::Count(7)).unwrap();

        let zone_total: f64 = zones.iter().filter_map(|z| z.elapsed_time).sum();
        let lap_total: f64 = lap
            .samples
            .windows(2)
            .map(|w| units::segment_time(w[1].distance - w[0].distance, w[0].speed, w[1].speed))
            .sum();
        assert!((zone_total - lap_total).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_boundaries_take_precedence() {
        let lap = lap(&[(0.0, 100.0), (500.0, 100.0), (1200.0, 100.0)]);
        let spec = ZoneSpec::Boundaries(vec![-10.0, 300.0, 900.0, 1200.0, 5000.0]);
        let zones = aggregate_lap_zones(&lap, &spec).unwrap();

        let spans: Vec<(f64, f64)> = zones
            .iter()
            .map(|z| (z.distance_start, z.distance_end))
            .collect();
        assert_eq!(spans, vec![(0.0, 300.0), (300.0, 900.0), (900.0, 1200.0)]);
    }

    #[test]
    fn test_invalid_boundaries() {
        assert!(matches!(
            zone_spans(&ZoneSpec::Boundaries(vec![500.0, 200.0]), 1000.0),
            Err(LapsyncError::InvalidZoneBoundaries { .. })
        ));
        assert!(matches!(
            zone_spans(&ZoneSpec::Boundaries(vec![f64::NAN]), 1000.0),
            Err(LapsyncError::InvalidZoneBoundaries { .. })
        ));
        assert!(matches!(
            zone_spans(&ZoneSpec::Count(0), 1000.0),
            Err(LapsyncError::InvalidZoneBoundaries { .. })
        ));
    }

    #[test]
    fn test_zone_risk() {
        let mut lap = lap(&[(0.0, 200.0), (100.0, 200.0), (600.0, 100.0), (900.0, 100.0)]);
        lap.samples[0].brake_pressure_front = 100.0;
        lap.samples[1].brake_pressure_front = 100.0;
        let zones = aggregate_lap_zones(&lap, &ZoneSpec::Count(2)).unwrap();

        let braking = zones[0].risk.unwrap();
        assert_eq!(braking.score, 100.0);
        assert_eq!(braking.dominant, RiskKind::Lockup);
        assert_eq!(zones[1].risk.unwrap().dominant, RiskKind::Low);
    }

    #[test]
    fn test_compare_sectors() {
        let grid = SpatialGrid::new(7, 1800.0).unwrap();
        // Lap 1 is faster in the first sector, lap 2 in the other two
        let lap1 = aligned(1, &grid, &[200.0, 200.0, 200.0, 100.0, 100.0, 100.0, 100.0]);
        let lap2 = aligned(2, &grid, &[150.0, 150.0, 150.0, 150.0, 150.0, 150.0, 150.0]);
        let report = compare_sectors(&[lap1, lap2], &ZoneSpec::Count(3)).unwrap();

        assert_eq!(report.sectors.len(), 3);
        assert_eq!(report.best[0].as_ref().map(|b| b.lap_number), Some(1));
        assert_eq!(report.best[2].as_ref().map(|b| b.lap_number), Some(2));

        let best = report.theoretical_best.unwrap();
        for lap in &report.laps {
            assert!(lap.total.unwrap() >= best);
            assert!(lap.potential_gain.unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_compare_sectors_truncated_lap() {
        let grid = SpatialGrid::new(7, 1800.0).unwrap();
        let full = aligned(1, &grid, &[150.0; 7]);
        let short = aligned(2, &grid, &[150.0; 3]);
        let report = compare_sectors(&[full, short], &ZoneSpec::Count(3)).unwrap();

        assert!(report.laps[1].sector_times[0].is_some());
        // Samples stop at the start of the second sector
        assert_eq!(report.laps[1].sector_times[1], None);
        assert_eq!(report.laps[1].sector_times[2], None);
        assert_eq!(report.best[1].as_ref().map(|b| b.lap_number), Some(1));
        assert_eq!(report.laps[1].total, None);
        assert_eq!(report.laps[1].potential_gain, None);
        assert!(report.theoretical_best.is_some());
    }
}
