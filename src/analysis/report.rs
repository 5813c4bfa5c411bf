use std::thread;

use log::{debug, info};
use serde::Serialize;

use super::anomaly_detector::{Anomaly, AnomalyDetector, Baseline};
use super::cpi_scorer::{CompositeScore, CpiScorer};
use super::delta::{LapDelta, compute_delta};
use super::risk_analyzer::{self, RiskSummary};
use super::zone_aggregator::{Zone, ZoneSpec, aggregate_zones};
use crate::coaching::{self, Suggestion};
use crate::config::AnalysisConfig;
use crate::errors::LapsyncError;
use crate::sync;
use crate::telemetry::{Lap, LapSummary};
use crate::track_layout::TrackLayout;

/// Everything derived for one lap against a reference lap.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapReport {
    pub subject: LapSummary,
    pub reference: LapSummary,
    pub delta: LapDelta,
    pub anomalies: Vec<Anomaly>,
    pub cpi: CompositeScore,
    pub zones: Vec<Zone>,
    pub risk: RiskSummary,
    pub suggestions: Vec<Suggestion>,
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>, stage: &str) -> Result<T, LapsyncError> {
    handle.join().map_err(|_| LapsyncError::AnalysisWorkerPanic {
        stage: stage.to_string(),
    })
}

/// Resamples both laps onto one grid, then computes delta, anomalies, CPI,
/// zones and risk on separate threads.
///
/// Sector markers and corners from `layout` replace the configured zone count
/// and steering-based corner detection when present.
pub fn analyze_lap(
    subject: &Lap,
    reference: &Lap,
    config: &AnalysisConfig,
    layout: Option<&TrackLayout>,
) -> Result<LapReport, LapsyncError> {
    let detector = AnomalyDetector::new(config.anomaly.clone())?;
    let mut scorer = CpiScorer::new(config.cpi_weights.clone(), config.cpi.clone())?;
    if let Some(layout) = layout.filter(|l| !l.corners.is_empty()) {
        scorer = scorer.with_corners(layout.corner_ranges());
    }
    let zone_spec = layout
        .and_then(TrackLayout::zone_spec)
        .unwrap_or(ZoneSpec::Count(config.zones.zone_count));

    let laps = [subject.clone(), reference.clone()];
    let (grid, aligned) = sync::resample(&laps, config.resampler.grid_size)?;
    let (aligned_subject, aligned_reference) = (&aligned[0], &aligned[1]);
    debug!(
        "Analyzing lap {} against lap {} on {} points",
        subject.lap_number,
        reference.lap_number,
        grid.len()
    );

    let (delta, anomalies, cpi, zones, risks) = thread::scope(|scope| {
        let delta = scope.spawn(|| {
            compute_delta(
                aligned_subject,
                aligned_reference,
                subject.lap_time,
                reference.lap_time,
            )
        });
        let anomalies =
            scope.spawn(|| detector.detect(aligned_subject, Baseline::Reference(aligned_reference)));
        let cpi = scope.spawn(|| scorer.score(aligned_subject));
        let zones = scope.spawn(|| aggregate_zones(aligned_subject, &zone_spec));
        let risks = scope.spawn(|| {
            risk_analyzer::point_risks(&aligned_subject.samples[..aligned_subject.defined_len()])
        });

        Ok::<_, LapsyncError>((
            join(delta, "delta")??,
            join(anomalies, "anomalies")??,
            join(cpi, "cpi")?,
            join(zones, "zones")??,
            join(risks, "risk")?,
        ))
    })?;

    let summary = LapSummary::from_lap(subject);
    let suggestions = coaching::suggestions(&anomalies, &summary, &config.coaching);
    info!(
        "Lap {}: {:+.3}s against lap {}, {} anomalies, CPI {}",
        subject.lap_number,
        delta.time_difference,
        reference.lap_number,
        anomalies.len(),
        cpi.total
    );

    Ok(LapReport {
        subject: summary,
        reference: LapSummary::from_lap(reference),
        delta,
        anomalies,
        cpi,
        zones,
        risk: risk_analyzer::summarize(&risks),
        suggestions,
    })
}
