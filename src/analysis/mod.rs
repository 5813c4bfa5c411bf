// Derived metrics computed from aligned laps

pub mod anomaly_detector;
pub mod baseline;
pub mod cpi_scorer;
pub mod delta;
pub mod driver_dna;
pub mod grip_analyzer;
pub mod report;
pub mod risk_analyzer;
pub mod tire_stress;
pub mod zone_aggregator;

pub use anomaly_detector::{
    Anomaly, AnomalyConfig, AnomalyDetector, AnomalyKind, Baseline, Severity, detect_anomalies,
};
pub use baseline::{BaselineStats, ROLLING_WINDOW};
pub use cpi_scorer::{CompositeScore, CpiConfig, CpiScorer, CpiWeights, ScoreComponent, compute_cpi};
pub use delta::{LapDelta, compute_delta};
pub use driver_dna::{DriverDna, DriverType, profile};
pub use report::{LapReport, analyze_lap};
pub use tire_stress::{TireStressReport, analyze_tires};
pub use zone_aggregator::{Zone, ZoneSpec, aggregate_lap_zones, aggregate_zones, compare_sectors};
