// Integration tests for the full ingestion and analysis pipeline
//
// Recordings are written to temporary files in the formats the loader
// accepts, then pushed through session building, resampling and analysis.

use std::io::Write;

use lapsync::analysis::anomaly_detector::{AnomalyKind, Baseline, detect_anomalies};
use lapsync::analysis::cpi_scorer::{ScoreComponent, compute_cpi};
use lapsync::analysis::tire_stress::{Tire, TireConfig};
use lapsync::analysis::{
    CpiWeights, ZoneSpec, aggregate_zones, analyze_lap, analyze_tires, compute_delta, profile,
};
use lapsync::telemetry::{Channel, NormalizerConfig, WeatherConditions, loader};
use lapsync::{AnalysisConfig, Lap, Session, TelemetrySample, resample};
use serde_json::json;
use tempfile::TempDir;

/// Writes one lap of JSON lines using the channel names of the data logger
fn write_lap(out: &mut impl Write, lap: u32, speed_at: impl Fn(f64) -> f64) {
    let mut time = 0.0;
    for i in 0..=400 {
        let distance = i as f64 * 5.0;
        let speed = speed_at(distance);
        if i > 0 {
            time += 5.0 / (speed / 3.6);
        }
        let line = json!({
            "lap": lap,
            "Laptrigger_lapdist_dls": distance,
            "time": time,
            "Speed": speed,
            "ath": 90.0,
            "pbrake_f": 0.0,
            "Steering_Angle": 0.0,
            "nmot": 7000.0,
            "Gear": 4,
        });
        writeln!(out, "{}", line).unwrap();
    }
}

fn uniform_lap(lap_number: u32, distances: &[f64], speeds: &[f64]) -> Lap {
    Lap {
        lap_number,
        lap_time: 0.0,
        samples: distances
            .iter()
            .zip(speeds)
            .map(|(&distance, &speed)| TelemetrySample {
                distance,
                speed,
                ..Default::default()
            })
            .collect(),
        absent_channels: [Channel::LongitudinalAccel, Channel::LateralAccel].into(),
    }
}

#[test]
fn test_jsonl_session_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("session.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    write_lap(&mut file, 1, |d| {
        if (800.0..1000.0).contains(&d) { 120.0 } else { 165.0 }
    });
    write_lap(&mut file, 2, |_| 170.0);
    write_lap(&mut file, 3, |_| 165.0);
    drop(file);

    let samples = loader::load_telemetry(&path, None).unwrap();
    assert_eq!(samples.len(), 3 * 401);
    let session = Session::from_samples(samples, &NormalizerConfig::default());
    assert_eq!(session.lap_numbers(), vec![1, 2, 3]);
    assert!(session.rejected().is_empty());

    let best = session.best_lap().unwrap();
    assert_eq!(best.lap_number, 2);

    let subject = session.lap(1).unwrap();
    assert_eq!(subject.samples.len(), 401);
    assert_eq!(subject.distance(), 2000.0);
    assert_eq!(subject.samples[10].throttle, 90.0);
    assert_eq!(subject.samples[10].gear, 4);

    let report = analyze_lap(subject, best, &AnalysisConfig::default(), None).unwrap();
    assert!(report.delta.time_difference > 0.0);
    assert!(report.delta.integrated_time_delta() > 0.0);
    assert!(!report.anomalies.is_empty());
    assert!(
        report
            .anomalies
            .iter()
            .all(|a| a.kind == AnomalyKind::SpeedAnomaly && (780.0..=1010.0).contains(&a.distance))
    );
    assert_eq!(report.zones.len(), 10);
    assert!((0.0..=100.0).contains(&report.cpi.total));

    let encoded = serde_json::to_value(&report).unwrap();
    assert!(encoded["delta"]["cumulativeTimeDelta"].is_array());
    assert!(encoded["cpi"]["components"]["tireStress"].is_object());
}

#[test]
fn test_session_profile_and_tire_wear() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("session.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for (speed, lap) in [150.0, 152.0, 155.0, 160.0, 163.0, 165.0].into_iter().zip(1..) {
        write_lap(&mut file, lap, move |_| speed);
    }
    drop(file);

    let samples = loader::load_telemetry(&path, None).unwrap();
    let session = Session::from_samples(samples, &NormalizerConfig::default());
    let laps: Vec<Lap> = session.laps().cloned().collect();
    let (_, aligned) = resample(&laps, 200).unwrap();

    let dna = profile(&aligned).unwrap();
    assert_eq!(dna.lap_count, 6);
    assert_eq!(dna.scores.throttle_smoothness, 100.0);
    assert_eq!(dna.scores.steering_precision, 100.0);
    // The last three laps are faster than the first three
    assert!(dna.scores.adaptability > 50.0);
    assert!(dna.scores.consistency < 100.0);
    assert!((0.0..=100.0).contains(&dna.overall));

    let tires = analyze_tires(&aligned[0], &WeatherConditions::default(), &TireConfig::default());
    assert_eq!(tires.track_temp, 35.0);
    assert_eq!(tires.points.len(), 200);
    // Straight-line throttle only loads the rears
    assert_eq!(tires.wear.front_left, 0.0);
    assert!(tires.wear.rear_left > 0.0);
    assert_eq!(tires.most_stressed, Tire::RearLeft);
}

#[test]
fn test_long_csv_selects_vehicle() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("telemetry.csv");
    let mut csv = String::from("timestamp,lap,telemetry_name,telemetry_value,vehicle_id\n");
    for (i, ts) in ["23.000", "23.500", "24.000"].iter().enumerate() {
        let timestamp = format!("2025-04-04T18:10:{}Z", ts);
        let distance = i as f64 * 10.0;
        for (vehicle, speed) in [("GR86-002", 100.0), ("GR86-010", 150.0)] {
            csv.push_str(&format!(
                "{t},1,Laptrigger_lapdist_dls,{d},{v}\n{t},1,speed,{s},{v}\n{t},1,ath,55,{v}\n",
                t = timestamp,
                d = distance,
                s = speed + i as f64,
                v = vehicle
            ));
        }
    }
    std::fs::write(&path, csv).unwrap();

    let samples = loader::load_telemetry(&path, Some("GR86-010")).unwrap();
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[2].speed, Some(152.0));

    let session = Session::from_samples(samples, &NormalizerConfig::default());
    let lap = session.lap(1).unwrap();
    assert_eq!(lap.lap_time, 1.0);
    assert_eq!(lap.distance(), 20.0);
    assert!(lap.absent_channels.contains(&Channel::BrakePressureFront));
    assert_eq!(lap.samples[1].throttle, 55.0);

    // Without a vehicle the first one in the file is used
    let first = loader::load_telemetry(&path, None).unwrap();
    assert_eq!(first[0].speed, Some(100.0));
}

#[test]
fn test_wide_csv_fills_gaps() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("wide.csv");
    std::fs::write(
        &path,
        "lap,distance,speed,throttle,brake\n2,0,100,50,0\n2,10,,50,0\n2,20,140,50,0\n",
    )
    .unwrap();

    let samples = loader::load_telemetry(&path, None).unwrap();
    let session = Session::from_samples(samples, &NormalizerConfig::default());
    let lap = session.lap(2).unwrap();
    assert_eq!(lap.samples.len(), 3);
    assert!((lap.samples[1].speed - 120.0).abs() < 1e-9);
    assert!(lap.lap_time > 0.0);
}

#[test]
fn test_unsupported_extension() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("telemetry.parquet");
    std::fs::write(&path, "").unwrap();
    assert!(loader::load_telemetry(&path, None).is_err());
}

#[test]
fn test_reference_anomaly_scenario() {
    let distances = [0.0, 10.0, 20.0, 30.0];
    let subject = uniform_lap(1, &distances, &[100.0, 100.0, 80.0, 100.0]);
    let reference = uniform_lap(2, &distances, &[100.0; 4]);
    let (_, aligned) = resample(&[subject, reference], 4).unwrap();

    let anomalies = detect_anomalies(&aligned[0], Baseline::Reference(&aligned[1]), 15.0).unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].grid_index, 2);
    assert_eq!(anomalies[0].distance, 20.0);
    assert_eq!(anomalies[0].kind, AnomalyKind::SpeedAnomaly);
    assert_eq!(anomalies[0].magnitude, 20.0);
}

#[test]
fn test_cumulative_delta_scenario() {
    let distances: Vec<f64> = (0..=10).map(|i| i as f64 * 250.0).collect();
    // 2500 m at 100 km/h takes 90 s; the subject is slower by the 90/90.5 ratio
    let reference = uniform_lap(1, &distances, &[100.0; 11]).with_lap_time(90.0);
    let subject =
        uniform_lap(2, &distances, &[100.0 * 90.0 / 90.5; 11]).with_lap_time(90.5);
    let (_, aligned) = resample(&[subject, reference], 11).unwrap();

    let delta = compute_delta(&aligned[0], &aligned[1], 90.5, 90.0).unwrap();
    assert_eq!(delta.time_difference, 0.5);
    assert!((delta.integrated_time_delta() - 0.5).abs() < 1e-6);
    assert_eq!(delta.cumulative_time_delta.len(), 11);
}

#[test]
fn test_zone_coverage_scenario() {
    let distances: Vec<f64> = (0..=150).map(|i| i as f64 * 10.0).collect();
    let lap = uniform_lap(1, &distances, &[150.0; 151]);
    let (_, aligned) = resample(&[lap], 151).unwrap();

    let zones = aggregate_zones(&aligned[0], &ZoneSpec::Count(3)).unwrap();
    let spans: Vec<(f64, f64)> = zones
        .iter()
        .map(|z| (z.distance_start, z.distance_end))
        .collect();
    assert_eq!(spans, vec![(0.0, 500.0), (500.0, 1000.0), (1000.0, 1500.0)]);
    assert_eq!(zones.iter().map(|z| z.sample_count).sum::<usize>(), 151);
}

#[test]
fn test_missing_lateral_accel_scenario() {
    let distances: Vec<f64> = (0..=100).map(|i| i as f64 * 10.0).collect();
    let lap = uniform_lap(1, &distances, &[150.0; 101]);
    let (_, aligned) = resample(&[lap], 101).unwrap();

    let score = compute_cpi(&aligned[0], CpiWeights::default()).unwrap();
    assert_eq!(score.component(ScoreComponent::TireStress), Some(50.0));
    assert!(score.substituted.contains(&ScoreComponent::TireStress));
    assert!((0.0..=100.0).contains(&score.total));
}
