use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use serde::Serialize;

use lapsync::{
    AnalysisConfig, LapsyncError, Session, TrackLayout,
    analysis::{
        BaselineStats, ROLLING_WINDOW, ZoneSpec,
        anomaly_detector::{AnomalyDetector, Baseline},
        analyze_lap, analyze_tires, compare_sectors, compute_delta,
        cpi_scorer::CpiScorer,
        driver_dna, grip_analyzer, risk_analyzer,
        zone_aggregator::aggregate_lap_zones,
    },
    sync,
    telemetry::{Lap, LapSummary, WeatherConditions, loader, session::RejectedLap},
    track_layout, writer,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Analysis configuration file, defaults to the user config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Telemetry file and the car to read from it
#[derive(clap::Args, Debug)]
struct Input {
    #[arg(short, long)]
    input: PathBuf,

    /// Vehicle to read from multi-car CSV recordings
    #[arg(long)]
    vehicle: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum BaselineMode {
    /// Compare against a single reference lap
    Reference,
    /// Compare against the statistics of every other lap in the session
    History,
    /// Compare against a moving window over the lap itself
    Rolling,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List laps with their summaries
    Laps {
        #[command(flatten)]
        input: Input,
    },
    /// Print one normalized lap
    Lap {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
    },
    /// Speed and time delta between two laps
    Compare {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
        /// Reference lap, defaults to the best lap
        #[arg(short, long)]
        reference: Option<u32>,
        /// Grid points per lap
        #[arg(short, long)]
        points: Option<usize>,
    },
    /// Locations where a lap deviates from its baseline
    Anomalies {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
        #[arg(short, long)]
        reference: Option<u32>,
        #[arg(short, long, value_enum, default_value_t = BaselineMode::Reference)]
        baseline: BaselineMode,
        /// Speed deficit in km/h, or z-score for statistical baselines
        #[arg(short, long)]
        threshold: Option<f64>,
        #[arg(short, long)]
        points: Option<usize>,
    },
    /// Composite performance index of a lap
    Cpi {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
        #[arg(long)]
        layout: Option<PathBuf>,
    },
    /// Per-zone speed, time and risk aggregates of a lap
    Zones {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
        /// Number of equal zones
        #[arg(long)]
        count: Option<usize>,
        /// Zone boundaries in meters, e.g. 1200,2450
        #[arg(long, value_delimiter = ',')]
        boundaries: Option<Vec<f64>>,
        #[arg(long)]
        layout: Option<PathBuf>,
    },
    /// Sector times of every lap with the theoretical best lap
    Sectors {
        #[command(flatten)]
        input: Input,
        #[arg(long)]
        count: Option<usize>,
        #[arg(long, value_delimiter = ',')]
        boundaries: Option<Vec<f64>>,
        #[arg(long)]
        layout: Option<PathBuf>,
    },
    /// Incident risk along a lap
    Risk {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
    },
    /// Grip demand against weather-limited grip
    Grip {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
        /// JSON file with trackTemp, ambientTemp and humidity
        #[arg(short, long)]
        weather: Option<PathBuf>,
    },
    /// Per-tire stress and wear estimate of a lap
    Tires {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
        /// JSON file with trackTemp, ambientTemp and humidity
        #[arg(short, long)]
        weather: Option<PathBuf>,
    },
    /// Driving style profile over the laps of a session
    Dna {
        #[command(flatten)]
        input: Input,
        /// Laps to profile, defaults to all
        #[arg(short, long, value_delimiter = ',')]
        laps: Option<Vec<u32>>,
    },
    /// Full analysis of a lap against a reference lap
    Report {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        lap: u32,
        #[arg(short, long)]
        reference: Option<u32>,
        #[arg(long)]
        layout: Option<PathBuf>,
    },
    /// Write normalized laps as JSON lines
    Export {
        #[command(flatten)]
        input: Input,
        #[arg(short, long)]
        output: PathBuf,
        /// Laps to export, defaults to all
        #[arg(short, long, value_delimiter = ',')]
        laps: Option<Vec<u32>>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the user config directory
        #[arg(long)]
        save: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LapList<'a> {
    laps: Vec<LapSummary>,
    best_lap: Option<u32>,
    consistency_score: Option<f64>,
    rejected: &'a [RejectedLap],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RiskOutput {
    summary: risk_analyzer::RiskSummary,
    zones: Vec<lapsync::analysis::Zone>,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), LapsyncError> {
    let output = serde_json::to_string_pretty(value)
        .map_err(|e| LapsyncError::OutputSerializeError { source: e })?;
    println!("{}", output);
    Ok(())
}

fn load_session(input: &Input, config: &AnalysisConfig) -> Result<Session, LapsyncError> {
    let samples = loader::load_telemetry(&input.input, input.vehicle.as_deref())?;
    Ok(Session::from_samples(samples, &config.normalizer))
}

fn load_weather(weather: Option<&Path>) -> Result<WeatherConditions, LapsyncError> {
    weather
        .map(loader::load_weather)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn selected_laps<'a>(
    session: &'a Session,
    laps: Option<&[u32]>,
) -> Result<Vec<&'a Lap>, LapsyncError> {
    match laps {
        Some(numbers) => numbers.iter().map(|n| session.lap(*n)).collect(),
        None => Ok(session.laps().collect()),
    }
}

fn load_layout(layout: Option<&Path>) -> Result<Option<TrackLayout>, LapsyncError> {
    layout.map(track_layout::load_layout).transpose()
}

fn zone_spec(
    count: Option<usize>,
    boundaries: Option<Vec<f64>>,
    layout: Option<&TrackLayout>,
    default_count: usize,
) -> ZoneSpec {
    boundaries
        .map(ZoneSpec::Boundaries)
        .or(count.map(ZoneSpec::Count))
        .or_else(|| layout.and_then(TrackLayout::zone_spec))
        .unwrap_or(ZoneSpec::Count(default_count))
}

fn anomalies(
    session: &Session,
    lap: u32,
    reference: Option<u32>,
    baseline: BaselineMode,
    threshold: Option<f64>,
    grid_size: usize,
    config: &AnalysisConfig,
) -> Result<(), LapsyncError> {
    let mut anomaly_config = config.anomaly.clone();
    if let Some(threshold) = threshold {
        match baseline {
            BaselineMode::Reference => anomaly_config.speed_threshold_kmh = threshold,
            BaselineMode::History | BaselineMode::Rolling => {
                anomaly_config.z_score_threshold = threshold
            }
        }
    }
    let detector = AnomalyDetector::new(anomaly_config)?;
    let subject = session.lap(lap)?;

    let found = match baseline {
        BaselineMode::Reference => {
            let reference = session.reference_lap(reference)?;
            let (_, aligned) = sync::resample(&[subject.clone(), reference.clone()], grid_size)?;
            detector.detect(&aligned[0], Baseline::Reference(&aligned[1]))?
        }
        BaselineMode::History => {
            let laps: Vec<Lap> = std::iter::once(subject)
                .chain(session.history_laps(lap)?)
                .cloned()
                .collect();
            let (_, aligned) = sync::resample(&laps, grid_size)?;
            let history = BaselineStats::from_history(&aligned[1..])?;
            detector.detect(&aligned[0], Baseline::Statistics(&history))?
        }
        BaselineMode::Rolling => {
            let (_, aligned) = sync::resample(std::slice::from_ref(subject), grid_size)?;
            let rolling = BaselineStats::rolling::<ROLLING_WINDOW>(&aligned[0]);
            detector.detect(&aligned[0], Baseline::Statistics(&rolling))?
        }
    };
    info!("Found {} anomalies on lap {}", found.len(), lap);
    print_json(&found)
}

fn run(args: &Args) -> Result<(), LapsyncError> {
    let config = AnalysisConfig::load(args.config.as_deref())?;
    let grid_size = |points: Option<usize>| points.unwrap_or(config.resampler.grid_size);

    match &args.command {
        Commands::Laps { input } => {
            let session = load_session(input, &config)?;
            print_json(&LapList {
                laps: session.summaries(),
                best_lap: session.best_lap().map(|l| l.lap_number),
                consistency_score: session.consistency_score(),
                rejected: session.rejected(),
            })
        }
        Commands::Lap { input, lap } => {
            let session = load_session(input, &config)?;
            print_json(session.lap(*lap)?)
        }
        Commands::Compare {
            input,
            lap,
            reference,
            points,
        } => {
            let session = load_session(input, &config)?;
            let subject = session.lap(*lap)?;
            let reference = session.reference_lap(*reference)?;
            let (_, aligned) =
                sync::resample(&[subject.clone(), reference.clone()], grid_size(*points))?;
            let delta = compute_delta(
                &aligned[0],
                &aligned[1],
                subject.lap_time,
                reference.lap_time,
            )?;
            print_json(&delta)
        }
        Commands::Anomalies {
            input,
            lap,
            reference,
            baseline,
            threshold,
            points,
        } => {
            let session = load_session(input, &config)?;
            anomalies(
                &session,
                *lap,
                *reference,
                *baseline,
                *threshold,
                grid_size(*points),
                &config,
            )
        }
        Commands::Cpi { input, lap, layout } => {
            let session = load_session(input, &config)?;
            let layout = load_layout(layout.as_deref())?;
            let mut scorer = CpiScorer::new(config.cpi_weights.clone(), config.cpi.clone())?;
            if let Some(layout) = layout.as_ref().filter(|l| !l.corners.is_empty()) {
                scorer = scorer.with_corners(layout.corner_ranges());
            }
            print_json(&scorer.score_lap(session.lap(*lap)?, config.resampler.grid_size)?)
        }
        Commands::Zones {
            input,
            lap,
            count,
            boundaries,
            layout,
        } => {
            let session = load_session(input, &config)?;
            let layout = load_layout(layout.as_deref())?;
            let spec = zone_spec(
                *count,
                boundaries.clone(),
                layout.as_ref(),
                config.zones.zone_count,
            );
            print_json(&aggregate_lap_zones(session.lap(*lap)?, &spec)?)
        }
        Commands::Sectors {
            input,
            count,
            boundaries,
            layout,
        } => {
            let session = load_session(input, &config)?;
            let layout = load_layout(layout.as_deref())?;
            let spec = zone_spec(
                *count,
                boundaries.clone(),
                layout.as_ref(),
                config.zones.zone_count,
            );
            let laps: Vec<Lap> = session.laps().cloned().collect();
            let (_, aligned) = sync::resample(&laps, config.resampler.grid_size)?;
            print_json(&compare_sectors(&aligned, &spec)?)
        }
        Commands::Risk { input, lap } => {
            let session = load_session(input, &config)?;
            let lap = session.lap(*lap)?;
            let risks = risk_analyzer::lap_risks(lap, config.resampler.grid_size)?;
            print_json(&RiskOutput {
                summary: risk_analyzer::summarize(&risks),
                zones: aggregate_lap_zones(lap, &ZoneSpec::Count(config.zones.risk_zone_count))?,
            })
        }
        Commands::Grip {
            input,
            lap,
            weather,
        } => {
            let session = load_session(input, &config)?;
            let weather = load_weather(weather.as_deref())?;
            print_json(&grip_analyzer::analyze_lap_grip(
                session.lap(*lap)?,
                &weather,
                &config.grip,
                config.resampler.grid_size,
            )?)
        }
        Commands::Tires {
            input,
            lap,
            weather,
        } => {
            let session = load_session(input, &config)?;
            let weather = load_weather(weather.as_deref())?;
            let (_, aligned) = sync::resample(
                std::slice::from_ref(session.lap(*lap)?),
                config.resampler.grid_size,
            )?;
            print_json(&analyze_tires(&aligned[0], &weather, &config.tires))
        }
        Commands::Dna { input, laps } => {
            let session = load_session(input, &config)?;
            let laps: Vec<Lap> = selected_laps(&session, laps.as_deref())?
                .into_iter()
                .cloned()
                .collect();
            let (_, aligned) = sync::resample(&laps, config.resampler.grid_size)?;
            print_json(&driver_dna::profile(&aligned)?)
        }
        Commands::Report {
            input,
            lap,
            reference,
            layout,
        } => {
            let session = load_session(input, &config)?;
            let layout = load_layout(layout.as_deref())?;
            let subject = session.lap(*lap)?;
            let reference = session.reference_lap(*reference)?;
            print_json(&analyze_lap(subject, reference, &config, layout.as_ref())?)
        }
        Commands::Export {
            input,
            output,
            laps,
        } => {
            let session = load_session(input, &config)?;
            let selected = selected_laps(&session, laps.as_deref())?;
            let written = writer::write_laps(output, selected)?;
            info!("Wrote {} samples to {:?}", written, output);
            Ok(())
        }
        Commands::Config { save } => {
            if *save {
                let path = config.save()?;
                info!("Saved configuration to {:?}", path);
            }
            print_json(&config)
        }
    }
}

fn main() {
    colog::init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
