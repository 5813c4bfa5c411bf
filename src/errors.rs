// Error types for lapsync

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum LapsyncError {
    // Data errors, surfaced to the caller and never retried
    #[snafu(display(
        "Lap {lap_number} has {valid_samples} usable samples, at least 2 are required"
    ))]
    InsufficientData {
        lap_number: u32,
        valid_samples: usize,
    },
    #[snafu(display("Spatial grid mismatch: {reason}"))]
    GridMismatch { reason: String },
    #[snafu(display("Lap {lap_number} has no values for required channel {channel}"))]
    MissingChannel { lap_number: u32, channel: String },
    #[snafu(display("Lap {lap_number} not found in session"))]
    LapNotFound { lap_number: u32 },
    #[snafu(display("No {role} lap available: {reason}"))]
    NoBaselineLap { role: String, reason: String },

    // Configuration errors, raised when a component is constructed
    #[snafu(display("CPI weights must sum to 1.0, got {sum}"))]
    InvalidWeights { sum: f64 },
    #[snafu(display("Invalid configuration: {field} - {reason}"))]
    InvalidConfig { field: String, reason: String },
    #[snafu(display("Invalid zone boundaries: {reason}"))]
    InvalidZoneBoundaries { reason: String },
    #[snafu(display("Track layout validation failed: {reason}"))]
    TrackLayoutValidationError { reason: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Ingestion errors
    #[snafu(display("Invalid telemetry file: {path}"))]
    InvalidTelemetryFile { path: String },
    #[snafu(display("Error loading telemetry file"))]
    TelemetryLoaderError { source: io::Error },
    #[snafu(display("Error reading CSV telemetry"))]
    CsvError { source: csv::Error },
    #[snafu(display("Unparseable timestamp: {value}"))]
    InvalidTimestamp { value: String },

    #[snafu(display("Analysis worker for {stage} panicked"))]
    AnalysisWorkerPanic { stage: String },

    // Errors for the result writer
    #[snafu(display("Error writing output file"))]
    WriterError { source: io::Error },
    #[snafu(display("Error serializing output"))]
    OutputSerializeError { source: serde_json::Error },
}

impl From<csv::Error> for LapsyncError {
    fn from(value: csv::Error) -> Self {
        LapsyncError::CsvError { source: value }
    }
}

impl LapsyncError {
    /// Data errors describe the input itself; retrying with the same input
    /// produces the same failure.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            LapsyncError::InsufficientData { .. }
                | LapsyncError::GridMismatch { .. }
                | LapsyncError::MissingChannel { .. }
                | LapsyncError::LapNotFound { .. }
                | LapsyncError::NoBaselineLap { .. }
        )
    }
}
