// Library interface for lapsync
// This allows integration tests and benchmarks to access internal modules

pub mod analysis;
pub mod coaching;
pub mod config;
pub mod errors;
pub mod sync;
pub mod telemetry;
pub mod track_layout;
pub mod units;
pub mod writer;

// Re-export commonly used types
pub use config::AnalysisConfig;
pub use errors::LapsyncError;
pub use sync::{AlignedLap, SpatialGrid, resample};
pub use telemetry::{Lap, RawSample, Session, TelemetrySample};
pub use track_layout::TrackLayout;
