// Track layouts: sector markers and corner ranges for a circuit, read from
// JSON files next to the telemetry or from the application data directory

pub mod types;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::errors::LapsyncError;

pub use types::{CornerAnnotation, CornerType, TrackLayout};

/// Read and validate a layout file.
pub fn load_layout(path: &Path) -> Result<TrackLayout, LapsyncError> {
    let content =
        fs::read_to_string(path).map_err(|e| LapsyncError::ConfigIOError { source: e })?;
    let layout: TrackLayout = serde_json::from_str(&content)
        .map_err(|e| LapsyncError::ConfigSerializeError { source: e })?;
    layout.validate()?;
    info!(
        "Loaded layout for {} with {} sectors and {} corners",
        layout.track_name,
        layout.sector_boundaries.len() + 1,
        layout.corners.len()
    );
    Ok(layout)
}

/// Directory that layouts are looked up in by track name
pub fn default_layout_dir() -> Result<PathBuf, LapsyncError> {
    let app_data_dir = dirs::data_dir().ok_or(LapsyncError::NoConfigDir)?;
    Ok(app_data_dir.join("lapsync").join("tracks"))
}

/// Normalize track name for consistent file naming
pub fn normalize_track_name(track_name: &str) -> String {
    track_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Looks up `<dir>/<normalized name>.json`. A missing file is `Ok(None)`.
pub fn find_layout(dir: &Path, track_name: &str) -> Result<Option<TrackLayout>, LapsyncError> {
    let file_path = dir.join(format!("{}.json", normalize_track_name(track_name)));
    if !file_path.exists() {
        debug!("No layout file at {}", file_path.display());
        return Ok(None);
    }
    load_layout(&file_path).map(Some)
}
