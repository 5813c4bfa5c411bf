use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::analysis::anomaly_detector::AnomalyConfig;
use crate::analysis::cpi_scorer::{CpiConfig, CpiWeights};
use crate::analysis::grip_analyzer::GripConfig;
use crate::analysis::tire_stress::TireConfig;
use crate::coaching::CoachingConfig;
use crate::errors::LapsyncError;
use crate::sync::ResamplerConfig;
use crate::telemetry::NormalizerConfig;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_DIR_NAME: &str = "lapsync";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Equal-length zones per lap when no track layout gives sector markers
    pub zone_count: usize,
    /// Zones used for the per-zone risk breakdown
    pub risk_zone_count: usize,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            zone_count: 10,
            risk_zone_count: 20,
        }
    }
}

/// Every tunable used by the analysis pipeline.
///
/// Missing sections and fields take their defaults, so a config file only
/// needs the values it changes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub normalizer: NormalizerConfig,
    pub resampler: ResamplerConfig,
    pub anomaly: AnomalyConfig,
    pub cpi_weights: CpiWeights,
    pub cpi: CpiConfig,
    pub zones: ZoneConfig,
    pub grip: GripConfig,
    pub tires: TireConfig,
    pub coaching: CoachingConfig,
}

impl AnalysisConfig {
    /// Reads the config from `path` if given, otherwise from the local config
    /// directory, otherwise uses defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, LapsyncError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_local_file()?.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, LapsyncError> {
        let file = File::open(path).map_err(|e| LapsyncError::ConfigIOError { source: e })?;
        let config = serde_json::from_reader(file)
            .map_err(|e| LapsyncError::ConfigSerializeError { source: e })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// `Ok(None)` when there is no config directory or no file in it.
    pub fn from_local_file() -> Result<Option<Self>, LapsyncError> {
        let Some(config_path) = Self::local_path() else {
            debug!("No config directory on this platform, using defaults");
            return Ok(None);
        };
        if config_path.exists() {
            Self::from_file(&config_path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn save(&self) -> Result<PathBuf, LapsyncError> {
        let config_path = Self::local_path().ok_or(LapsyncError::NoConfigDir)?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), LapsyncError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LapsyncError::ConfigIOError { source: e })?;
        }
        let file = File::create(config_path)
            .map_err(|e| LapsyncError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| LapsyncError::ConfigSerializeError { source: e })
    }

    pub fn validate(&self) -> Result<(), LapsyncError> {
        self.normalizer.validate()?;
        self.resampler.validate()?;
        self.anomaly.validate()?;
        self.cpi_weights.validate()?;
        self.cpi.validate()?;
        self.grip.validate()?;
        self.tires.validate()?;
        self.coaching.validate()?;
        if self.zones.zone_count == 0 {
            return Err(LapsyncError::InvalidConfig {
                field: "zones.zone_count".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.zones.risk_zone_count == 0 {
            return Err(LapsyncError::InvalidConfig {
                field: "zones.risk_zone_count".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn local_path() -> Option<PathBuf> {
        Some(
            dirs::config_dir()?
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"resampler": {"grid_size": 200}, "zones": {"zone_count": 3}}"#,
        )
        .unwrap();

        let config = AnalysisConfig::load(Some(&path)).unwrap();
        assert_eq!(config.resampler.grid_size, 200);
        assert_eq!(config.zones.zone_count, 3);
        assert_eq!(config.zones.risk_zone_count, 20);
        assert_eq!(config.anomaly.speed_threshold_kmh, 15.0);
    }

    #[test]
    fn test_invalid_weights_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cpi_weights": {"speed": 0.9}}"#).unwrap();
        let err = AnalysisConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, LapsyncError::InvalidWeights { .. }));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AnalysisConfig::default();
        config.coaching.bucket_length_m = 250.0;
        config.save_to(&path).unwrap();

        let loaded = AnalysisConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.coaching.bucket_length_m, 250.0);
    }
}
