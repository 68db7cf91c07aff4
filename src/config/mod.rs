//! Scan configuration and serialization.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::acquisition::AcquisitionTiming;
use crate::camera::CameraParams;
use crate::device::DeviceSelector;
use crate::error::{ScanError, ScanResult};
use crate::pattern::{FringeParams, Illumination, PatternTiming};

/// Everything needed to run one scan session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Projector model identifier.
    pub projector_model: String,
    /// Which camera to open.
    pub camera: DeviceSelector,
    /// Directory the captured frames are written to.
    pub output_dir: PathBuf,
    /// Fringe pattern parameters.
    pub fringe: FringeParams,
    /// Exposure window of the vertical pattern set.
    pub vertical_timing: PatternTiming,
    /// Exposure window of the horizontal pattern set.
    pub horizontal_timing: PatternTiming,
    /// Projector illumination source.
    pub illumination: Illumination,
    /// Camera parameter setpoints.
    pub camera_params: CameraParams,
    /// Saved camera parameter file; overrides `camera_params` when set.
    pub camera_params_file: Option<PathBuf>,
    /// Loop delays.
    pub timing: AcquisitionTiming,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            projector_model: "DLP4710".to_string(),
            camera: DeviceSelector::First,
            output_dir: PathBuf::from("./images"),
            fringe: FringeParams::default(),
            vertical_timing: PatternTiming::default(),
            horizontal_timing: PatternTiming::default(),
            illumination: Illumination::default(),
            camera_params: CameraParams::default(),
            camera_params_file: None,
            timing: AcquisitionTiming::default(),
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> ScanResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            ScanError::Configuration(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Load from a JSON file, or use defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> ScanResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("Config {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> ScanResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check everything that can be checked before touching hardware.
    pub fn validate(&self) -> ScanResult<()> {
        self.fringe.validate()?;
        self.timing.validate()?;
        if self.output_dir.as_os_str().is_empty() {
            return Err(ScanError::Validation("output directory is empty".into()));
        }
        Ok(())
    }

    /// Camera setpoints to apply, reading `camera_params_file` if configured.
    pub fn resolved_camera_params(&self) -> CameraParams {
        match &self.camera_params_file {
            Some(path) => CameraParams::load_or_default(path),
            None => self.camera_params.clone(),
        }
    }
}
