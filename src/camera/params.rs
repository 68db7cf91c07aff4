//! Requested camera setpoints and their application against live ranges.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

use crate::device::{Camera, DeviceError, FloatRange};
use crate::error::{ScanError, ScanResult};

/// A requested value, or a request to leave the device as it is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Setpoint {
    /// Keep the current value and mode (possibly automatic).
    #[default]
    KeepCurrent,
    /// Let the camera regulate the parameter continuously.
    Auto,
    /// Switch to manual mode and set this value, clamped to the device range.
    Value(f64),
}

impl Setpoint {
    /// Negative or non-finite requests mean "keep current".
    pub fn from_request(value: f64) -> Self {
        if value.is_finite() && value >= 0.0 {
            Setpoint::Value(value)
        } else {
            Setpoint::KeepCurrent
        }
    }

    pub fn requested(self) -> Option<f64> {
        match self {
            Setpoint::Value(v) => Some(v),
            Setpoint::KeepCurrent | Setpoint::Auto => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSetpoint {
    Number(f64),
    Word(String),
}

// Stored as a plain number in config files, -1 meaning "keep current";
// continuous automatic mode is the string "auto".
impl Serialize for Setpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Setpoint::Auto => serializer.serialize_str("auto"),
            other => serializer.serialize_f64(other.requested().unwrap_or(-1.0)),
        }
    }
}

impl<'de> Deserialize<'de> for Setpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match StoredSetpoint::deserialize(deserializer)? {
            StoredSetpoint::Number(value) => Ok(Setpoint::from_request(value)),
            StoredSetpoint::Word(word) => match word.to_ascii_lowercase().as_str() {
                "auto" => Ok(Setpoint::Auto),
                "keep" | "keep_current" => Ok(Setpoint::KeepCurrent),
                other => Err(serde::de::Error::custom(format!(
                    "unknown setpoint '{}', expected a number, \"auto\" or \"keep\"",
                    other
                ))),
            },
        }
    }
}

/// Requested camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    pub exposure_us: Setpoint,
    pub gain: Setpoint,
    pub frame_rate: Setpoint,
    pub trigger_delay_us: Setpoint,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            exposure_us: Setpoint::Value(10_000.0),
            gain: Setpoint::Value(5.0),
            frame_rate: Setpoint::Value(10.0),
            trigger_delay_us: Setpoint::Value(0.0),
        }
    }
}

impl CameraParams {
    /// Leave every parameter as the device currently has it.
    pub fn keep_current() -> Self {
        Self {
            exposure_us: Setpoint::KeepCurrent,
            gain: Setpoint::KeepCurrent,
            frame_rate: Setpoint::KeepCurrent,
            trigger_delay_us: Setpoint::KeepCurrent,
        }
    }

    /// Load saved parameters, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(params) => {
                    log::info!("Camera parameters loaded from {}", path.display());
                    params
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse camera parameters {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "Camera parameter file {} not found, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// The parameter table in application order.
    pub fn table(&self) -> [ParameterSpec; 4] {
        [
            ParameterSpec {
                node: "ExposureTime",
                setpoint: self.exposure_us,
                auto_mode: AutoMode::Enum("ExposureAuto"),
                requirement: Requirement::Required,
            },
            ParameterSpec {
                node: "Gain",
                setpoint: self.gain,
                auto_mode: AutoMode::Enum("GainAuto"),
                requirement: Requirement::Optional,
            },
            ParameterSpec {
                node: "AcquisitionFrameRate",
                setpoint: self.frame_rate,
                auto_mode: AutoMode::EnableFlag("AcquisitionFrameRateEnable"),
                requirement: Requirement::Optional,
            },
            ParameterSpec {
                node: "TriggerDelay",
                setpoint: self.trigger_delay_us,
                auto_mode: AutoMode::None,
                requirement: Requirement::Optional,
            },
        ]
    }
}

/// Value of an `*Auto` enum node that disables automatic control.
pub const AUTO_OFF: u32 = 0;
/// Value of an `*Auto` enum node for continuous automatic control.
pub const AUTO_CONTINUOUS: u32 = 2;

/// How manual control of a parameter is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMode {
    /// No automatic mode.
    None,
    /// Enum node, `Off` for manual and `Continuous` for automatic.
    Enum(&'static str),
    /// Bool node set to true to make the manual value effective.
    EnableFlag(&'static str),
}

/// Whether a rejection aborts the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// One row of the parameter table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub node: &'static str,
    pub setpoint: Setpoint,
    pub auto_mode: AutoMode,
    pub requirement: Requirement,
}

/// What happened to one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedParameter {
    pub node: &'static str,
    pub setpoint: Setpoint,
    pub range: Option<FloatRange>,
    /// Value written to the device, `None` when kept or rejected.
    pub applied: Option<f64>,
    pub error: Option<String>,
}

/// Clamp `value` into `[lo, hi]`.
pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// Take manual control of one row and write `requested` clamped to the live range.
///
/// A failure to switch the automatic mode off is logged and the value is
/// still written; only the range read and the write itself can fail the row.
pub fn apply_parameter<C: Camera + ?Sized>(
    camera: &mut C,
    spec: &ParameterSpec,
    requested: f64,
) -> Result<(FloatRange, f64), DeviceError> {
    let toggled = match spec.auto_mode {
        AutoMode::None => Ok(()),
        AutoMode::Enum(node) => camera.set_enum_value(node, AUTO_OFF),
        AutoMode::EnableFlag(node) => camera.set_bool(node, true),
    };
    if let Err(e) = toggled {
        log::warn!("{}: could not take manual control ({}), writing anyway", spec.node, e);
    }

    let range = camera.float_range(spec.node)?;
    let value = clamp(requested, range.min, range.max);
    camera.set_float(spec.node, value)?;
    Ok((range, value))
}

/// Hand one row over to the camera's automatic control.
///
/// Returns `Ok(false)` when the parameter has no automatic mode.
pub fn apply_auto<C: Camera + ?Sized>(
    camera: &mut C,
    spec: &ParameterSpec,
) -> Result<bool, DeviceError> {
    match spec.auto_mode {
        AutoMode::None => Ok(false),
        AutoMode::Enum(node) => camera.set_enum_value(node, AUTO_CONTINUOUS).map(|_| true),
        AutoMode::EnableFlag(node) => camera.set_bool(node, false).map(|_| true),
    }
}

/// Apply the whole table.
///
/// Rejections of optional rows are logged and reported in the outcome list;
/// a rejection of a required row is returned as a configuration error.
/// Automatic mode requests never abort the session.
pub fn apply_parameters<C: Camera + ?Sized>(
    camera: &mut C,
    params: &CameraParams,
) -> ScanResult<Vec<AppliedParameter>> {
    let mut outcomes = Vec::with_capacity(4);

    for spec in params.table() {
        let requested = match spec.setpoint {
            Setpoint::Value(requested) => requested,
            Setpoint::KeepCurrent => {
                log::debug!("{}: keeping current value", spec.node);
                outcomes.push(AppliedParameter {
                    node: spec.node,
                    setpoint: spec.setpoint,
                    range: camera.float_range(spec.node).ok(),
                    applied: None,
                    error: None,
                });
                continue;
            }
            Setpoint::Auto => {
                let error = match apply_auto(camera, &spec) {
                    Ok(true) => {
                        log::info!("{}: automatic", spec.node);
                        None
                    }
                    Ok(false) => {
                        log::warn!("{}: no automatic mode, keeping current value", spec.node);
                        None
                    }
                    Err(e) => {
                        let err = ScanError::transient(spec.node, e);
                        log::warn!("{}, continuing", err);
                        Some(err.to_string())
                    }
                };
                outcomes.push(AppliedParameter {
                    node: spec.node,
                    setpoint: spec.setpoint,
                    range: camera.float_range(spec.node).ok(),
                    applied: None,
                    error,
                });
                continue;
            }
        };

        match apply_parameter(camera, &spec, requested) {
            Ok((range, value)) => {
                log::info!(
                    "{}: {} [{}, {}]",
                    spec.node,
                    value,
                    range.min,
                    range.max
                );
                outcomes.push(AppliedParameter {
                    node: spec.node,
                    setpoint: spec.setpoint,
                    range: Some(range),
                    applied: Some(value),
                    error: None,
                });
            }
            Err(e) if spec.requirement == Requirement::Optional => {
                let err = ScanError::transient(spec.node, e);
                log::warn!("{}, continuing", err);
                outcomes.push(AppliedParameter {
                    node: spec.node,
                    setpoint: spec.setpoint,
                    range: None,
                    applied: None,
                    error: Some(err.to_string()),
                });
            }
            Err(e) => return Err(ScanError::configuration(spec.node, e)),
        }
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{simulated_rig, CameraFaults};
    use crate::device::DeviceSelector;

    fn open_camera(faults: CameraFaults) -> crate::device::sim::SimulatedCamera {
        let (_projector, camera) = simulated_rig("DLP4710", 8, 4);
        let mut camera = camera.with_faults(faults);
        camera.open(&DeviceSelector::First).unwrap();
        camera
    }

    #[test]
    fn test_clamp_bounds() {
        assert_eq!(clamp(5.0, 0.0, 10.0), 5.0);
        assert_eq!(clamp(-3.0, 0.0, 10.0), 0.0);
        assert_eq!(clamp(42.0, 0.0, 10.0), 10.0);
        assert_eq!(clamp(0.0, 0.0, 10.0), 0.0);
        assert_eq!(clamp(10.0, 0.0, 10.0), 10.0);
    }

    #[test]
    fn test_setpoint_from_request() {
        assert_eq!(Setpoint::from_request(-1.0), Setpoint::KeepCurrent);
        assert_eq!(Setpoint::from_request(f64::NAN), Setpoint::KeepCurrent);
        assert_eq!(Setpoint::from_request(0.0), Setpoint::Value(0.0));
    }

    #[test]
    fn test_setpoint_serde() {
        let params: CameraParams =
            serde_json::from_str(r#"{"exposure_us": 4000, "gain": -1}"#).unwrap();
        assert_eq!(params.exposure_us, Setpoint::Value(4000.0));
        assert_eq!(params.gain, Setpoint::KeepCurrent);
        // Unspecified fields keep their defaults
        assert_eq!(params.frame_rate, Setpoint::Value(10.0));

        let json = serde_json::to_string(&CameraParams::keep_current()).unwrap();
        assert!(json.contains("\"gain\":-1.0"));
    }

    #[test]
    fn test_out_of_range_request_is_clamped() {
        let mut camera = open_camera(CameraFaults::default());
        let params = CameraParams {
            gain: Setpoint::Value(99.0),
            ..CameraParams::default()
        };
        let outcomes = apply_parameters(&mut camera, &params).unwrap();

        let gain = outcomes.iter().find(|o| o.node == "Gain").unwrap();
        assert_eq!(gain.applied, Some(23.98));
        let log = camera.log_handle().lock().clone();
        assert!(log.enum_writes.contains(&("GainAuto".to_string(), 0)));
        assert!(log
            .bool_writes
            .contains(&("AcquisitionFrameRateEnable".to_string(), true)));
    }

    #[test]
    fn test_request_clamped_to_live_device_range() {
        let (_projector, camera) = simulated_rig("DLP4710", 8, 4);
        let mut camera = camera.with_float_range(
            "ExposureTime",
            FloatRange {
                min: 500.0,
                max: 2000.0,
                current: 1000.0,
            },
        );
        camera.open(&DeviceSelector::First).unwrap();

        let params = CameraParams {
            exposure_us: Setpoint::Value(10_000.0),
            ..CameraParams::default()
        };
        let outcomes = apply_parameters(&mut camera, &params).unwrap();
        let exposure = outcomes.iter().find(|o| o.node == "ExposureTime").unwrap();
        assert_eq!(exposure.applied, Some(2000.0));
        assert_eq!(exposure.range.map(|r| r.min), Some(500.0));

        let params = CameraParams {
            exposure_us: Setpoint::Value(100.0),
            ..CameraParams::default()
        };
        apply_parameters(&mut camera, &params).unwrap();
        assert_eq!(camera.float_range("ExposureTime").unwrap().current, 500.0);
    }

    #[test]
    fn test_keep_current_leaves_auto_mode() {
        let mut camera = open_camera(CameraFaults::default());
        let outcomes = apply_parameters(&mut camera, &CameraParams::keep_current()).unwrap();

        assert!(outcomes.iter().all(|o| o.applied.is_none()));
        let log = camera.log_handle().lock().clone();
        assert!(log.enum_writes.is_empty());
        assert!(log.float_writes.is_empty());
        assert_eq!(camera.enum_value("ExposureAuto").unwrap(), 2);
    }

    #[test]
    fn test_optional_rejection_continues() {
        let mut camera = open_camera(CameraFaults {
            rejected_nodes: ["Gain".to_string(), "TriggerDelay".to_string()]
                .into_iter()
                .collect(),
            ..CameraFaults::default()
        });
        let outcomes = apply_parameters(&mut camera, &CameraParams::default()).unwrap();

        assert_eq!(outcomes.len(), 4);
        let gain = outcomes.iter().find(|o| o.node == "Gain").unwrap();
        assert!(gain.applied.is_none());
        assert!(gain.error.as_deref().unwrap().contains("Transient"));
        let exposure = outcomes.iter().find(|o| o.node == "ExposureTime").unwrap();
        assert_eq!(exposure.applied, Some(10_000.0));
    }

    #[test]
    fn test_required_rejection_is_fatal() {
        let mut camera = open_camera(CameraFaults {
            rejected_nodes: ["ExposureTime".to_string()].into_iter().collect(),
            ..CameraFaults::default()
        });
        let result = apply_parameters(&mut camera, &CameraParams::default());
        assert!(matches!(result, Err(ScanError::Configuration(_))));
    }

    #[test]
    fn test_rejected_auto_toggle_still_writes_value() {
        let mut camera = open_camera(CameraFaults {
            rejected_nodes: ["ExposureAuto".to_string(), "GainAuto".to_string()]
                .into_iter()
                .collect(),
            ..CameraFaults::default()
        });
        let outcomes = apply_parameters(&mut camera, &CameraParams::default()).unwrap();

        let exposure = outcomes.iter().find(|o| o.node == "ExposureTime").unwrap();
        assert_eq!(exposure.applied, Some(10_000.0));
        assert!(exposure.error.is_none());
        let gain = outcomes.iter().find(|o| o.node == "Gain").unwrap();
        assert_eq!(gain.applied, Some(5.0));
        assert_eq!(camera.float_range("ExposureTime").unwrap().current, 10_000.0);
    }

    #[test]
    fn test_auto_request_enables_continuous_mode() {
        let mut camera = open_camera(CameraFaults::default());
        camera.set_enum_value("ExposureAuto", AUTO_OFF).unwrap();
        camera.set_enum_value("GainAuto", AUTO_OFF).unwrap();

        let params = CameraParams {
            exposure_us: Setpoint::Auto,
            gain: Setpoint::Auto,
            frame_rate: Setpoint::Auto,
            trigger_delay_us: Setpoint::Auto,
        };
        let outcomes = apply_parameters(&mut camera, &params).unwrap();

        assert!(outcomes.iter().all(|o| o.applied.is_none() && o.error.is_none()));
        assert_eq!(camera.enum_value("ExposureAuto").unwrap(), AUTO_CONTINUOUS);
        assert_eq!(camera.enum_value("GainAuto").unwrap(), AUTO_CONTINUOUS);
        let log = camera.log_handle().lock().clone();
        assert!(log.float_writes.is_empty());
        assert!(log
            .bool_writes
            .contains(&("AcquisitionFrameRateEnable".to_string(), false)));
    }

    #[test]
    fn test_rejected_auto_request_continues() {
        let mut camera = open_camera(CameraFaults {
            rejected_nodes: ["ExposureAuto".to_string()].into_iter().collect(),
            ..CameraFaults::default()
        });
        let params = CameraParams {
            exposure_us: Setpoint::Auto,
            ..CameraParams::default()
        };
        let outcomes = apply_parameters(&mut camera, &params).unwrap();
        let exposure = outcomes.iter().find(|o| o.node == "ExposureTime").unwrap();
        assert!(exposure.error.is_some());
    }

    #[test]
    fn test_auto_setpoint_serde() {
        let params: CameraParams =
            serde_json::from_str(r#"{"exposure_us": "auto", "gain": "keep"}"#).unwrap();
        assert_eq!(params.exposure_us, Setpoint::Auto);
        assert_eq!(params.gain, Setpoint::KeepCurrent);

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"exposure_us\":\"auto\""));
        assert!(serde_json::from_str::<CameraParams>(r#"{"gain": "manual"}"#).is_err());
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("camera_params.json");
        assert_eq!(CameraParams::load_or_default(&missing), CameraParams::default());

        let saved = CameraParams {
            exposure_us: Setpoint::Value(2500.0),
            gain: Setpoint::KeepCurrent,
            ..CameraParams::default()
        };
        saved.save(&missing).unwrap();
        assert_eq!(CameraParams::load_or_default(&missing), saved);

        std::fs::write(&missing, "not json").unwrap();
        assert_eq!(CameraParams::load_or_default(&missing), CameraParams::default());
    }
}
