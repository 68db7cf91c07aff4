//! Base trigger configuration and the trigger-selector capability probe.

use crate::device::Camera;
use crate::error::{ScanError, ScanResult};

/// Numeric value of the `FrameStart` trigger selector.
pub const SELECTOR_FRAME_START: u32 = 0;
/// Numeric value of the `FrameBurstStart` trigger selector, used when the
/// firmware rejects `FrameStart` by name.
pub const SELECTOR_FRAME_BURST_START: u32 = 6;
/// Numeric value of `TriggerMode = On`.
pub const TRIGGER_MODE_ON: u32 = 1;

/// Command node that fires one software trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    /// Used when the active selector is `FrameStart`.
    FrameTriggerSoftware,
    /// Used for every other selector and when the selector cannot be read.
    TriggerSoftware,
}

impl TriggerCommand {
    pub fn for_selector(selector: Option<u32>) -> Self {
        match selector {
            Some(SELECTOR_FRAME_START) => TriggerCommand::FrameTriggerSoftware,
            _ => TriggerCommand::TriggerSoftware,
        }
    }

    pub fn node(self) -> &'static str {
        match self {
            TriggerCommand::FrameTriggerSoftware => "FrameTriggerSoftware",
            TriggerCommand::TriggerSoftware => "TriggerSoftware",
        }
    }
}

impl std::fmt::Display for TriggerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.node())
    }
}

/// Result of the one-time probe, cached for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerCapability {
    /// Active selector as read back from the device.
    pub selector: Option<u32>,
    pub command: TriggerCommand,
}

/// Put the camera into single-frame software-triggered Mono8 capture.
///
/// Every setting here is a prerequisite for deterministic capture, so any
/// rejection is a configuration error.
pub fn configure_base<C: Camera + ?Sized>(camera: &mut C) -> ScanResult<()> {
    camera
        .set_enum_by_name("PixelFormat", "Mono8")
        .map_err(|e| ScanError::configuration("PixelFormat", e))?;

    if let Err(e) = camera.set_enum_by_name("TriggerSelector", "FrameStart") {
        log::warn!(
            "TriggerSelector=FrameStart rejected ({}), falling back to value {}",
            e,
            SELECTOR_FRAME_BURST_START
        );
        camera
            .set_enum_value("TriggerSelector", SELECTOR_FRAME_BURST_START)
            .map_err(|e| ScanError::configuration("TriggerSelector", e))?;
    }

    camera
        .set_enum_value("TriggerMode", TRIGGER_MODE_ON)
        .map_err(|e| ScanError::configuration("TriggerMode", e))?;
    camera
        .set_enum_by_name("TriggerSource", "Software")
        .map_err(|e| ScanError::configuration("TriggerSource", e))?;
    camera
        .set_enum_by_name("AcquisitionMode", "Continuous")
        .map_err(|e| ScanError::configuration("AcquisitionMode", e))?;

    log::info!("Camera configured: Mono8, software trigger, continuous acquisition");
    Ok(())
}

/// Resolve which software trigger command the active selector needs.
pub fn probe_trigger<C: Camera + ?Sized>(camera: &C) -> TriggerCapability {
    let selector = match camera.enum_value("TriggerSelector") {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Could not read TriggerSelector: {}", e);
            None
        }
    };
    let command = TriggerCommand::for_selector(selector);
    log::info!("Trigger selector {:?} -> {}", selector, command);
    TriggerCapability { selector, command }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{simulated_rig, CameraFaults, SimulatedCamera};
    use crate::device::DeviceSelector;

    fn open_camera(faults: CameraFaults) -> SimulatedCamera {
        let (_projector, camera) = simulated_rig("DLP4710", 8, 4);
        let mut camera = camera.with_faults(faults);
        camera.open(&DeviceSelector::First).unwrap();
        camera
    }

    fn nodes(names: &[&str]) -> std::collections::HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_base_configuration() {
        let mut camera = open_camera(CameraFaults::default());
        configure_base(&mut camera).unwrap();

        assert_eq!(camera.enum_value("PixelFormat").unwrap(), 0x0108_0001);
        assert_eq!(camera.enum_value("TriggerMode").unwrap(), TRIGGER_MODE_ON);
        assert_eq!(camera.enum_value("TriggerSource").unwrap(), 7);
        assert_eq!(camera.enum_value("AcquisitionMode").unwrap(), 2);

        let capability = probe_trigger(&camera);
        assert_eq!(capability.selector, Some(SELECTOR_FRAME_START));
        assert_eq!(capability.command, TriggerCommand::FrameTriggerSoftware);
    }

    #[test]
    fn test_selector_fallback() {
        let mut camera = open_camera(CameraFaults {
            numeric_only_enums: nodes(&["TriggerSelector"]),
            ..CameraFaults::default()
        });
        configure_base(&mut camera).unwrap();

        let capability = probe_trigger(&camera);
        assert_eq!(capability.selector, Some(SELECTOR_FRAME_BURST_START));
        assert_eq!(capability.command, TriggerCommand::TriggerSoftware);
    }

    #[test]
    fn test_unreadable_selector_uses_generic_trigger() {
        let mut camera = open_camera(CameraFaults {
            unreadable_nodes: nodes(&["TriggerSelector"]),
            ..CameraFaults::default()
        });
        configure_base(&mut camera).unwrap();
        assert_eq!(probe_trigger(&camera).command, TriggerCommand::TriggerSoftware);
    }

    #[test]
    fn test_rejected_base_setting_is_fatal() {
        for node in ["PixelFormat", "TriggerMode", "TriggerSource", "AcquisitionMode"] {
            let mut camera = open_camera(CameraFaults {
                rejected_nodes: nodes(&[node]),
                ..CameraFaults::default()
            });
            let err = configure_base(&mut camera).unwrap_err();
            assert!(err.is_fatal(), "{} should be fatal", node);
            assert!(err.to_string().contains(node));
        }
    }
}
