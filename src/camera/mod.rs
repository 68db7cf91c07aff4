//! Camera configuration on top of the [`Camera`](crate::device::Camera) trait.

mod params;
mod trigger;

pub use params::{
    apply_auto, apply_parameter, apply_parameters, clamp, AppliedParameter, AutoMode,
    CameraParams, ParameterSpec, Requirement, Setpoint, AUTO_CONTINUOUS, AUTO_OFF,
};
pub use trigger::{
    configure_base, probe_trigger, TriggerCapability, TriggerCommand, SELECTOR_FRAME_BURST_START,
    SELECTOR_FRAME_START, TRIGGER_MODE_ON,
};
