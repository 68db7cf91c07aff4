//! Projector and camera collaborators.
//!
//! The acquisition protocol only talks to hardware through the [`Projector`]
//! and [`Camera`] traits. Vendor SDK bindings implement them outside this
//! crate; [`sim`] provides an in-process rig for tests and dry runs.

pub mod sim;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pattern::PatternSet;

/// Failure reported by a device collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device not open")]
    NotOpen,

    #[error("Parameter '{node}' rejected (code {code:#x})")]
    Rejected { node: String, code: u32 },

    #[error("Command '{0}' failed")]
    CommandFailed(String),

    #[error("Communication error: {0}")]
    Communication(String),
}

/// Which camera to open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// First enumerated device.
    #[default]
    First,
    /// Device with this serial number, falling back to the first device.
    Serial(String),
}

impl DeviceSelector {
    /// Interpret a user supplied serial; empty or `"NULL"` selects the first device.
    pub fn from_serial(serial: &str) -> Self {
        let serial = serial.trim();
        if serial.is_empty() || serial.eq_ignore_ascii_case("null") {
            DeviceSelector::First
        } else {
            DeviceSelector::Serial(serial.to_string())
        }
    }
}

/// Live range of a float parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
    pub current: f64,
}

/// Frame as handed over by the camera's delivery thread.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Mono8 pixel data, row-major.
    pub data: Bytes,
}

/// Callback invoked on the camera's delivery thread for every frame.
pub type FrameHandler = Box<dyn Fn(RawFrame) + Send + Sync + 'static>;

/// A projector with an internal pattern table that advances on command.
pub trait Projector: Send {
    /// Model identifier, e.g. "DLP4710".
    fn model(&self) -> &str;

    fn connect(&mut self) -> Result<(), DeviceError>;

    fn is_connected(&self) -> bool;

    /// Replace the pattern table with the given sets, in order.
    fn upload_patterns(&mut self, sets: &[PatternSet]) -> Result<(), DeviceError>;

    /// Start projecting in stepping mode; patterns advance only on [`Projector::step`].
    fn start_projection(&mut self) -> Result<(), DeviceError>;

    /// Advance to the next pattern. There is no acknowledgement of optical stability.
    fn step(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    fn disconnect(&mut self);
}

/// A GenICam-style camera with string-keyed parameter nodes.
pub trait Camera: Send {
    fn open(&mut self, selector: &DeviceSelector) -> Result<(), DeviceError>;

    fn set_enum_by_name(&mut self, node: &str, value: &str) -> Result<(), DeviceError>;

    fn set_enum_value(&mut self, node: &str, value: u32) -> Result<(), DeviceError>;

    fn enum_value(&self, node: &str) -> Result<u32, DeviceError>;

    fn float_range(&self, node: &str) -> Result<FloatRange, DeviceError>;

    fn set_float(&mut self, node: &str, value: f64) -> Result<(), DeviceError>;

    fn set_bool(&mut self, node: &str, value: bool) -> Result<(), DeviceError>;

    /// Execute a command node such as `TriggerSoftware`.
    fn execute(&mut self, command: &str) -> Result<(), DeviceError>;

    fn register_frame_handler(&mut self, handler: FrameHandler) -> Result<(), DeviceError>;

    fn start_grabbing(&mut self) -> Result<(), DeviceError>;

    /// Stop grabbing. Frames already queued for delivery are handed to the
    /// handler before this returns.
    fn stop_grabbing(&mut self) -> Result<(), DeviceError>;

    /// Close the device and release the handle.
    fn close(&mut self);
}
