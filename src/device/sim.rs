//! In-process projector and camera pair.
//!
//! The simulated projector renders the selected pattern onto a shared
//! "screen"; the simulated camera snapshots that screen on every software
//! trigger and hands the frame to the registered handler from its own
//! delivery thread, like a vendor SDK callback. Both sides record every call
//! and accept fault injection so the acquisition protocol can be exercised
//! without hardware.

use crossbeam_channel::{unbounded, Sender};
use image::GrayImage;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Camera, DeviceError, DeviceSelector, FloatRange, FrameHandler, Projector, RawFrame};
use crate::pattern::PatternSet;

/// Status code returned for rejected nodes.
pub const SIM_REJECTED: u32 = 0x8000_0106;

type Screen = Arc<Mutex<Option<GrayImage>>>;

/// Build a projector and camera looking at the same screen.
pub fn simulated_rig(model: &str, width: u32, height: u32) -> (SimulatedProjector, SimulatedCamera) {
    let screen: Screen = Arc::new(Mutex::new(None));
    let projector = SimulatedProjector::new(model, Arc::clone(&screen));
    let camera = SimulatedCamera::new(width, height, screen);
    (projector, camera)
}

/// Faults the simulated projector should produce.
#[derive(Debug, Clone, Default)]
pub struct ProjectorFaults {
    pub fail_connect: bool,
    /// `connect` succeeds but the link never comes up.
    pub link_down: bool,
    pub fail_upload: bool,
    pub fail_start: bool,
    /// 1-based step number that fails.
    pub fail_step_at: Option<usize>,
}

/// Calls observed by the simulated projector.
#[derive(Debug, Clone, Default)]
pub struct ProjectorLog {
    pub connects: usize,
    pub disconnects: usize,
    /// Pattern count of each uploaded set, per upload.
    pub uploads: Vec<Vec<usize>>,
    pub starts: usize,
    pub steps: usize,
    pub stops: usize,
    /// Table index currently on screen.
    pub displayed: Option<usize>,
}

/// Stepped pattern projector.
pub struct SimulatedProjector {
    model: String,
    connected: bool,
    projecting: bool,
    table: Vec<GrayImage>,
    cursor: Option<usize>,
    screen: Screen,
    faults: ProjectorFaults,
    log: Arc<Mutex<ProjectorLog>>,
}

impl SimulatedProjector {
    fn new(model: &str, screen: Screen) -> Self {
        Self {
            model: model.to_string(),
            connected: false,
            projecting: false,
            table: Vec::new(),
            cursor: None,
            screen,
            faults: ProjectorFaults::default(),
            log: Arc::new(Mutex::new(ProjectorLog::default())),
        }
    }

    pub fn with_faults(mut self, faults: ProjectorFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Shared view of the call log, valid after the projector is moved away.
    pub fn log_handle(&self) -> Arc<Mutex<ProjectorLog>> {
        Arc::clone(&self.log)
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::Communication(format!("{} not connected", self.model)))
        }
    }
}

impl Projector for SimulatedProjector {
    fn model(&self) -> &str {
        &self.model
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        self.log.lock().connects += 1;
        if self.faults.fail_connect {
            return Err(DeviceError::NotFound(self.model.clone()));
        }
        self.connected = !self.faults.link_down;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn upload_patterns(&mut self, sets: &[PatternSet]) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.log
            .lock()
            .uploads
            .push(sets.iter().map(PatternSet::len).collect());
        if self.faults.fail_upload {
            return Err(DeviceError::Communication("pattern table write failed".into()));
        }
        self.table = sets
            .iter()
            .flat_map(|set| set.patterns.iter().map(|p| p.image.clone()))
            .collect();
        self.cursor = None;
        Ok(())
    }

    fn start_projection(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.log.lock().starts += 1;
        if self.faults.fail_start || self.table.is_empty() {
            return Err(DeviceError::CommandFailed("project".into()));
        }
        self.projecting = true;
        Ok(())
    }

    fn step(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let step_number = {
            let mut log = self.log.lock();
            log.steps += 1;
            log.steps
        };
        if !self.projecting || self.faults.fail_step_at == Some(step_number) {
            return Err(DeviceError::CommandFailed("step".into()));
        }

        let next = self.cursor.map_or(0, |c| (c + 1) % self.table.len());
        self.cursor = Some(next);
        *self.screen.lock() = self.table.get(next).cloned();
        self.log.lock().displayed = Some(next);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.log.lock().stops += 1;
        self.projecting = false;
        *self.screen.lock() = None;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.log.lock().disconnects += 1;
        self.connected = false;
        self.projecting = false;
    }
}

/// Faults the simulated camera should produce.
#[derive(Debug, Clone, Default)]
pub struct CameraFaults {
    pub fail_open: bool,
    /// Nodes whose setters are rejected.
    pub rejected_nodes: HashSet<String>,
    /// Nodes whose getters fail.
    pub unreadable_nodes: HashSet<String>,
    /// Enum nodes that reject symbolic names but accept numeric values.
    pub numeric_only_enums: HashSet<String>,
    /// 1-based trigger numbers that fail.
    pub failed_triggers: HashSet<usize>,
    /// 1-based trigger numbers that are accepted but never deliver a frame.
    pub dropped_triggers: HashSet<usize>,
    /// Additional copies delivered for every trigger.
    pub extra_deliveries: usize,
}

/// Calls observed by the simulated camera.
#[derive(Debug, Clone, Default)]
pub struct CameraLog {
    pub opens: usize,
    pub closes: usize,
    pub grab_starts: usize,
    pub grab_stops: usize,
    pub commands: Vec<String>,
    pub frames_sent: usize,
    pub enum_writes: Vec<(String, u32)>,
    pub float_writes: Vec<(String, f64)>,
    pub bool_writes: Vec<(String, bool)>,
}

struct DeliveryWorker {
    sender: Sender<RawFrame>,
    handle: JoinHandle<()>,
}

/// Software-triggered Mono8 camera.
pub struct SimulatedCamera {
    serial: String,
    width: u32,
    height: u32,
    open: bool,
    enums: HashMap<String, u32>,
    floats: HashMap<String, FloatRange>,
    bools: HashMap<String, bool>,
    handler: Option<Arc<FrameHandler>>,
    worker: Option<DeliveryWorker>,
    delivery_delay: Duration,
    triggers: usize,
    screen: Screen,
    faults: CameraFaults,
    log: Arc<Mutex<CameraLog>>,
}

/// Symbolic values understood by the enum nodes.
fn enum_symbol(node: &str, name: &str) -> Option<u32> {
    let value = match (node, name) {
        ("PixelFormat", "Mono8") => 0x0108_0001,
        ("PixelFormat", "Mono10") => 0x0110_0003,
        ("TriggerSelector", "FrameStart") => 0,
        ("TriggerSelector", "FrameBurstStart") => 6,
        ("TriggerMode", "Off") => 0,
        ("TriggerMode", "On") => 1,
        ("TriggerSource", "Line0") => 0,
        ("TriggerSource", "Software") => 7,
        ("AcquisitionMode", "SingleFrame") => 0,
        ("AcquisitionMode", "MultiFrame") => 1,
        ("AcquisitionMode", "Continuous") => 2,
        ("ExposureAuto" | "GainAuto", "Off") => 0,
        ("ExposureAuto" | "GainAuto", "Once") => 1,
        ("ExposureAuto" | "GainAuto", "Continuous") => 2,
        _ => return None,
    };
    Some(value)
}

impl SimulatedCamera {
    fn new(width: u32, height: u32, screen: Screen) -> Self {
        let enums = [
            ("PixelFormat", 0x0110_0003),
            ("TriggerSelector", 0),
            ("TriggerMode", 0),
            ("TriggerSource", 0),
            ("AcquisitionMode", 0),
            ("ExposureAuto", 2),
            ("GainAuto", 2),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let floats = [
            ("ExposureTime", 15.0, 10_000_000.0, 10_000.0),
            ("Gain", 0.0, 23.98, 0.0),
            ("AcquisitionFrameRate", 0.1, 100_000.0, 30.0),
            ("TriggerDelay", 0.0, 16_000_000.0, 0.0),
        ]
        .into_iter()
        .map(|(k, min, max, current)| (k.to_string(), FloatRange { min, max, current }))
        .collect();

        let bools = [("AcquisitionFrameRateEnable".to_string(), false)]
            .into_iter()
            .collect();

        Self {
            serial: "SIM00001".to_string(),
            width,
            height,
            open: false,
            enums,
            floats,
            bools,
            handler: None,
            worker: None,
            delivery_delay: Duration::from_millis(2),
            triggers: 0,
            screen,
            faults: CameraFaults::default(),
            log: Arc::new(Mutex::new(CameraLog::default())),
        }
    }

    pub fn with_faults(mut self, faults: CameraFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial = serial.to_string();
        self
    }

    /// Latency between trigger and handler invocation.
    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = delay;
        self
    }

    /// Replace the reported range of a float node.
    pub fn with_float_range(mut self, node: &str, range: FloatRange) -> Self {
        self.floats.insert(node.to_string(), range);
        self
    }

    pub fn log_handle(&self) -> Arc<Mutex<CameraLog>> {
        Arc::clone(&self.log)
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotOpen)
        }
    }

    fn check_writable(&self, node: &str) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if self.faults.rejected_nodes.contains(node) {
            return Err(DeviceError::Rejected {
                node: node.to_string(),
                code: SIM_REJECTED,
            });
        }
        Ok(())
    }

    fn check_readable(&self, node: &str) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if self.faults.unreadable_nodes.contains(node) {
            return Err(DeviceError::Rejected {
                node: node.to_string(),
                code: SIM_REJECTED,
            });
        }
        Ok(())
    }

    fn rejected(node: &str) -> DeviceError {
        DeviceError::Rejected {
            node: node.to_string(),
            code: SIM_REJECTED,
        }
    }

    fn snapshot(&self) -> RawFrame {
        let image = self
            .screen
            .lock()
            .clone()
            .unwrap_or_else(|| GrayImage::new(self.width, self.height));
        let (width, height) = image.dimensions();
        RawFrame {
            width,
            height,
            data: image.into_raw().into(),
        }
    }

    fn fire_trigger(&mut self) -> Result<(), DeviceError> {
        self.triggers += 1;
        let trigger = self.triggers;

        let armed = self.enums.get("TriggerMode") == Some(&1)
            && self.enums.get("TriggerSource") == Some(&7);
        if self.faults.failed_triggers.contains(&trigger) || !armed {
            return Err(DeviceError::CommandFailed(format!("trigger {}", trigger)));
        }
        let Some(worker) = &self.worker else {
            return Err(DeviceError::CommandFailed("not grabbing".into()));
        };
        if self.faults.dropped_triggers.contains(&trigger) {
            log::debug!("Simulated camera: dropping frame for trigger {}", trigger);
            return Ok(());
        }

        let frame = self.snapshot();
        for _ in 0..=self.faults.extra_deliveries {
            if worker.sender.send(frame.clone()).is_ok() {
                self.log.lock().frames_sent += 1;
            }
        }
        Ok(())
    }

    fn shutdown_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.sender);
            if worker.handle.join().is_err() {
                log::warn!("Simulated camera: delivery thread panicked");
            }
        }
    }
}

impl Camera for SimulatedCamera {
    fn open(&mut self, selector: &DeviceSelector) -> Result<(), DeviceError> {
        self.log.lock().opens += 1;
        if self.faults.fail_open {
            return Err(DeviceError::NotFound("no camera enumerated".into()));
        }
        if let DeviceSelector::Serial(serial) = selector {
            if *serial != self.serial {
                log::warn!(
                    "Camera with serial {} not found, using first device ({})",
                    serial,
                    self.serial
                );
            }
        }
        self.open = true;
        Ok(())
    }

    fn set_enum_by_name(&mut self, node: &str, value: &str) -> Result<(), DeviceError> {
        self.check_writable(node)?;
        if self.faults.numeric_only_enums.contains(node) {
            return Err(Self::rejected(node));
        }
        let numeric = enum_symbol(node, value).ok_or_else(|| Self::rejected(node))?;
        self.set_enum_value(node, numeric)
    }

    fn set_enum_value(&mut self, node: &str, value: u32) -> Result<(), DeviceError> {
        self.check_writable(node)?;
        let slot = self.enums.get_mut(node).ok_or_else(|| Self::rejected(node))?;
        *slot = value;
        self.log.lock().enum_writes.push((node.to_string(), value));
        Ok(())
    }

    fn enum_value(&self, node: &str) -> Result<u32, DeviceError> {
        self.check_readable(node)?;
        self.enums.get(node).copied().ok_or_else(|| Self::rejected(node))
    }

    fn float_range(&self, node: &str) -> Result<FloatRange, DeviceError> {
        self.check_readable(node)?;
        self.floats.get(node).copied().ok_or_else(|| Self::rejected(node))
    }

    fn set_float(&mut self, node: &str, value: f64) -> Result<(), DeviceError> {
        self.check_writable(node)?;
        let range = self.floats.get_mut(node).ok_or_else(|| Self::rejected(node))?;
        if value < range.min || value > range.max {
            return Err(Self::rejected(node));
        }
        range.current = value;
        self.log.lock().float_writes.push((node.to_string(), value));
        Ok(())
    }

    fn set_bool(&mut self, node: &str, value: bool) -> Result<(), DeviceError> {
        self.check_writable(node)?;
        let slot = self.bools.get_mut(node).ok_or_else(|| Self::rejected(node))?;
        *slot = value;
        self.log.lock().bool_writes.push((node.to_string(), value));
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.log.lock().commands.push(command.to_string());
        match command {
            "TriggerSoftware" | "FrameTriggerSoftware" => self.fire_trigger(),
            other => Err(DeviceError::CommandFailed(other.to_string())),
        }
    }

    fn register_frame_handler(&mut self, handler: FrameHandler) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.handler = Some(Arc::new(handler));
        Ok(())
    }

    fn start_grabbing(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if self.worker.is_some() {
            return Ok(());
        }
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| DeviceError::CommandFailed("no frame handler registered".into()))?;

        let (sender, receiver) = unbounded::<RawFrame>();
        let delay = self.delivery_delay;
        let handle = thread::Builder::new()
            .name("sim-camera-delivery".to_string())
            .spawn(move || {
                while let Ok(frame) = receiver.recv() {
                    thread::sleep(delay);
                    (**handler)(frame);
                }
            })
            .map_err(|e| DeviceError::Communication(format!("delivery thread: {}", e)))?;

        self.worker = Some(DeliveryWorker { sender, handle });
        self.log.lock().grab_starts += 1;
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.shutdown_worker();
        self.log.lock().grab_stops += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.shutdown_worker();
        self.handler = None;
        self.open = false;
        self.log.lock().closes += 1;
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}
