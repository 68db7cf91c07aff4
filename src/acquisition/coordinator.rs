//! Projector/camera synchronisation for one scan session.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::state::AcquisitionState;
use super::timing::{exposure_wait, stabilization_wait};
use crate::camera::{
    apply_parameters, configure_base, probe_trigger, AppliedParameter, CameraParams,
    TriggerCapability, TriggerCommand,
};
use crate::capture::{FrameEvent, FrameSink, SinkStats, VerificationReport};
use crate::config::ScanConfig;
use crate::device::{Camera, Projector};
use crate::error::{ScanError, ScanResult};
use crate::pattern::{partition_sets, FringeGenerator, FringePattern, Orientation, PatternTiming};

/// Summary of a finished session.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub total_frames: usize,
    /// Trigger command used for the whole session.
    pub trigger_command: Option<TriggerCommand>,
    pub triggers_sent: usize,
    /// Frame numbers whose trigger was rejected.
    pub trigger_failures: Vec<usize>,
    /// Frame numbers whose frame did not arrive in time.
    pub frame_timeouts: Vec<usize>,
    /// Frame number whose projector step failed; the loop stopped there.
    pub step_failure: Option<usize>,
    /// Settle time used before each trigger, in frame order.
    pub stabilization_waits: Vec<Duration>,
    pub parameters: Vec<AppliedParameter>,
    pub frames: SinkStats,
    pub verification: VerificationReport,
}

impl ScanReport {
    /// Whether every expected frame is on disk.
    pub fn is_complete(&self) -> bool {
        self.verification.expected == self.total_frames && self.verification.is_complete()
    }
}

/// Drives a projector and a camera through one phase-shift capture.
///
/// Devices are released exactly once, on every exit path, by
/// [`AcquisitionCoordinator::teardown`]; dropping the coordinator tears
/// down as well.
pub struct AcquisitionCoordinator<P: Projector, C: Camera> {
    config: ScanConfig,
    camera_params: CameraParams,
    patterns: Vec<FringePattern>,
    projector: P,
    camera: C,
    state: AcquisitionState,
    transitions: Vec<AcquisitionState>,
    sink: Option<Arc<FrameSink>>,
    events: Option<Receiver<FrameEvent>>,
    capability: Option<TriggerCapability>,
    parameters: Vec<AppliedParameter>,

    projector_connected: bool,
    projecting: bool,
    camera_open: bool,
    grabbing: bool,
}

impl<P: Projector, C: Camera> AcquisitionCoordinator<P, C> {
    /// Validate the configuration and generate the pattern sequence.
    ///
    /// No device is touched until [`run`](Self::run).
    pub fn new(config: ScanConfig, projector: P, camera: C) -> ScanResult<Self> {
        config.validate()?;
        let patterns = FringeGenerator::new(config.fringe.clone())?.generate();
        let camera_params = config.resolved_camera_params();

        log::info!(
            "Scan prepared: {} frames of {}x{} for {}",
            patterns.len(),
            config.fringe.width,
            config.fringe.height,
            projector.model()
        );

        Ok(Self {
            config,
            camera_params,
            patterns,
            projector,
            camera,
            state: AcquisitionState::Idle,
            transitions: vec![AcquisitionState::Idle],
            sink: None,
            events: None,
            capability: None,
            parameters: Vec::new(),
            projector_connected: false,
            projecting: false,
            camera_open: false,
            grabbing: false,
        })
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn transitions(&self) -> &[AcquisitionState] {
        &self.transitions
    }

    pub fn projector(&self) -> &P {
        &self.projector
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    fn steps(&self) -> usize {
        self.config.fringe.steps as usize
    }

    fn total_frames(&self) -> usize {
        self.config.fringe.total_frames()
    }

    fn transition(&mut self, next: AcquisitionState) {
        log::info!("Acquisition: {} -> {}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    /// Run the whole session and tear down.
    ///
    /// Fatal errors abort the loop; the devices are released before the
    /// error is returned. A coordinator runs once.
    pub fn run(&mut self) -> ScanResult<ScanReport> {
        if self.state != AcquisitionState::Idle {
            return Err(ScanError::Validation(format!(
                "session cannot run from state '{}'",
                self.state
            )));
        }

        let outcome = self.execute();
        // Stops grabbing first so in-flight deliveries land before the report
        self.teardown();
        let mut report = match outcome {
            Ok(report) => report,
            Err(e) => {
                log::error!("Scan aborted: {}", e);
                return Err(e);
            }
        };

        if let Some(sink) = &self.sink {
            report.frames = sink.stats();
            report.verification = sink.verify();
        }
        log::info!(
            "Scan finished: {}/{} frames saved, {} trigger failures, {} timeouts, {} discarded",
            report.verification.found,
            report.total_frames,
            report.trigger_failures.len(),
            report.frame_timeouts.len(),
            report.frames.discarded
        );
        if let Some(index) = report.step_failure {
            log::warn!("Capture stopped early at projector step {}", index);
        }
        Ok(report)
    }

    fn execute(&mut self) -> ScanResult<ScanReport> {
        self.prepare_devices()?;
        self.load_patterns()?;
        self.start_projection()?;

        let mut report = ScanReport {
            total_frames: self.total_frames(),
            trigger_command: self.capability.map(|c| c.command),
            parameters: self.parameters.clone(),
            ..ScanReport::default()
        };

        for index in 1..=self.total_frames() {
            if !self.capture_frame(index, &mut report) {
                break;
            }
        }

        self.transition(AcquisitionState::Completed);
        Ok(report)
    }

    /// Idle -> DeviceReady.
    fn prepare_devices(&mut self) -> ScanResult<()> {
        self.projector
            .connect()
            .map_err(|e| ScanError::configuration("Projector connect", e))?;
        self.projector_connected = true;
        if !self.projector.is_connected() {
            return Err(ScanError::Configuration(format!(
                "Projector {} did not report a connection",
                self.projector.model()
            )));
        }
        log::info!("Projector {} connected", self.projector.model());

        self.camera
            .open(&self.config.camera)
            .map_err(|e| ScanError::configuration("Camera open", e))?;
        self.camera_open = true;

        configure_base(&mut self.camera)?;
        self.parameters = apply_parameters(&mut self.camera, &self.camera_params)?;
        self.capability = Some(probe_trigger(&self.camera));

        let (sink, events) = FrameSink::new(&self.config.output_dir, self.steps())?;
        let sink = Arc::new(sink);
        self.camera
            .register_frame_handler(sink.handler())
            .map_err(|e| ScanError::configuration("Frame handler registration", e))?;
        self.sink = Some(sink);
        self.events = Some(events);

        self.camera
            .start_grabbing()
            .map_err(|e| ScanError::configuration("Start grabbing", e))?;
        self.grabbing = true;

        self.transition(AcquisitionState::DeviceReady);
        Ok(())
    }

    /// DeviceReady -> PatternsLoaded.
    fn load_patterns(&mut self) -> ScanResult<()> {
        let patterns = std::mem::take(&mut self.patterns);
        let sets = partition_sets(
            patterns,
            self.steps(),
            self.config.vertical_timing,
            self.config.horizontal_timing,
            self.config.illumination,
        )?;
        self.projector
            .upload_patterns(&sets)
            .map_err(|e| ScanError::configuration("Pattern upload", e))?;

        log::info!(
            "Uploaded {} vertical and {} horizontal patterns",
            sets[0].len(),
            sets[1].len()
        );
        self.transition(AcquisitionState::PatternsLoaded);
        Ok(())
    }

    /// PatternsLoaded -> Projecting.
    fn start_projection(&mut self) -> ScanResult<()> {
        self.projector
            .start_projection()
            .map_err(|e| ScanError::configuration("Start projection", e))?;
        self.projecting = true;
        self.transition(AcquisitionState::Projecting);
        thread::sleep(self.config.timing.startup_delay());
        Ok(())
    }

    fn pattern_timing(&self, index: usize) -> PatternTiming {
        match Orientation::for_frame(index, self.steps()) {
            Orientation::Vertical => self.config.vertical_timing,
            Orientation::Horizontal => self.config.horizontal_timing,
        }
    }

    /// One pass of step, stabilize, trigger, await for frame `index`.
    ///
    /// Returns `false` when the projector could not advance and the loop
    /// has to stop.
    fn capture_frame(&mut self, index: usize, report: &mut ScanReport) -> bool {
        self.transition(AcquisitionState::Stepping(index));
        if let Err(e) = self.projector.step() {
            log::error!("Projector step {} failed: {}, ending capture", index, e);
            report.step_failure = Some(index);
            return false;
        }

        self.transition(AcquisitionState::Stabilizing(index));
        let wait = stabilization_wait(
            &self.pattern_timing(index),
            self.config.timing.stabilization_margin_ms,
        );
        report.stabilization_waits.push(wait);
        thread::sleep(wait);

        self.transition(AcquisitionState::Triggering(index));
        if let Some(events) = &self.events {
            let stale = events.try_iter().count();
            if stale > 0 {
                log::debug!("Dropped {} stale frame events before frame {}", stale, index);
            }
        }

        let command = self
            .capability
            .map_or(TriggerCommand::TriggerSoftware, |c| c.command);
        if let Err(e) = self.camera.execute(command.node()) {
            let err = ScanError::transient(command.node(), e);
            log::warn!("{}, skipping frame {}", err, index);
            report.trigger_failures.push(index);
            return true;
        }
        report.triggers_sent += 1;

        self.transition(AcquisitionState::AwaitingExposure(index));
        let exposure = match self.camera.float_range("ExposureTime") {
            Ok(range) => Some(range.current),
            Err(e) => {
                log::warn!("Could not read ExposureTime: {}", e);
                None
            }
        };
        let timeout = exposure_wait(exposure, &self.config.timing);

        let Some(events) = &self.events else {
            return true;
        };
        match events.recv_timeout(timeout) {
            Ok(event) => {
                let latest = self.sink.as_ref().and_then(|sink| sink.take_latest());
                match latest {
                    Some(frame) => log::debug!(
                        "Frame {} completed ({:?}, {}x{} {:?})",
                        event.index,
                        event.outcome,
                        frame.width,
                        frame.height,
                        frame.orientation
                    ),
                    None => log::debug!("Frame {} completed: {:?}", event.index, event.outcome),
                }
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                log::warn!("No frame for trigger {} within {:?}", index, timeout);
                report.frame_timeouts.push(index);
            }
        }
        true
    }

    /// Release whatever the session acquired, in reverse order.
    ///
    /// Safe to call any number of times.
    pub fn teardown(&mut self) {
        if self.state == AcquisitionState::Teardown {
            return;
        }

        if self.projecting {
            if let Err(e) = self.projector.stop() {
                log::warn!("Failed to stop projection: {}", e);
            }
            self.projecting = false;
        }
        if self.grabbing {
            if let Err(e) = self.camera.stop_grabbing() {
                log::warn!("Failed to stop grabbing: {}", e);
            }
            self.grabbing = false;
        }
        if self.camera_open {
            self.camera.close();
            self.camera_open = false;
        }
        if self.projector_connected {
            self.projector.disconnect();
            self.projector_connected = false;
        }

        self.transition(AcquisitionState::Teardown);
    }
}

impl<P: Projector, C: Camera> Drop for AcquisitionCoordinator<P, C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Run a complete scan; `true` when the session finished without a fatal error.
///
/// Missing frames do not make the result false; they are logged in the
/// session summary.
pub fn run_scan<P: Projector, C: Camera>(config: ScanConfig, projector: P, camera: C) -> bool {
    let mut coordinator = match AcquisitionCoordinator::new(config, projector, camera) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            log::error!("Scan setup failed: {}", e);
            return false;
        }
    };
    coordinator.run().is_ok()
}
