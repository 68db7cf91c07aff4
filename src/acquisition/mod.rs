//! Acquisition session: state machine, timing and device coordination.

mod coordinator;
mod state;
mod timing;

pub use coordinator::{run_scan, AcquisitionCoordinator, ScanReport};
pub use state::AcquisitionState;
pub use timing::{
    exposure_wait, stabilization_wait, AcquisitionTiming, MAX_EXPOSURE_WAIT_CAP_MS,
    MIN_EXPOSURE_BUFFER_MS, MIN_STABILIZATION_MARGIN_MS,
};
