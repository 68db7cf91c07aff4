//! Wait estimates for the stepping loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ScanError, ScanResult};
use crate::pattern::PatternTiming;

/// Smallest stabilization margin accepted.
pub const MIN_STABILIZATION_MARGIN_MS: u64 = 10;
/// Smallest buffer added to the exposure when waiting for a frame.
pub const MIN_EXPOSURE_BUFFER_MS: u64 = 500;
/// Largest accepted frame wait.
pub const MAX_EXPOSURE_WAIT_CAP_MS: u64 = 5000;

/// Delays used by the acquisition loop, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionTiming {
    /// Settle time after projection starts.
    pub startup_delay_ms: u64,
    /// Added to the pattern window before triggering.
    pub stabilization_margin_ms: u64,
    /// Added to the exposure when waiting for a frame.
    pub exposure_buffer_ms: u64,
    /// Upper bound on the frame wait.
    pub exposure_wait_cap_ms: u64,
    /// Frame wait used when the exposure cannot be read.
    pub default_exposure_wait_ms: u64,
}

impl Default for AcquisitionTiming {
    fn default() -> Self {
        Self {
            startup_delay_ms: 200,
            stabilization_margin_ms: 10,
            exposure_buffer_ms: 500,
            exposure_wait_cap_ms: 5000,
            default_exposure_wait_ms: 1000,
        }
    }
}

impl AcquisitionTiming {
    pub fn validate(&self) -> ScanResult<()> {
        if self.stabilization_margin_ms < MIN_STABILIZATION_MARGIN_MS {
            return Err(ScanError::Validation(format!(
                "stabilization margin must be at least {} ms, got {}",
                MIN_STABILIZATION_MARGIN_MS, self.stabilization_margin_ms
            )));
        }
        if self.exposure_buffer_ms < MIN_EXPOSURE_BUFFER_MS {
            return Err(ScanError::Validation(format!(
                "exposure buffer must be at least {} ms, got {}",
                MIN_EXPOSURE_BUFFER_MS, self.exposure_buffer_ms
            )));
        }
        if self.exposure_wait_cap_ms == 0 || self.exposure_wait_cap_ms > MAX_EXPOSURE_WAIT_CAP_MS {
            return Err(ScanError::Validation(format!(
                "exposure wait cap must be in 1..={} ms, got {}",
                MAX_EXPOSURE_WAIT_CAP_MS, self.exposure_wait_cap_ms
            )));
        }
        Ok(())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

/// Time to let the projector settle on a new pattern before triggering.
///
/// `max(window_ms, 1) + margin`, where the window is the pattern's
/// pre-exposure, exposure and post-exposure time.
pub fn stabilization_wait(pattern: &PatternTiming, margin_ms: u64) -> Duration {
    let window_ms = (pattern.window_us() / 1000).max(1);
    Duration::from_millis(window_ms + margin_ms)
}

/// How long to wait for the frame of one trigger.
///
/// `exposure_us` is the live `ExposureTime` reading; `None` means it could
/// not be read.
pub fn exposure_wait(exposure_us: Option<f64>, timing: &AcquisitionTiming) -> Duration {
    let ms = match exposure_us {
        Some(us) if us.is_finite() && us >= 0.0 => {
            let exposure_ms = (us / 1000.0).ceil() as u64;
            (exposure_ms + timing.exposure_buffer_ms).min(timing.exposure_wait_cap_ms)
        }
        _ => timing.default_exposure_wait_ms,
    };
    Duration::from_millis(ms)
}
