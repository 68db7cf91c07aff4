//! Acquisition session states.

use std::fmt;

/// Where a session is in the capture protocol.
///
/// Indexed states carry the 1-based frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    /// Devices open and configured, camera grabbing.
    DeviceReady,
    /// Pattern sets uploaded to the projector.
    PatternsLoaded,
    /// Projection started in stepping mode.
    Projecting,
    Stepping(usize),
    Stabilizing(usize),
    Triggering(usize),
    AwaitingExposure(usize),
    Completed,
    Teardown,
}

impl AcquisitionState {
    /// Frame number for the per-frame states.
    pub fn frame(&self) -> Option<usize> {
        match self {
            AcquisitionState::Stepping(i)
            | AcquisitionState::Stabilizing(i)
            | AcquisitionState::Triggering(i)
            | AcquisitionState::AwaitingExposure(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "Idle"),
            AcquisitionState::DeviceReady => write!(f, "Device ready"),
            AcquisitionState::PatternsLoaded => write!(f, "Patterns loaded"),
            AcquisitionState::Projecting => write!(f, "Projecting"),
            AcquisitionState::Stepping(i) => write!(f, "Stepping to pattern {}", i),
            AcquisitionState::Stabilizing(i) => write!(f, "Stabilizing pattern {}", i),
            AcquisitionState::Triggering(i) => write!(f, "Triggering frame {}", i),
            AcquisitionState::AwaitingExposure(i) => write!(f, "Awaiting frame {}", i),
            AcquisitionState::Completed => write!(f, "Completed"),
            AcquisitionState::Teardown => write!(f, "Teardown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_frame() {
        assert_eq!(AcquisitionState::Triggering(3).to_string(), "Triggering frame 3");
        assert_eq!(AcquisitionState::AwaitingExposure(2).frame(), Some(2));
        assert_eq!(AcquisitionState::Completed.frame(), None);
    }
}
