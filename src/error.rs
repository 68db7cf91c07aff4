//! Error taxonomy for a scan session.

use thiserror::Error;

use crate::device::DeviceError;

/// Errors raised while preparing or running a scan.
///
/// `Configuration` and `Validation` abort the session (after teardown).
/// `TransientDevice` and `Io` are logged and counted while the loop continues.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transient device error: {0}")]
    TransientDevice(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ScanError {
    /// Wrap a collaborator failure that leaves the session unusable.
    pub fn configuration(context: &str, err: DeviceError) -> Self {
        ScanError::Configuration(format!("{}: {}", context, err))
    }

    /// Wrap a collaborator failure the session can ride through.
    pub fn transient(context: &str, err: DeviceError) -> Self {
        ScanError::TransientDevice(format!("{}: {}", context, err))
    }

    /// Whether this error aborts the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Configuration(_) | ScanError::Validation(_))
    }
}

/// Result type for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ScanError::Configuration("open".into()).is_fatal());
        assert!(ScanError::Validation("steps".into()).is_fatal());
        assert!(!ScanError::TransientDevice("gain".into()).is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(!ScanError::from(io).is_fatal());
    }

    #[test]
    fn test_device_error_context() {
        let err = ScanError::configuration(
            "PixelFormat",
            DeviceError::Rejected {
                node: "PixelFormat".into(),
                code: 0x8000_0106,
            },
        );
        let text = err.to_string();
        assert!(text.starts_with("Configuration error: PixelFormat"));
        assert!(text.contains("0x80000106"));
    }
}
