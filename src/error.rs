//! Error types for the scalelink library.

use thiserror::Error;

use crate::types::Status;

/// The main error type for scalelink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The host offers no device-access capability.
    #[error("device access is not supported on this host")]
    Unsupported,

    /// The operator cancelled the selection or no device matched the filters.
    #[error("no device selected")]
    NoDeviceSelected,

    /// The device rejected the open call.
    #[error("failed to open device: {reason}")]
    OpenFailed { reason: String },

    /// The device rejected the close call.
    #[error("failed to close device: {reason}")]
    CloseFailed { reason: String },

    /// The open device stopped delivering frames, e.g. it was unplugged.
    #[error("device stopped streaming")]
    DeviceLost,

    /// A lock was requested before any reading arrived.
    #[error("no weight reading available to lock")]
    LockUnavailable,

    /// Operation is not allowed in the current controller state.
    #[error("cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: Status,
    },

    /// Configuration value out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoDeviceSelected
                | Self::OpenFailed { .. }
                | Self::DeviceLost
                | Self::Serial(_)
                | Self::Io(_)
        )
    }
}

/// Result type alias for scalelink operations.
pub type Result<T> = std::result::Result<T, Error>;
