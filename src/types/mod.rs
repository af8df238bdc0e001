//! Data types for scale telemetry.
//!
//! - Device identity and selection filters
//! - The externally visible telemetry state

pub mod device;
pub mod state;

pub use device::{DeviceFilter, DeviceIdentity};
pub use state::{Link, Status, TelemetryState};
