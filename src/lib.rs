//! # scalelink
//!
//! A Rust client library for streaming weighing scales.
//!
//! This library opens a scale through a host device-access layer, decodes
//! its telemetry into kilograms, detects when the reading has settled, and
//! lets an operator lock one trustworthy value.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Tolerant decoding of ASCII scale output (`kg` and `g`)
//! - Sliding-window stability detection
//! - Single-owner device sessions that close exactly once
//! - Event-driven notifications and a watchable state snapshot
//!
//! ## Quick Start
//!
//! ```no_run
//! use scalelink::{ScaleConfig, ScaleController, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), scalelink::Error> {
//!     let scale = ScaleController::serial(
//!         SerialConfig::new().port("/dev/ttyUSB0"),
//!         ScaleConfig::default(),
//!     )?;
//!     let device = scale.connect().await?;
//!     println!("Connected to: {device}");
//!
//!     let mut state = scale.watch();
//!     while state.changed().await.is_ok() {
//!         if scale.is_stable() {
//!             break;
//!         }
//!     }
//!
//!     let weight = scale.lock()?;
//!     println!("Locked: {weight:.3} kg");
//!
//!     scale.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Line framing and frame decoding
//! - [`stability`] - Settling detection
//! - [`transport`] - Host device access (serial and mock)
//! - [`session`] - Single-device session lifecycle
//! - [`event`] - Async event system for notifications
//! - [`types`] - Device identity and telemetry state
//! - [`controller`] - High-level [`ScaleController`]

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session;
pub mod stability;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::ScaleConfig;
pub use controller::ScaleController;
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use protocol::{DecodedReading, WeightUnit, decode};
pub use session::DeviceSession;
pub use stability::StabilityDetector;
pub use transport::{DeviceAccess, DeviceHandle, MockAccess, MockDevice, SerialAccess, SerialConfig};
pub use types::{DeviceFilter, DeviceIdentity, Link, Status, TelemetryState};
