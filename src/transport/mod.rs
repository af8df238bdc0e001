//! Host device-access layer.
//!
//! The session never touches platform APIs directly. It talks to a
//! [`DeviceAccess`] implementation that enumerates devices and hands out
//! [`DeviceHandle`]s. Two implementations ship with the crate:
//!
//! - [`serial`] - USB/serial scales through `tokio-serial`
//! - [`mock`] - a programmable fake for tests and demos

pub mod mock;
pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{DeviceFilter, DeviceIdentity};

/// Capability surface offered by the host for finding devices.
pub trait DeviceAccess: Send + Sync {
    /// Returns true if the host can access devices at all.
    fn is_supported(&self) -> bool;

    /// Requests devices matching any of the filters.
    ///
    /// An empty list means the operator cancelled or nothing matched.
    fn request_device<'a>(
        &'a self,
        filters: &'a [DeviceFilter],
    ) -> BoxFuture<'a, Result<Vec<Box<dyn DeviceHandle>>>>;
}

/// One physical device.
///
/// Frames are delivered to at most one subscriber. Subscribing again
/// replaces the previous subscriber.
pub trait DeviceHandle: Send {
    /// Returns the device metadata.
    fn identity(&self) -> &DeviceIdentity;

    /// Returns true if the device is open.
    fn is_opened(&self) -> bool;

    /// Opens the device.
    fn open(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Closes the device.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Routes incoming frames to `frames`, replacing any prior subscriber.
    fn subscribe(&mut self, frames: mpsc::Sender<Bytes>);

    /// Stops frame delivery.
    fn unsubscribe(&mut self);
}

pub use mock::{MockAccess, MockDevice};
pub use serial::{SerialAccess, SerialConfig, SerialDevice};
