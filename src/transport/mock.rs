//! Mock device access for testing and development.
//!
//! [`MockDevice`] is cheaply cloneable; every clone shares the same
//! counters and subscriber slot, so a test can keep one clone to inject
//! frames and inspect calls while the session owns another.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{DeviceAccess, DeviceHandle};
use crate::types::{DeviceFilter, DeviceIdentity};

/// Mock host with a fixed set of devices.
///
/// # Examples
///
/// ```
/// use scalelink::transport::{MockAccess, MockDevice};
/// use scalelink::types::DeviceIdentity;
///
/// let scale = MockDevice::new(DeviceIdentity::new("mock0"));
/// let access = MockAccess::new().with_device(scale.clone());
/// assert_eq!(scale.open_calls(), 0);
/// # drop(access);
/// ```
#[derive(Debug, Clone)]
pub struct MockAccess {
    supported: bool,
    devices: Vec<MockDevice>,
    request_calls: Arc<AtomicUsize>,
}

impl Default for MockAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAccess {
    /// Creates a supported host with no devices.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supported: true,
            devices: Vec::new(),
            request_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a host without device access.
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Adds a device to the selection list.
    #[must_use]
    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Returns how many times a device was requested.
    #[must_use]
    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }
}

impl DeviceAccess for MockAccess {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn request_device<'a>(
        &'a self,
        filters: &'a [DeviceFilter],
    ) -> BoxFuture<'a, Result<Vec<Box<dyn DeviceHandle>>>> {
        Box::pin(async move {
            self.request_calls.fetch_add(1, Ordering::SeqCst);
            if !self.supported {
                return Err(Error::Unsupported);
            }
            Ok(self
                .devices
                .iter()
                .filter(|d| DeviceFilter::any_matches(filters, &d.identity))
                .map(|d| Box::new(d.clone()) as Box<dyn DeviceHandle>)
                .collect())
        })
    }
}

#[derive(Debug, Default)]
struct MockShared {
    opened: AtomicBool,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    open_error: Mutex<Option<String>>,
    close_error: Mutex<Option<String>>,
    open_delay: Mutex<Option<Duration>>,
    subscriber: Mutex<Option<mpsc::Sender<Bytes>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock device that records calls and emits frames on demand.
#[derive(Debug, Clone)]
pub struct MockDevice {
    identity: DeviceIdentity,
    shared: Arc<MockShared>,
}

impl MockDevice {
    /// Creates a mock device.
    #[must_use]
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            shared: Arc::new(MockShared::default()),
        }
    }

    /// Makes subsequent opens fail with `reason`.
    pub fn fail_open(&self, reason: impl Into<String>) {
        *lock(&self.shared.open_error) = Some(reason.into());
    }

    /// Makes subsequent closes fail with `reason`.
    pub fn fail_close(&self, reason: impl Into<String>) {
        *lock(&self.shared.close_error) = Some(reason.into());
    }

    /// Makes open and close succeed again.
    pub fn clear_failures(&self) {
        *lock(&self.shared.open_error) = None;
        *lock(&self.shared.close_error) = None;
    }

    /// Delays every open by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        *lock(&self.shared.open_delay) = Some(delay);
    }

    /// Simulates a cable pull: the device reports closed and its frame
    /// stream ends.
    pub fn unplug(&self) {
        self.shared.opened.store(false, Ordering::SeqCst);
        *lock(&self.shared.subscriber) = None;
    }

    /// Sends a frame to the current subscriber.
    ///
    /// Returns false if nobody is subscribed or the receiver is gone.
    pub async fn emit(&self, frame: impl Into<Bytes>) -> bool {
        let tx = lock(&self.shared.subscriber).clone();
        match tx {
            Some(tx) => tx.send(frame.into()).await.is_ok(),
            None => false,
        }
    }

    /// Returns the number of open calls.
    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.shared.open_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of close calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of subscribe calls.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.shared.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Returns true if a subscriber is registered.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.subscriber).is_some()
    }
}

impl DeviceHandle for MockDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn is_opened(&self) -> bool {
        self.shared.opened.load(Ordering::SeqCst)
    }

    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.shared.open_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.shared.open_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let failure = lock(&self.shared.open_error).clone();
            if let Some(reason) = failure {
                return Err(Error::OpenFailed { reason });
            }
            self.shared.opened.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
            self.shared.opened.store(false, Ordering::SeqCst);
            let failure = lock(&self.shared.close_error).clone();
            match failure {
                Some(reason) => Err(Error::CloseFailed { reason }),
                None => Ok(()),
            }
        })
    }

    fn subscribe(&mut self, frames: mpsc::Sender<Bytes>) {
        self.shared.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.subscriber) = Some(frames);
    }

    fn unsubscribe(&mut self) {
        *lock(&self.shared.subscriber) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_filters_devices() {
        let a = MockDevice::new(DeviceIdentity::new("a").usb_ids(1, 1));
        let b = MockDevice::new(DeviceIdentity::new("b").usb_ids(2, 2));
        let access = MockAccess::new().with_device(a).with_device(b);

        let all = access.request_device(&[]).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_b = access
            .request_device(&[DeviceFilter::vendor(2)])
            .await
            .unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].identity().path, "b");
        assert_eq!(access.request_calls(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_host() {
        let access = MockAccess::unsupported();
        assert!(!access.is_supported());
        assert!(matches!(
            access.request_device(&[]).await,
            Err(Error::Unsupported)
        ));
    }

    #[tokio::test]
    async fn test_subscriber_slot_is_single() {
        let device = MockDevice::new(DeviceIdentity::new("m"));
        let mut handle = device.clone();

        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        handle.subscribe(tx1);
        handle.subscribe(tx2);

        assert!(device.emit(&b"1.0kg"[..]).await);
        assert_eq!(rx2.recv().await, Some(Bytes::from_static(b"1.0kg")));
        assert!(rx1.try_recv().is_err());

        handle.unsubscribe();
        assert!(!device.is_subscribed());
        assert!(!device.emit(&b"2.0kg"[..]).await);
        assert_eq!(device.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn test_open_close_counters() {
        let device = MockDevice::new(DeviceIdentity::new("m"));
        let mut handle = device.clone();

        handle.open().await.unwrap();
        assert!(device.is_opened());
        handle.close().await.unwrap();
        assert!(!device.is_opened());
        assert_eq!((device.open_calls(), device.close_calls()), (1, 1));

        device.fail_open("busy");
        assert!(matches!(
            handle.open().await,
            Err(Error::OpenFailed { reason }) if reason == "busy"
        ));
    }

    #[tokio::test]
    async fn test_unplug_ends_stream() {
        let device = MockDevice::new(DeviceIdentity::new("m"));
        let mut handle = device.clone();
        handle.open().await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        handle.subscribe(tx);
        device.unplug();

        assert!(!device.is_opened());
        assert_eq!(rx.recv().await, None);
        assert!(!device.emit(&b"1.0kg"[..]).await);
    }
}
