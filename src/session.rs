//! Device session lifecycle.
//!
//! A [`DeviceSession`] is the only owner of an open [`DeviceHandle`]. It
//! requests and opens a device, pumps its frames into a single callback,
//! and tears everything down exactly once:
//!
//! 1. stop the frame pump and unsubscribe from the device
//! 2. close the handle
//!
//! Dropping a session with an open device performs the same teardown on
//! the current Tokio runtime.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_FRAME_QUEUE;
use crate::error::{Error, Result};
use crate::transport::{DeviceAccess, DeviceHandle};
use crate::types::{DeviceFilter, DeviceIdentity, Status};

/// State held only while a device is open.
struct OpenDevice {
    handle: Box<dyn DeviceHandle>,
    identity: DeviceIdentity,
    pump: Option<JoinHandle<()>>,
}

impl OpenDevice {
    /// Stops frame delivery. No frame reaches the callback afterwards.
    async fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            if let Err(e) = pump.await {
                if e.is_panic() {
                    tracing::warn!("frame pump panicked: {}", e);
                }
            }
        }
        self.handle.unsubscribe();
    }

    async fn close(mut self) -> Result<()> {
        self.stop_pump().await;
        if !self.handle.is_opened() {
            return Ok(());
        }
        self.handle.close().await.map_err(|e| match e {
            e @ Error::CloseFailed { .. } => e,
            other => Error::CloseFailed {
                reason: other.to_string(),
            },
        })
    }
}

/// Session with at most one open device.
pub struct DeviceSession<A> {
    access: A,
    filters: Vec<DeviceFilter>,
    frame_queue: usize,
    open: Option<OpenDevice>,
}

impl<A: DeviceAccess> DeviceSession<A> {
    /// Creates an idle session over the given host access.
    #[must_use]
    pub const fn new(access: A) -> Self {
        Self {
            access,
            filters: Vec::new(),
            frame_queue: DEFAULT_FRAME_QUEUE,
            open: None,
        }
    }

    /// Sets the device selection filters.
    #[must_use]
    pub fn with_filters(mut self, filters: Vec<DeviceFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the frame channel depth.
    #[must_use]
    pub fn with_frame_queue(mut self, depth: usize) -> Self {
        self.frame_queue = depth.max(1);
        self
    }

    /// Returns true if the host offers device access.
    pub fn is_supported(&self) -> bool {
        self.access.is_supported()
    }

    /// Returns true if a device is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Returns the open device's identity.
    #[must_use]
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.open.as_ref().map(|open| &open.identity)
    }

    /// Returns the host access.
    pub const fn access(&self) -> &A {
        &self.access
    }

    /// Requests and opens a device.
    ///
    /// The first device offered by the host is used. On any failure the
    /// session stays closed.
    pub async fn open(&mut self) -> Result<DeviceIdentity> {
        if self.open.is_some() {
            return Err(Error::InvalidState {
                operation: "open",
                status: Status::Connected,
            });
        }
        if !self.access.is_supported() {
            return Err(Error::Unsupported);
        }

        let mut devices = self
            .access
            .request_device(&self.filters)
            .await
            .map_err(|e| match e {
                Error::Unsupported | Error::NoDeviceSelected | Error::OpenFailed { .. } => e,
                other => Error::OpenFailed {
                    reason: other.to_string(),
                },
            })?;
        if devices.is_empty() {
            return Err(Error::NoDeviceSelected);
        }

        let mut handle = devices.swap_remove(0);
        tracing::debug!("opening device {}", handle.identity());
        handle.open().await.map_err(|e| match e {
            e @ Error::OpenFailed { .. } => e,
            other => Error::OpenFailed {
                reason: other.to_string(),
            },
        })?;

        let identity = handle.identity().clone();
        self.open = Some(OpenDevice {
            handle,
            identity: identity.clone(),
            pump: None,
        });
        tracing::debug!("device {} open", identity);
        Ok(identity)
    }

    /// Routes every incoming frame to `callback`.
    ///
    /// Only one callback is active at a time: calling this again stops the
    /// previous pump before subscribing the new one. Frames are delivered
    /// in device order and each callback invocation runs to completion
    /// before the next frame is taken.
    pub async fn on_frame<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.on_frame_with_end(callback, || {}).await
    }

    /// Like [`Self::on_frame`], and calls `on_end` once if the device
    /// stops delivering frames on its own.
    ///
    /// `on_end` does not run when the pump is stopped by [`Self::close`],
    /// by a later `on_frame` call, or by dropping the session.
    pub async fn on_frame_with_end<F, G>(&mut self, mut callback: F, on_end: G) -> Result<()>
    where
        F: FnMut(Bytes) + Send + 'static,
        G: FnOnce() + Send + 'static,
    {
        let frame_queue = self.frame_queue;
        let open = self.open.as_mut().ok_or(Error::InvalidState {
            operation: "subscribe",
            status: Status::Idle,
        })?;

        open.stop_pump().await;

        let (tx, mut rx) = mpsc::channel::<Bytes>(frame_queue);
        open.handle.subscribe(tx);
        open.pump = Some(tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                callback(frame);
            }
            tracing::debug!("device frame stream ended");
            on_end();
        }));
        Ok(())
    }

    /// Closes the open device.
    ///
    /// Closing an idle session succeeds without doing anything. The
    /// session is idle afterwards even if the device reports an error.
    pub async fn close(&mut self) -> Result<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        tracing::debug!("closing device {}", open.identity);
        open.close().await
    }
}

impl<A> Drop for DeviceSession<A> {
    fn drop(&mut self) {
        let Some(mut open) = self.open.take() else {
            return;
        };

        if let Some(pump) = open.pump.take() {
            pump.abort();
        }
        open.handle.unsubscribe();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = open.close().await {
                        tracing::warn!("close on drop failed: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("session dropped outside a runtime, {} left open", open.identity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::transport::{MockAccess, MockDevice};

    fn scale() -> MockDevice {
        MockDevice::new(DeviceIdentity::new("mock0").product_name("Bench Scale"))
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));

        let identity = session.open().await.unwrap();
        assert_eq!(identity.product_name.as_deref(), Some("Bench Scale"));
        assert!(session.is_open());
        assert_eq!(device.open_calls(), 1);

        session.close().await.unwrap();
        assert!(!session.is_open());
        assert_eq!(device.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));

        session.close().await.unwrap();
        session.open().await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(device.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_open_errors() {
        let mut session = DeviceSession::new(MockAccess::unsupported());
        assert!(matches!(session.open().await, Err(Error::Unsupported)));

        let mut session = DeviceSession::new(MockAccess::new());
        assert!(matches!(session.open().await, Err(Error::NoDeviceSelected)));

        let device = scale();
        device.fail_open("permission denied");
        let mut session = DeviceSession::new(MockAccess::new().with_device(device));
        assert!(matches!(
            session.open().await,
            Err(Error::OpenFailed { reason }) if reason == "permission denied"
        ));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_filters_limit_selection() {
        let device = MockDevice::new(DeviceIdentity::new("other").usb_ids(0x1111, 0x0001));
        let mut session = DeviceSession::new(MockAccess::new().with_device(device))
            .with_filters(vec![DeviceFilter::vendor(0x0922)]);
        assert!(matches!(session.open().await, Err(Error::NoDeviceSelected)));
    }

    #[tokio::test]
    async fn test_double_open_rejected() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));
        session.open().await.unwrap();
        assert!(matches!(
            session.open().await,
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(device.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_frames_reach_single_callback() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));
        session.open().await.unwrap();

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&first);
        session
            .on_frame(move |f| sink.lock().unwrap().push(f))
            .await
            .unwrap();
        assert!(device.emit(&b"1.000kg"[..]).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sink = Arc::clone(&second);
        session
            .on_frame(move |f| sink.lock().unwrap().push(f))
            .await
            .unwrap();
        assert!(device.emit(&b"2.000kg"[..]).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*first.lock().unwrap(), vec![Bytes::from_static(b"1.000kg")]);
        assert_eq!(*second.lock().unwrap(), vec![Bytes::from_static(b"2.000kg")]);
        assert_eq!(device.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn test_close_unsubscribes_before_release() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));
        session.open().await.unwrap();
        session.on_frame(|_| {}).await.unwrap();
        assert!(device.is_subscribed());

        session.close().await.unwrap();
        assert!(!device.is_subscribed());
        assert!(!device.emit(&b"1.000kg"[..]).await);
    }

    #[tokio::test]
    async fn test_stream_end_runs_hook_once() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));
        session.open().await.unwrap();

        let ended = Arc::new(Mutex::new(0));
        let hook = Arc::clone(&ended);
        session
            .on_frame_with_end(|_| {}, move || *hook.lock().unwrap() += 1)
            .await
            .unwrap();

        device.unplug();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*ended.lock().unwrap(), 1);

        session.close().await.unwrap();
        assert!(!session.is_open());
        assert_eq!(device.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_does_not_run_end_hook() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));
        session.open().await.unwrap();

        let ended = Arc::new(Mutex::new(0));
        let hook = Arc::clone(&ended);
        session
            .on_frame_with_end(|_| {}, move || *hook.lock().unwrap() += 1)
            .await
            .unwrap();

        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*ended.lock().unwrap(), 0);
        assert_eq!(device.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_on_frame_requires_open() {
        let mut session = DeviceSession::new(MockAccess::new());
        assert!(matches!(
            session.on_frame(|_| {}).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_failure_still_closes() {
        let device = scale();
        device.fail_close("io error");
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));
        session.open().await.unwrap();

        assert!(matches!(
            session.close().await,
            Err(Error::CloseFailed { .. })
        ));
        assert!(!session.is_open());
        session.close().await.unwrap();
        assert_eq!(device.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_once() {
        let device = scale();
        let mut session = DeviceSession::new(MockAccess::new().with_device(device.clone()));
        session.open().await.unwrap();
        session.on_frame(|_| {}).await.unwrap();

        drop(session);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(device.close_calls(), 1);
        assert!(!device.is_subscribed());
    }
}
