//! Serial/USB transport implementation.
//!
//! Most bench and shipping scales expose a USB CDC or USB-serial bridge
//! and print one ASCII reading per line. This backend enumerates serial
//! ports, opens the selected one and forwards each line as a frame.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType};

use crate::error::{Error, Result};
use crate::protocol::{DEFAULT_MAX_LINE, LineDecoder};
use crate::transport::{DeviceAccess, DeviceHandle};
use crate::types::{DeviceFilter, DeviceIdentity};

/// Default baud rate for scale serial output.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Shared slot holding the current frame subscriber.
type SubscriberSlot = Arc<Mutex<Option<mpsc::Sender<Bytes>>>>;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Fixed port path; when unset, ports are enumerated.
    pub port: Option<String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// Longest line accepted before a forced flush.
    pub max_line: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            max_line: DEFAULT_MAX_LINE,
        }
    }
}

impl SerialConfig {
    /// Creates a configuration that enumerates ports.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the transport to one port path (e.g. "/dev/ttyUSB0" or "COM3").
    #[must_use]
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the maximum line length.
    #[must_use]
    pub const fn max_line(mut self, len: usize) -> Self {
        self.max_line = len;
        self
    }
}

/// Builds a device identity from enumerated port info.
fn identity_from_port(info: &SerialPortInfo) -> DeviceIdentity {
    let mut identity = DeviceIdentity::new(&info.port_name);
    if let SerialPortType::UsbPort(usb) = &info.port_type {
        identity = identity.usb_ids(usb.vid, usb.pid);
        identity.product_name.clone_from(&usb.product);
    }
    identity
}

/// Serial host access.
#[derive(Debug, Clone, Default)]
pub struct SerialAccess {
    config: SerialConfig,
}

impl SerialAccess {
    /// Creates serial access with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    /// Lists port identities matching the filters.
    ///
    /// With no filters every port is listed; otherwise only USB ports
    /// whose IDs match.
    pub fn list(&self, filters: &[DeviceFilter]) -> Result<Vec<DeviceIdentity>> {
        let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
        let mut found: Vec<DeviceIdentity> = ports
            .iter()
            .map(identity_from_port)
            .filter(|id| DeviceFilter::any_matches(filters, id))
            .collect();

        if let Some(path) = &self.config.port {
            found.retain(|id| &id.path == path);
            if found.is_empty() && filters.is_empty() {
                found.push(DeviceIdentity::new(path));
            }
        }
        Ok(found)
    }
}

impl DeviceAccess for SerialAccess {
    fn is_supported(&self) -> bool {
        self.config.port.is_some() || tokio_serial::available_ports().is_ok()
    }

    fn request_device<'a>(
        &'a self,
        filters: &'a [DeviceFilter],
    ) -> BoxFuture<'a, Result<Vec<Box<dyn DeviceHandle>>>> {
        Box::pin(async move {
            let identities = self.list(filters)?;
            tracing::debug!("{} serial port(s) matched", identities.len());
            Ok(identities
                .into_iter()
                .map(|id| Box::new(SerialDevice::new(id, &self.config)) as Box<dyn DeviceHandle>)
                .collect())
        })
    }
}

/// Serial port handle.
///
/// The port itself lives inside a background read task; closing aborts
/// the task, which drops the port.
pub struct SerialDevice {
    identity: DeviceIdentity,
    baud_rate: u32,
    max_line: usize,
    subscriber: SubscriberSlot,
    read_task: Option<JoinHandle<()>>,
}

impl SerialDevice {
    /// Creates a handle for the given port.
    #[must_use]
    pub fn new(identity: DeviceIdentity, config: &SerialConfig) -> Self {
        Self {
            identity,
            baud_rate: config.baud_rate,
            max_line: config.max_line,
            subscriber: Arc::new(Mutex::new(None)),
            read_task: None,
        }
    }

    /// Reads from `reader` until EOF or error, forwarding each line to
    /// the current subscriber.
    ///
    /// Lines arriving while nobody is subscribed are dropped. When the
    /// loop ends the subscriber is released, which ends its frame stream.
    pub async fn run_read_loop<R: AsyncRead + Unpin>(
        reader: R,
        decoder: LineDecoder,
        subscriber: SubscriberSlot,
    ) -> Result<()> {
        let result = Self::forward_lines(reader, decoder, &subscriber).await;
        subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        result
    }

    async fn forward_lines<R: AsyncRead + Unpin>(
        mut reader: R,
        mut decoder: LineDecoder,
        subscriber: &SubscriberSlot,
    ) -> Result<()> {
        let mut buf = [0u8; 256];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("serial port closed");
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "serial port closed",
                    )));
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("serial read error: {}", e);
                    return Err(Error::Io(e));
                }
            };

            tracing::trace!("received {} bytes", n);
            decoder.feed(&buf[..n]);

            while let Some(line) = decoder.next_line() {
                let tx = subscriber
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match tx {
                    Some(tx) => {
                        if tx.send(line).await.is_err() {
                            tracing::trace!("subscriber dropped, discarding line");
                        }
                    }
                    None => tracing::trace!("no subscriber, discarding line"),
                }
            }
        }
    }
}

impl DeviceHandle for SerialDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn is_opened(&self) -> bool {
        self.read_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.is_opened() {
                return Ok(());
            }

            tracing::info!("opening serial port: {}", self.identity.path);

            let stream = tokio_serial::new(&self.identity.path, self.baud_rate)
                .open_native_async()
                .map_err(|e| Error::OpenFailed {
                    reason: e.to_string(),
                })?;

            let decoder = LineDecoder::new(self.max_line);
            let subscriber = Arc::clone(&self.subscriber);
            self.read_task = Some(tokio::spawn(async move {
                if let Err(e) = Self::run_read_loop(stream, decoder, subscriber).await {
                    tracing::warn!("serial read loop ended: {}", e);
                }
            }));

            tracing::info!("opened serial port");
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(task) = self.read_task.take() {
                tracing::info!("closing serial port: {}", self.identity.path);
                task.abort();
                if let Err(e) = task.await {
                    if e.is_panic() {
                        return Err(Error::CloseFailed {
                            reason: format!("read loop panicked: {e}"),
                        });
                    }
                }
            }
            Ok(())
        })
    }

    fn subscribe(&mut self, frames: mpsc::Sender<Bytes>) {
        *self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(frames);
    }

    fn unsubscribe(&mut self) {
        *self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new();
        assert_eq!(config.port, None);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.max_line, DEFAULT_MAX_LINE);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new()
            .port("/dev/ttyUSB0")
            .baud_rate(115_200)
            .max_line(64);
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.max_line, 64);
    }

    #[tokio::test]
    async fn test_read_loop_forwards_lines() {
        let (mut device, host) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);
        let slot: SubscriberSlot = Arc::new(Mutex::new(Some(tx)));

        let task = tokio::spawn(SerialDevice::run_read_loop(
            host,
            LineDecoder::default(),
            slot,
        ));

        device.write_all(b"ST,GS,+  2.350kg\r\nW=12").await.unwrap();
        device.write_all(b"00g\r\n").await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Bytes::from_static(b"ST,GS,+  2.350kg"))
        );
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"W=1200g")));

        drop(device);
        assert!(matches!(task.await.unwrap(), Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_read_loop_end_releases_subscriber() {
        let (device, host) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);
        let slot: SubscriberSlot = Arc::new(Mutex::new(Some(tx)));

        let task = tokio::spawn(SerialDevice::run_read_loop(
            host,
            LineDecoder::default(),
            Arc::clone(&slot),
        ));

        drop(device);
        assert!(task.await.unwrap().is_err());
        assert!(slot.lock().unwrap().is_none());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_read_loop_drops_lines_without_subscriber() {
        let (mut device, host) = tokio::io::duplex(64);
        let slot: SubscriberSlot = Arc::new(Mutex::new(None));
        let task = tokio::spawn(SerialDevice::run_read_loop(
            host,
            LineDecoder::default(),
            Arc::clone(&slot),
        ));

        device.write_all(b"1.000kg\n").await.unwrap();
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let (tx, mut rx) = mpsc::channel(8);
        *slot.lock().unwrap() = Some(tx);
        device.write_all(b"1.001kg\n").await.unwrap();

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"1.001kg")));
        task.abort();
    }

    #[tokio::test]
    async fn test_close_without_open_is_noop() {
        let mut device =
            SerialDevice::new(DeviceIdentity::new("/dev/null"), &SerialConfig::new());
        assert!(!device.is_opened());
        device.close().await.unwrap();
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        // Just verify it doesn't panic
        let _ = SerialAccess::default().list(&[]);
    }
}
