//! Externally visible telemetry state.

use std::fmt;

use crate::types::DeviceIdentity;

/// Coarse controller status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No device session.
    Idle,
    /// A device is being requested and opened.
    Connecting,
    /// A device session is open and streaming.
    Connected,
    /// The last connection attempt failed.
    Error,
}

impl Status {
    /// Returns the lowercase status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state with the data that is only meaningful in each state.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    /// No device session.
    Idle,
    /// Waiting for the host to select and open a device.
    Connecting,
    /// Streaming from an open device.
    Connected {
        /// The open device.
        device: DeviceIdentity,
        /// Most recent decoded weight in kilograms.
        live_weight_kg: Option<f64>,
    },
    /// The last connection attempt failed.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl Link {
    /// Returns the status tag for this link state.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Idle => Status::Idle,
            Self::Connecting => Status::Connecting,
            Self::Connected { .. } => Status::Connected,
            Self::Error { .. } => Status::Error,
        }
    }
}

/// Point-in-time snapshot of a scale controller.
///
/// Every observable change publishes a fresh snapshot, so a value obtained
/// from [`crate::ScaleController::state`] never changes underneath the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryState {
    supported: bool,
    link: Link,
    locked_weight_kg: Option<f64>,
    last_raw_text: Option<String>,
    // Non-fatal message (e.g. a failed lock) shown while not in `Link::Error`.
    notice: Option<String>,
}

impl TelemetryState {
    /// Creates an idle state.
    #[must_use]
    pub const fn new(supported: bool) -> Self {
        Self {
            supported,
            link: Link::Idle,
            locked_weight_kg: None,
            last_raw_text: None,
            notice: None,
        }
    }

    /// Returns the status tag.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.link.status()
    }

    /// Returns the connection state.
    #[must_use]
    pub const fn link(&self) -> &Link {
        &self.link
    }

    /// Returns true if the host offers device access.
    #[must_use]
    pub const fn supported(&self) -> bool {
        self.supported
    }

    /// Returns the message to display, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.link {
            Link::Error { message } => Some(message),
            _ => self.notice.as_deref(),
        }
    }

    /// Returns the open device, if connected.
    #[must_use]
    pub const fn device(&self) -> Option<&DeviceIdentity> {
        match &self.link {
            Link::Connected { device, .. } => Some(device),
            _ => None,
        }
    }

    /// Returns the live weight, if connected and a reading has arrived.
    #[must_use]
    pub const fn live_weight_kg(&self) -> Option<f64> {
        match self.link {
            Link::Connected { live_weight_kg, .. } => live_weight_kg,
            _ => None,
        }
    }

    /// Returns the locked weight.
    #[must_use]
    pub const fn locked_weight_kg(&self) -> Option<f64> {
        self.locked_weight_kg
    }

    /// Returns the text of the last non-empty frame.
    #[must_use]
    pub fn last_raw_text(&self) -> Option<&str> {
        self.last_raw_text.as_deref()
    }

    pub(crate) fn set_link(&mut self, link: Link) {
        self.link = link;
    }

    pub(crate) fn set_supported(&mut self, supported: bool) {
        self.supported = supported;
    }

    pub(crate) fn set_locked(&mut self, weight_kg: Option<f64>) {
        self.locked_weight_kg = weight_kg;
    }

    pub(crate) fn set_raw_text(&mut self, text: String) {
        self.last_raw_text = Some(text);
    }

    pub(crate) fn set_notice(&mut self, notice: Option<String>) {
        self.notice = notice;
    }

    /// Records a reading on the connected link. Returns false if not connected.
    pub(crate) fn set_live(&mut self, weight_kg: f64) -> bool {
        if let Link::Connected { live_weight_kg, .. } = &mut self.link {
            *live_weight_kg = Some(weight_kg);
            true
        } else {
            false
        }
    }
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self::new(true)
    }
}
