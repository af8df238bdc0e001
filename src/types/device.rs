//! Device identity types.

use std::fmt;

/// Descriptive metadata for one physical device.
///
/// The `path` is an opaque host identifier (a serial port path, a HID
/// path, or a test label). The remaining fields are whatever the host
/// reported and may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Host-specific device path.
    pub path: String,
    /// Product string reported by the device.
    pub product_name: Option<String>,
    /// USB vendor ID.
    pub vendor_id: Option<u16>,
    /// USB product ID.
    pub product_id: Option<u16>,
}

impl DeviceIdentity {
    /// Creates an identity with only a path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the product name.
    #[must_use]
    pub fn product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = Some(name.into());
        self
    }

    /// Sets the USB vendor and product IDs.
    #[must_use]
    pub const fn usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self.product_id = Some(product_id);
        self
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.product_name.as_deref().unwrap_or(&self.path))?;
        if let (Some(vid), Some(pid)) = (self.vendor_id, self.product_id) {
            write!(f, " [{vid:04x}:{pid:04x}]")?;
        }
        Ok(())
    }
}

/// Filter applied when requesting a device.
///
/// A filter with no fields set matches every device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Required USB vendor ID.
    pub vendor_id: Option<u16>,
    /// Required USB product ID.
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Creates a filter matching a vendor.
    #[must_use]
    pub const fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: None,
        }
    }

    /// Creates a filter matching an exact vendor/product pair.
    #[must_use]
    pub const fn usb(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
        }
    }

    /// Checks if a device matches this filter.
    #[must_use]
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        let field_ok = |want: Option<u16>, have: Option<u16>| want.is_none() || want == have;
        field_ok(self.vendor_id, identity.vendor_id) && field_ok(self.product_id, identity.product_id)
    }

    /// Checks a device against a filter list. An empty list matches anything.
    #[must_use]
    pub fn any_matches(filters: &[Self], identity: &DeviceIdentity) -> bool {
        filters.is_empty() || filters.iter().any(|f| f.matches(identity))
    }
}
