//! Controller configuration.

use crate::error::{Error, Result};
use crate::stability::{DEFAULT_TOLERANCE_KG, DEFAULT_WINDOW_SIZE};
use crate::types::DeviceFilter;

/// Default event broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default depth of the frame channel between device and session.
pub const DEFAULT_FRAME_QUEUE: usize = 64;

/// Configuration for a [`crate::ScaleController`].
#[derive(Debug, Clone)]
pub struct ScaleConfig {
    /// Samples that must agree before a reading counts as stable.
    pub window_size: usize,
    /// Allowed spread across the window, in kilograms.
    pub tolerance_kg: f64,
    /// Device selection filters; empty selects any device.
    pub filters: Vec<DeviceFilter>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Depth of the frame channel.
    pub frame_queue: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            tolerance_kg: DEFAULT_TOLERANCE_KG,
            filters: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            frame_queue: DEFAULT_FRAME_QUEUE,
        }
    }
}

impl ScaleConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stability window size.
    #[must_use]
    pub const fn window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    /// Sets the stability tolerance.
    #[must_use]
    pub const fn tolerance_kg(mut self, tolerance: f64) -> Self {
        self.tolerance_kg = tolerance;
        self
    }

    /// Adds a device selection filter.
    #[must_use]
    pub fn filter(mut self, filter: DeviceFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the event broadcast capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the frame channel depth.
    #[must_use]
    pub const fn frame_queue(mut self, depth: usize) -> Self {
        self.frame_queue = depth;
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::InvalidConfig {
                reason: reason.to_owned(),
            })
        };

        if self.window_size == 0 {
            return invalid("window_size must be at least 1");
        }
        if !self.tolerance_kg.is_finite() || self.tolerance_kg < 0.0 {
            return invalid("tolerance_kg must be finite and non-negative");
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity must be at least 1");
        }
        if self.frame_queue == 0 {
            return invalid("frame_queue must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScaleConfig::new();
        assert_eq!(config.window_size, 4);
        assert!((config.tolerance_kg - 0.005).abs() < f64::EPSILON);
        assert!(config.filters.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = ScaleConfig::new()
            .window_size(6)
            .tolerance_kg(0.01)
            .filter(DeviceFilter::vendor(0x0922))
            .event_capacity(8)
            .frame_queue(16);
        assert_eq!(config.window_size, 6);
        assert_eq!(config.filters, vec![DeviceFilter::vendor(0x0922)]);
        assert_eq!((config.event_capacity, config.frame_queue), (8, 16));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        for config in [
            ScaleConfig::new().window_size(0),
            ScaleConfig::new().tolerance_kg(-0.1),
            ScaleConfig::new().tolerance_kg(f64::NAN),
            ScaleConfig::new().event_capacity(0),
            ScaleConfig::new().frame_queue(0),
        ] {
            assert!(matches!(
                config.validate(),
                Err(Error::InvalidConfig { .. })
            ));
        }
    }
}
