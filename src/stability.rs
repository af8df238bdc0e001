//! Settling detection for a noisy weight stream.
//!
//! A reading is stable when the last `window_size` samples all lie within
//! `tolerance_kg` of each other.

use std::collections::VecDeque;

/// Default number of samples that must agree.
pub const DEFAULT_WINDOW_SIZE: usize = 4;

/// Default spread allowed across the window, in kilograms.
pub const DEFAULT_TOLERANCE_KG: f64 = 0.005;

/// Sliding-window stability detector.
#[derive(Debug, Clone)]
pub struct StabilityDetector {
    window: VecDeque<f64>,
    window_size: usize,
    tolerance_kg: f64,
    stable: bool,
    last_stable_kg: Option<f64>,
}

impl Default for StabilityDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_TOLERANCE_KG)
    }
}

impl StabilityDetector {
    /// Creates a detector. A window size of zero is treated as one.
    #[must_use]
    pub fn new(window_size: usize, tolerance_kg: f64) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size + 1),
            window_size,
            tolerance_kg,
            stable: false,
            last_stable_kg: None,
        }
    }

    /// Adds a sample and returns whether the window is now stable.
    pub fn push(&mut self, value_kg: f64) -> bool {
        self.window.push_back(value_kg);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        self.stable = self.window.len() == self.window_size && self.spread() <= self.tolerance_kg;
        if self.stable {
            self.last_stable_kg = Some(value_kg);
        }
        self.stable
    }

    /// Clears the window and the remembered stable value.
    pub fn reset(&mut self) {
        self.window.clear();
        self.stable = false;
        self.last_stable_kg = None;
    }

    /// Returns the verdict of the most recent push.
    #[must_use]
    pub const fn is_stable(&self) -> bool {
        self.stable
    }

    /// Returns the newest sample seen while the window was stable.
    ///
    /// This value survives later unstable pushes until [`reset`](Self::reset).
    #[must_use]
    pub const fn last_stable_kg(&self) -> Option<f64> {
        self.last_stable_kg
    }

    /// Returns the number of buffered samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Returns true if no samples are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Returns the configured window size.
    #[must_use]
    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    /// Returns the configured tolerance.
    #[must_use]
    pub const fn tolerance_kg(&self) -> f64 {
        self.tolerance_kg
    }

    fn spread(&self) -> f64 {
        let (min, max) = self
            .window
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        max - min
    }
}
