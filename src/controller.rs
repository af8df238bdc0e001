//! Main [`ScaleController`] implementation.
//!
//! The controller combines a [`DeviceSession`], the frame decoder and a
//! [`StabilityDetector`] into one observable [`TelemetryState`], and
//! exposes the operator actions: connect, disconnect, lock and clear.

use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::sync::{Mutex, watch};

use crate::config::ScaleConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::protocol;
use crate::session::DeviceSession;
use crate::stability::StabilityDetector;
use crate::transport::{DeviceAccess, SerialAccess, SerialConfig};
use crate::types::{DeviceIdentity, Link, Status, TelemetryState};

/// State shared with the frame pump.
struct Shared {
    state: watch::Sender<TelemetryState>,
    detector: std::sync::Mutex<StabilityDetector>,
    dispatcher: EventDispatcher,
}

impl Shared {
    fn detector(&self) -> MutexGuard<'_, StabilityDetector> {
        self.detector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decodes one frame and folds it into the state.
    fn handle_frame(&self, frame: &[u8]) {
        let reading = protocol::decode(frame);
        if reading.is_noise() {
            tracing::trace!("no weight in frame: {}", hex::encode(frame));
        }

        let mut events = Vec::new();
        let mut detector = self.detector();
        self.state.send_if_modified(|state| {
            if state.status() != Status::Connected {
                return false;
            }

            let mut changed = false;
            if !reading.text.is_empty() {
                state.set_raw_text(reading.text.clone());
                changed = true;
            }

            if let Some(weight_kg) = reading.weight_kg {
                let was_stable = detector.is_stable();
                let stable = detector.push(weight_kg);
                changed |= state.set_live(weight_kg);

                tracing::trace!(weight_kg, stable, "reading");
                events.push(Event::Reading { weight_kg, stable });
                if stable && !was_stable {
                    events.push(Event::Stabilized(weight_kg));
                }
            }
            changed
        });
        drop(detector);

        for event in events {
            self.dispatcher.dispatch(event);
        }
    }

    /// Moves a connected link to `error` once its frame stream has ended.
    fn device_lost(&self) {
        let error = Error::DeviceLost;
        let mut detector = self.detector();
        let lost = self.state.send_if_modified(|state| {
            if state.status() != Status::Connected {
                return false;
            }
            state.set_link(Link::Error {
                message: error.to_string(),
            });
            true
        });
        if !lost {
            return;
        }
        detector.reset();
        drop(detector);

        tracing::warn!("{}", error);
        self.dispatcher.dispatch(Event::Error {
            message: error.to_string(),
        });
    }

    fn fail(&self, error: &Error) {
        tracing::warn!("connect failed: {}", error);
        self.state.send_modify(|state| {
            if matches!(error, Error::Unsupported) {
                state.set_supported(false);
            }
            state.set_link(Link::Error {
                message: error.to_string(),
            });
        });
        self.dispatcher.dispatch(Event::Error {
            message: error.to_string(),
        });
    }
}

/// Returns a `connecting` link to `idle` when a `connect` call ends
/// without recording a result, e.g. because its future was dropped.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<TelemetryState>,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        let reverted = self.state.send_if_modified(|state| {
            if state.status() != Status::Connecting {
                return false;
            }
            state.set_link(Link::Idle);
            true
        });
        if reverted {
            tracing::debug!("connect abandoned, back to idle");
        }
    }
}

/// Controller for one weighing device.
///
/// All operations take `&self`, so the controller can be shared behind an
/// `Arc`. Transition guards reject a second `connect` while one is in
/// flight or a device is already open.
///
/// Dropping the controller closes an open device exactly once on the
/// current Tokio runtime.
pub struct ScaleController<A> {
    session: Mutex<DeviceSession<A>>,
    shared: Arc<Shared>,
}

impl ScaleController<SerialAccess> {
    /// Creates a controller for serial scales.
    pub fn serial(serial: SerialConfig, config: ScaleConfig) -> Result<Self> {
        Self::new(SerialAccess::new(serial), config)
    }
}

impl<A: DeviceAccess> ScaleController<A> {
    /// Creates an idle controller over the given host access.
    pub fn new(access: A, config: ScaleConfig) -> Result<Self> {
        config.validate()?;

        let supported = access.is_supported();
        let session = DeviceSession::new(access)
            .with_filters(config.filters.clone())
            .with_frame_queue(config.frame_queue);
        let (state, _) = watch::channel(TelemetryState::new(supported));

        Ok(Self {
            session: Mutex::new(session),
            shared: Arc::new(Shared {
                state,
                detector: std::sync::Mutex::new(StabilityDetector::new(
                    config.window_size,
                    config.tolerance_kg,
                )),
                dispatcher: EventDispatcher::new(config.event_capacity),
            }),
        })
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> TelemetryState {
        self.shared.state.borrow().clone()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<TelemetryState> {
        self.shared.state.subscribe()
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.dispatcher.subscribe()
    }

    /// Returns the event dispatcher, e.g. for [`EventDispatcher::wait_for`].
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Returns true if the latest reading is stable.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.shared.detector().is_stable()
    }

    /// Returns the last value seen while the reading was stable.
    #[must_use]
    pub fn stable_weight_kg(&self) -> Option<f64> {
        self.shared.detector().last_stable_kg()
    }

    /// Requests, opens and starts streaming from a device.
    ///
    /// Only valid from `idle` or `error`. Failures are also recorded in
    /// the state's error slot. Dropping the returned future before it
    /// completes leaves the controller `idle`.
    pub async fn connect(&self) -> Result<DeviceIdentity> {
        let mut rejected = None;
        self.shared.state.send_if_modified(|state| match state.status() {
            Status::Idle | Status::Error => {
                state.set_link(Link::Connecting);
                state.set_notice(None);
                true
            }
            status => {
                rejected = Some(status);
                false
            }
        });
        if let Some(status) = rejected {
            return Err(Error::InvalidState {
                operation: "connect",
                status,
            });
        }

        let _connecting = ConnectingGuard {
            state: &self.shared.state,
        };

        let mut session = self.session.lock().await;
        if session.is_open() {
            tracing::warn!("releasing a device whose stream ended");
            if let Err(e) = session.close().await {
                tracing::warn!("device close failed: {}", e);
            }
        }

        let identity = match session.open().await {
            Ok(identity) => identity,
            Err(e @ Error::InvalidState { .. }) => return Err(e),
            Err(e) => {
                self.shared.fail(&e);
                return Err(e);
            }
        };

        self.shared.detector().reset();
        self.shared.state.send_modify(|state| {
            state.set_supported(true);
            state.set_link(Link::Connected {
                device: identity.clone(),
                live_weight_kg: None,
            });
        });

        let on_frame = Arc::clone(&self.shared);
        let on_end = Arc::clone(&self.shared);
        if let Err(e) = session
            .on_frame_with_end(
                move |frame| on_frame.handle_frame(&frame),
                move || on_end.device_lost(),
            )
            .await
        {
            if let Err(close) = session.close().await {
                tracing::warn!("device close failed: {}", close);
            }
            self.shared.fail(&e);
            return Err(e);
        }

        tracing::info!("connected to {}", identity);
        self.shared
            .dispatcher
            .dispatch(Event::Connected(identity.clone()));
        Ok(identity)
    }

    /// Closes the device and returns to `idle`.
    ///
    /// Succeeds from any state except `connecting`, including `idle`, and
    /// never overrides a `connect` that starts while it runs. A
    /// failing device close is logged and does not prevent the transition.
    /// The locked weight is kept.
    pub async fn disconnect(&self) -> Result<()> {
        let status = self.shared.state.borrow().status();
        if status == Status::Connecting {
            return Err(Error::InvalidState {
                operation: "disconnect",
                status,
            });
        }

        let mut session = self.session.lock().await;
        // A connect may have started while this call waited for the session.
        let status = self.shared.state.borrow().status();
        if status == Status::Connecting {
            return Err(Error::InvalidState {
                operation: "disconnect",
                status,
            });
        }

        if let Err(e) = session.close().await {
            tracing::warn!("device close failed: {}", e);
        }
        self.shared.detector().reset();

        let was_connected = self.shared.state.send_if_modified(|state| {
            if matches!(state.link(), Link::Idle | Link::Connecting) {
                return false;
            }
            state.set_link(Link::Idle);
            true
        });
        if was_connected {
            tracing::info!("disconnected");
            self.shared.dispatcher.dispatch(Event::Disconnected);
        }
        Ok(())
    }

    /// Freezes the current weight.
    ///
    /// Prefers the last stable value, falling back to the live reading.
    pub fn lock(&self) -> Result<f64> {
        let candidate = {
            let detector = self.shared.detector();
            detector
                .last_stable_kg()
                .or_else(|| self.shared.state.borrow().live_weight_kg())
        };

        let Some(weight_kg) = candidate else {
            self.shared.state.send_modify(|state| {
                state.set_notice(Some(Error::LockUnavailable.to_string()));
            });
            return Err(Error::LockUnavailable);
        };

        self.shared.state.send_modify(|state| {
            state.set_locked(Some(weight_kg));
            state.set_notice(None);
        });
        tracing::debug!(weight_kg, "weight locked");
        self.shared
            .dispatcher
            .dispatch(Event::LockedWeightChanged(Some(weight_kg)));
        Ok(weight_kg)
    }

    /// Clears the locked weight.
    pub fn clear_lock(&self) {
        self.shared.state.send_modify(|state| state.set_locked(None));
        self.shared
            .dispatcher
            .dispatch(Event::LockedWeightChanged(None));
    }
}
