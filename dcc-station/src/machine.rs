//! Generic command station state machine
//!
//! Every driver embeds one [`StateMachine`]. It holds the current
//! [`CommandStationState`], publishes a notification for each distinct
//! transition and lets callers wait for a state.
//!
//! # Exclusive access
//! [`StateMachine::request_state_transition`] observes `from` and switches to
//! `to` in one step under the machine's lock. Used as
//! `request_state_transition(Idle, Busy)` it behaves as a single-permit
//! semaphore: when several callers wait for `Idle`, exactly one wins each
//! time the link frees up, and the others keep waiting.
//!
//! # Notifications
//! State and error notifications go through `tokio::sync::broadcast`.
//! A notification sent while nobody is subscribed is dropped.

use crate::state::{CommandStationState, StateChange};
use dcc_core::{DccError, DccResult};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};

/// Capacity of the notification channels
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct MachineInner {
    state: CommandStationState,
    /// Error that moved the machine into `Error`
    error: Option<DccError>,
    /// Set on `ShuttingDown`, cleared on `Initialising`
    closed: bool,
}

/// State container and transition/await primitives shared by all drivers
#[derive(Debug)]
pub struct StateMachine {
    device_id: String,
    inner: Mutex<MachineInner>,
    changed: Notify,
    state_events: broadcast::Sender<StateChange>,
    error_events: broadcast::Sender<DccError>,
}

impl StateMachine {
    /// Create a machine in `Uninitialised`
    pub fn new(device_id: impl Into<String>) -> Self {
        let (state_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (error_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            device_id: device_id.into(),
            inner: Mutex::new(MachineInner::default()),
            changed: Notify::new(),
            state_events,
            error_events,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn lock(&self) -> MutexGuard<'_, MachineInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state
    pub fn state(&self) -> CommandStationState {
        self.lock().state
    }

    /// The error stored by the last [`set_error`](Self::set_error)
    pub fn last_error(&self) -> Option<DccError> {
        self.lock().error.clone()
    }

    /// Subscribe to state change notifications
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.state_events.subscribe()
    }

    /// Subscribe to error notifications
    pub fn subscribe_errors(&self) -> broadcast::Receiver<DccError> {
        self.error_events.subscribe()
    }

    /// Apply a transition while holding the lock
    ///
    /// Returns `false` for a same-state set, which emits nothing.
    fn apply(&self, inner: &mut MachineInner, next: CommandStationState) -> bool {
        let previous = inner.state;
        if previous == next {
            return false;
        }
        if !previous.is_expected_transition(next) {
            log::warn!(
                "{}: unexpected state transition {} -> {}",
                self.device_id,
                previous,
                next
            );
        }
        inner.state = next;
        match next {
            CommandStationState::ShuttingDown => inner.closed = true,
            CommandStationState::Initialising => {
                inner.closed = false;
                inner.error = None;
            }
            _ => {}
        }
        log::debug!("{}: {} -> {}", self.device_id, previous, next);
        let _ = self.state_events.send(StateChange {
            previous,
            current: next,
        });
        self.changed.notify_waiters();
        true
    }

    /// Move to `next`
    ///
    /// # Returns
    /// `true` if the state changed, `false` if it already was `next`
    pub fn set_state(&self, next: CommandStationState) -> bool {
        let mut inner = self.lock();
        self.apply(&mut inner, next)
    }

    /// Store `error`, move to `Error` and publish the error notification
    pub fn set_error(&self, error: DccError) {
        let mut inner = self.lock();
        log::error!("{}: {}", self.device_id, error);
        inner.error = Some(error.clone());
        self.apply(&mut inner, CommandStationState::Error);
        let _ = self.error_events.send(error);
    }

    /// Fail unless the current state is `expected`
    ///
    /// # Errors
    /// `DccError::State` naming the device, the current and the expected state.
    pub fn ensure_state(&self, expected: CommandStationState) -> DccResult<()> {
        let current = self.state();
        if current != expected {
            return Err(self.state_error(current, expected));
        }
        Ok(())
    }

    fn state_error(&self, current: CommandStationState, expected: CommandStationState) -> DccError {
        DccError::State {
            device_id: self.device_id.clone(),
            current: current.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Error for a waiter that can no longer reach `target`, if any
    fn blocked(&self, inner: &MachineInner, target: CommandStationState) -> Option<DccError> {
        use CommandStationState::*;
        match inner.state {
            Error => Some(
                inner
                    .error
                    .clone()
                    .unwrap_or_else(|| self.state_error(Error, target)),
            ),
            ShuttingDown | Uninitialised
                if inner.closed && !matches!(target, ShuttingDown | Uninitialised) =>
            {
                Some(self.state_error(inner.state, target))
            }
            _ => None,
        }
    }

    /// Wait until the machine reaches `target`
    ///
    /// Resolves immediately, without a transition, if already in `target`.
    ///
    /// # Errors
    /// The stored error if `Error` is reached first (or is current), or a
    /// state error if the station is closed while waiting.
    pub async fn until_state(&self, target: CommandStationState) -> DccResult<()> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.lock();
                if inner.state == target {
                    return Ok(());
                }
                if let Some(err) = self.blocked(&inner, target) {
                    return Err(err);
                }
            }
            notified.await;
        }
    }

    /// Wait for `from`, then move to `to` in the same step
    ///
    /// # Errors
    /// Same as [`until_state`](Self::until_state).
    pub async fn request_state_transition(
        &self,
        from: CommandStationState,
        to: CommandStationState,
    ) -> DccResult<()> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.state == from {
                    self.apply(&mut inner, to);
                    return Ok(());
                }
                if let Some(err) = self.blocked(&inner, from) {
                    return Err(err);
                }
            }
            notified.await;
        }
    }

    /// Move from `from` to `to` only if currently in `from`; never waits
    pub fn try_transition(&self, from: CommandStationState, to: CommandStationState) -> bool {
        let mut inner = self.lock();
        if inner.state != from {
            return false;
        }
        self.apply(&mut inner, to);
        true
    }
}
