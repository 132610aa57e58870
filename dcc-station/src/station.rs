//! Upward contract of every command station driver
//!
//! Callers (the HTTP layer, the scheduled-task runner, ...) only ever see a
//! command station through these traits.
//!
//! # Connection Lifecycle
//! 1. **Open**: a driver's `open(connection_string)` performs its handshake and
//!    returns a station in `Idle`
//! 2. **Use**: build and commit [`CommandBatch`]es, or read/write CVs
//! 3. **Close**: `close()` shuts the link down; a station in `Error` must be
//!    closed and reopened

use crate::state::{CommandStationState, StateChange};
use async_trait::async_trait;
use dcc_core::{DccError, DccResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// What to do with a locomotive function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionAction {
    /// Switch on, then switch off again after the configured release delay
    Trigger,
    /// Switch on and keep on
    LatchOn,
    /// Switch off and keep off
    LatchOff,
}

impl FunctionAction {
    /// Whether the function bit is set once the action has been applied
    pub fn is_on(&self) -> bool {
        !matches!(self, FunctionAction::LatchOff)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionAction::Trigger => "TRIGGER",
            FunctionAction::LatchOn => "LATCH_ON",
            FunctionAction::LatchOff => "LATCH_OFF",
        }
    }
}

impl fmt::Display for FunctionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of commands committed to the device as one wire exchange
///
/// A batch can be committed exactly once; after `commit()` every further
/// call fails.
#[async_trait]
pub trait CommandBatch: Send {
    /// Queue a speed command
    ///
    /// # Arguments
    /// * `address` - Locomotive address, 1 to 9999
    /// * `speed` - Speed step, 0 to 127
    /// * `reverse` - Direction of travel
    ///
    /// # Errors
    /// Validation errors are raised here, before anything reaches the wire.
    fn set_locomotive_speed(&mut self, address: u16, speed: u8, reverse: bool) -> DccResult<()>;

    /// Queue a function command
    ///
    /// # Arguments
    /// * `address` - Locomotive address, 1 to 9999
    /// * `function` - Function index, 0 to 28
    /// * `action` - Trigger, latch on or latch off
    fn set_locomotive_function(
        &mut self,
        address: u16,
        function: u8,
        action: FunctionAction,
    ) -> DccResult<()>;

    /// Queue raw bytes, sent verbatim
    fn write_raw(&mut self, data: &[u8]) -> DccResult<()>;

    /// Number of queued commands
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send every queued command in order as a single exchange
    async fn commit(&mut self) -> DccResult<()>;
}

/// Command station driver interface
#[async_trait]
pub trait CommandStation: Send + Sync {
    /// Identifier of the driver type, e.g. "eLink"
    fn device_id(&self) -> &str;

    /// Firmware version reported during the handshake
    fn version(&self) -> String;

    fn state(&self) -> CommandStationState;

    /// Close the link. Safe to call more than once.
    async fn close(&self) -> DccResult<()>;

    /// Start a new batch of commands
    fn begin_command_batch(&self) -> DccResult<Box<dyn CommandBatch>>;

    /// Read a CV from the locomotive on the programming track
    async fn read_loco_cv(&self, _cv: u16) -> DccResult<u8> {
        Err(DccError::NotSupported(format!("{}: CV read", self.device_id())))
    }

    /// Write a CV on the locomotive on the programming track
    async fn write_loco_cv(&self, _cv: u16, _value: u16) -> DccResult<()> {
        Err(DccError::NotSupported(format!("{}: CV write", self.device_id())))
    }

    /// State change notifications
    fn subscribe_state(&self) -> broadcast::Receiver<StateChange>;

    /// Error notifications
    fn subscribe_errors(&self) -> broadcast::Receiver<DccError>;
}
