//! Command station lifecycle states

use std::fmt;

/// Command station state
///
/// # State Transitions
/// ```text
/// Uninitialised -> Initialising (on open())
/// Initialising  -> Idle         (handshake complete)
/// Idle          -> Busy         (wire exchange started)
/// Busy          -> Idle         (wire exchange complete)
/// any           -> Error        (protocol or I/O failure)
/// any           -> ShuttingDown (on close())
/// ShuttingDown  -> Uninitialised
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandStationState {
    /// Not opened yet, or fully closed (initial state)
    #[default]
    Uninitialised,
    /// Handshake in progress
    Initialising,
    /// Link up and free
    Idle,
    /// A wire exchange owns the link
    Busy,
    /// A failure occurred; the station must be closed and reopened
    Error,
    /// `close()` in progress
    ShuttingDown,
}

impl CommandStationState {
    /// Whether the link is open and usable
    pub fn is_ready(&self) -> bool {
        matches!(self, CommandStationState::Idle | CommandStationState::Busy)
    }

    /// Validate a transition against the lifecycle above
    ///
    /// The state machine accepts any transition; this is used to flag
    /// unexpected ones in the log.
    pub fn is_expected_transition(&self, next: CommandStationState) -> bool {
        use CommandStationState::*;
        match (*self, next) {
            (_, Error) | (_, ShuttingDown) => true,
            (Uninitialised, Initialising) => true,
            (Initialising, Idle) => true,
            (Idle, Busy) | (Busy, Idle) => true,
            (ShuttingDown, Uninitialised) => true,
            _ => false,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStationState::Uninitialised => "UNINITIALISED",
            CommandStationState::Initialising => "INITIALISING",
            CommandStationState::Idle => "IDLE",
            CommandStationState::Busy => "BUSY",
            CommandStationState::Error => "ERROR",
            CommandStationState::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

impl fmt::Display for CommandStationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification emitted on every distinct state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub previous: CommandStationState,
    pub current: CommandStationState,
}
