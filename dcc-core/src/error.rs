use std::sync::Arc;
use thiserror::Error;

/// Main error type for command station operations
///
/// The error is `Clone` so that a single stored failure (for example the error
/// that moved a station into its `Error` state) can be handed to every caller
/// waiting on that station. I/O errors are therefore shared behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum DccError {
    /// The link could not be opened, or was lost while in use
    #[error("Connection error: {0}")]
    Connection(Arc<std::io::Error>),

    /// The port was closed explicitly while an operation was pending
    #[error("port closed")]
    PortClosed,

    /// A received frame did not XOR to zero
    #[error("Invalid checksum for received message")]
    Checksum { frame: Vec<u8> },

    /// Well-formed message with the wrong content
    #[error("{0}")]
    Protocol(String),

    /// Operation requires a state the station is not in
    #[error("{device_id} is in state {current}, expected {expected}")]
    State {
        device_id: String,
        current: String,
        expected: String,
    },

    /// Caller supplied a value outside its legal range
    #[error("{0}")]
    Validation(String),

    /// Buffer cannot hold the requested bytes
    #[error("Buffer too small: need {needed} bytes at offset {offset}, buffer length {len}")]
    OutOfBounds {
        needed: usize,
        offset: usize,
        len: usize,
    },

    /// No response arrived within the allowed time
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Operation not implemented by this device
    #[error("{0} not supported")]
    NotSupported(String),

    /// A second read was issued while one was still outstanding
    #[error("Read already in progress")]
    ReadInProgress,

    /// Connection string or configuration problem
    #[error("{0}")]
    Config(String),
}

impl From<std::io::Error> for DccError {
    fn from(err: std::io::Error) -> Self {
        DccError::Connection(Arc::new(err))
    }
}

impl DccError {
    /// Build a protocol error from any displayable message
    pub fn protocol(msg: impl Into<String>) -> Self {
        DccError::Protocol(msg.into())
    }

    /// Build a validation error from any displayable message
    pub fn validation(msg: impl Into<String>) -> Self {
        DccError::Validation(msg.into())
    }

    /// Whether the error indicates the underlying link is gone
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, DccError::Connection(_) | DccError::PortClosed)
    }
}

/// Result type alias for command station operations
pub type DccResult<T> = Result<T, DccError>;
