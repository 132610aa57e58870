//! eLink driver configuration

use dcc_core::{ConnectionConfig, DccResult};
use dcc_transport::DEFAULT_TRACE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
/// Default response timeout in milliseconds
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 2_000;
/// Default wait for a repeated acknowledgement in milliseconds
pub const DEFAULT_ACK_DRAIN_TIMEOUT_MS: u64 = 250;
/// Default delay before a triggered function is switched off, in milliseconds
pub const DEFAULT_TRIGGER_RELEASE_DELAY_MS: u64 = 500;
/// Firmware versions the driver talks to (1.05 and 1.07)
pub const DEFAULT_SUPPORTED_VERSIONS: [u8; 2] = [105, 107];

/// eLink driver settings
///
/// Every field has a default, so a partial document deserialises.
/// Connection string keys override individual fields, see
/// [`apply_connection_config`](Self::apply_connection_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElinkConfig {
    pub heartbeat_interval_ms: u64,
    pub response_timeout_ms: u64,
    /// How long to wait for another copy of a repeated acknowledgement
    pub ack_drain_timeout_ms: u64,
    pub trigger_release_delay_ms: u64,
    pub supported_versions: Vec<u8>,
    /// Entries kept in the debug trace when `debug` is set
    pub trace_capacity: usize,
    /// Where the debug trace is written when the station fails or closes
    pub debug_trace_path: Option<PathBuf>,
}

impl Default for ElinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            ack_drain_timeout_ms: DEFAULT_ACK_DRAIN_TIMEOUT_MS,
            trigger_release_delay_ms: DEFAULT_TRIGGER_RELEASE_DELAY_MS,
            supported_versions: DEFAULT_SUPPORTED_VERSIONS.to_vec(),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            debug_trace_path: None,
        }
    }
}

impl ElinkConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn ack_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_drain_timeout_ms)
    }

    pub fn trigger_release_delay(&self) -> Duration {
        Duration::from_millis(self.trigger_release_delay_ms)
    }

    pub fn is_supported_version(&self, version: u8) -> bool {
        self.supported_versions.contains(&version)
    }

    /// Override fields from a connection string
    ///
    /// Recognised keys: `heartbeat`, `timeout` and `trigger` (milliseconds),
    /// and `trace` (path the debug trace is written to).
    ///
    /// # Errors
    /// `DccError::Config` if a numeric value does not parse
    pub fn apply_connection_config(&mut self, config: &ConnectionConfig) -> DccResult<()> {
        self.heartbeat_interval_ms =
            config.get_u32("heartbeat", self.heartbeat_interval_ms as u32)? as u64;
        self.response_timeout_ms =
            config.get_u32("timeout", self.response_timeout_ms as u32)? as u64;
        self.trigger_release_delay_ms =
            config.get_u32("trigger", self.trigger_release_delay_ms as u32)? as u64;
        if let Some(path) = config.get("trace") {
            self.debug_trace_path = Some(PathBuf::from(path));
        }
        Ok(())
    }
}
