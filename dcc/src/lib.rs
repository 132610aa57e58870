//! dcc_rs - command station protocol engine for DCC model railways
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `dcc-core`: Error taxonomy, NMRA codec and connection strings
//! - `dcc-transport`: Single-reader byte stream over a serial port
//! - `dcc-station`: Station state machine and the driver traits
//! - `dcc-elink`: eLink USB command station driver
//!
//! # Usage
//!
//! ```no_run
//! use dcc::{DeviceRegistry, FunctionAction};
//!
//! # async fn run() -> dcc::DccResult<()> {
//! let registry = DeviceRegistry::with_default_drivers();
//! let station = registry.open("eLink", "port=/dev/ttyACM0").await?;
//! let mut batch = station.begin_command_batch()?;
//! batch.set_locomotive_function(3, 0, FunctionAction::LatchOn)?;
//! batch.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod retry;

pub use dcc_core::nmra;
pub use dcc_core::{ConnectionConfig, DccError, DccResult};
pub use dcc_station::{
    CommandBatch, CommandStation, CommandStationState, FunctionAction, StateChange,
    StatisticsSnapshot,
};
pub use registry::{DeviceRegistry, StationFactory};
pub use retry::{with_retries, DEFAULT_ATTEMPTS};

// Re-export the transport layer
pub mod transport {
    pub use dcc_transport::*;
}

// Re-export drivers
pub mod elink {
    pub use dcc_elink::*;
}
