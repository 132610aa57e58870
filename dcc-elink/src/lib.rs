//! eLink command station driver
//!
//! # Usage
//! ```no_run
//! use dcc_elink::ElinkCommandStation;
//! use dcc_station::{CommandBatch, CommandStation};
//!
//! # async fn run() -> dcc_core::DccResult<()> {
//! let station = ElinkCommandStation::open("port=/dev/ttyACM0").await?;
//! let mut batch = station.begin_command_batch()?;
//! batch.set_locomotive_speed(1234, 56, false)?;
//! batch.commit().await?;
//! station.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
mod cv;
pub mod functions;
mod handshake;
mod heartbeat;
mod link;
pub mod messages;
pub mod station;

#[cfg(test)]
mod fake;

pub use batch::ElinkCommandBatch;
pub use config::ElinkConfig;
pub use functions::{FunctionBank, FunctionLatchBank, PendingLatches};
pub use station::ElinkCommandStation;
