//! Command station layer
//!
//! This crate provides the lifecycle state machine shared by every command
//! station driver, and the traits through which callers use a driver.

pub mod machine;
pub mod state;
pub mod station;
pub mod statistics;

pub use machine::StateMachine;
pub use state::{CommandStationState, StateChange};
pub use station::{CommandBatch, CommandStation, FunctionAction};
pub use statistics::{StationStatistics, StatisticsSnapshot};
