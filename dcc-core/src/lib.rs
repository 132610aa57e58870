//! Core types and utilities for DCC command stations
//!
//! This crate provides the error taxonomy, the NMRA address/value codec and
//! connection string parsing used throughout the command station workspace.

pub mod connection_string;
pub mod error;
pub mod nmra;

pub use connection_string::ConnectionConfig;
pub use error::{DccError, DccResult};
