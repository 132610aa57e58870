//! Transport layer module for DCC command stations
//!
//! This crate turns an event-driven serial connection into bounded,
//! single-reader, optionally time-limited reads with a debug trace.

pub mod byte_stream;
pub mod serial;
pub mod stream;
pub mod trace;

pub use byte_stream::{ByteStream, ByteStreamOptions};
pub use serial::{SerialSettings, SerialTransport, DEFAULT_BAUD_RATE};
pub use stream::StreamAccessor;
pub use trace::{DebugTrace, TraceDirection, TraceEntry, DEFAULT_TRACE_CAPACITY};
